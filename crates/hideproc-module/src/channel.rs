//! `ControlChannel`: operator-facing byte-stream endpoint.
//!
//! Each `open()` returns a `ChannelFile` handle with its own offset, like
//! an open file on a character device:
//!
//! - write: size gate, then every newline-terminated command in order.
//!   Returns the full length and moves the offset there.
//! - read: the listing from the handle's offset, in as many reads as the
//!   caller's buffer needs, then `0` until the hidden set changes. A write
//!   or a change to the set starts the next read over at the top.
//!
//! Handles implement `std::io::Read` / `std::io::Write`.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hideproc_core::error::Result;
use hideproc_core::kprint::hex_dump;
use hideproc_core::{kdebug, kerror, ktrace, kwarn};

use crate::protocol::{self, Command};
use crate::registry::HiddenRegistry;

pub struct ControlChannel {
    name: String,
    registry: Arc<HiddenRegistry>,
    max_write: usize,
    dump_input: bool,
    opens: AtomicU64,
}

impl ControlChannel {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<HiddenRegistry>,
        max_write: usize,
        dump_input: bool,
    ) -> Self {
        Self {
            name: name.into(),
            registry,
            max_write,
            dump_input,
            opens: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<HiddenRegistry> {
        &self.registry
    }

    pub fn max_write(&self) -> usize {
        self.max_write
    }

    /// Number of handles opened so far.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Always succeeds.
    pub fn open(self: &Arc<Self>) -> ChannelFile {
        self.opens.fetch_add(1, Ordering::Relaxed);
        ChannelFile {
            channel: Arc::clone(self),
            offset: 0,
            pass: None,
        }
    }

    fn apply(&self, cmd: Command, line: &[u8]) {
        match cmd {
            Command::Add(pid) => {
                if let Err(e) = self.registry.hide(pid) {
                    kerror!("add {}: {}", pid, e);
                }
            }
            Command::BadAdd => {
                kwarn!("add: bad pid in {:?}, ignored", String::from_utf8_lossy(line));
            }
            Command::Del(requested) => {
                self.registry.unhide_all(requested);
            }
            Command::Ignored => {
                ktrace!("ignored line {:?}", String::from_utf8_lossy(line));
            }
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("name", &self.name)
            .field("max_write", &self.max_write)
            .field("dump_input", &self.dump_input)
            .field("hidden", &self.registry.len())
            .finish()
    }
}

/// One open handle on a `ControlChannel`.
#[derive(Debug)]
pub struct ChannelFile {
    channel: Arc<ControlChannel>,
    offset: u64,
    /// Registry generation of the listing pass in progress, if any.
    pass: Option<u64>,
}

impl ChannelFile {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Process every command in `buf`.
    ///
    /// Size violations are rejected before anything is parsed.
    pub fn write_commands(&mut self, buf: &[u8]) -> Result<usize> {
        let chan = &self.channel;
        if let Err(e) = protocol::check_len(buf.len(), chan.max_write) {
            kwarn!("{}: {}", chan.name, e);
            return Err(e);
        }
        if chan.dump_input {
            hex_dump("input buffer ", buf);
        }

        for line in protocol::command_lines(buf) {
            if chan.dump_input {
                hex_dump("partial string ", line);
            }
            chan.apply(protocol::parse_line(line), line);
        }

        self.offset = buf.len() as u64;
        self.pass = None;
        Ok(buf.len())
    }

    /// Copy the listing from the current offset into `buf`.
    ///
    /// Returns `0` once the pass is consumed and the set is unchanged.
    pub fn read_listing(&mut self, buf: &mut [u8]) -> usize {
        let registry = &self.channel.registry;
        let generation = registry.generation();
        if self.pass != Some(generation) {
            if self.pass.is_some() {
                kdebug!("{}: hidden set changed, listing restarts", self.channel.name);
            }
            self.offset = 0;
            self.pass = Some(generation);
        }

        let listing = protocol::render_listing(&registry.list_all());
        let start = usize::try_from(self.offset)
            .unwrap_or(usize::MAX)
            .min(listing.len());
        let rest = &listing[start..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.offset += n as u64;
        n
    }

    /// Always succeeds.
    pub fn close(self) -> Result<()> {
        ktrace!("{}: close at offset {}", self.channel.name, self.offset);
        Ok(())
    }
}

impl io::Read for ChannelFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_listing(buf))
    }
}

impl io::Write for ChannelFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_commands(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hideproc_core::error::HideError;
    use hideproc_core::pid::Pid;
    use std::io::{Read, Write};

    fn channel() -> Arc<ControlChannel> {
        Arc::new(ControlChannel::new(
            "hideproc",
            Arc::new(HiddenRegistry::new()),
            1024,
            false,
        ))
    }

    fn write(chan: &Arc<ControlChannel>, payload: &[u8]) -> Result<usize> {
        let mut f = chan.open();
        let r = f.write_commands(payload);
        f.close().unwrap();
        r
    }

    fn read_all(chan: &Arc<ControlChannel>) -> String {
        let mut out = String::new();
        chan.open().read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn add_then_read() {
        let chan = channel();
        assert_eq!(write(&chan, b"add 1234\n").unwrap(), 9);
        assert_eq!(read_all(&chan), "pid: 1234\n");
    }

    #[test]
    fn del_clears_everything() {
        let chan = channel();
        write(&chan, b"add 1\nadd 2\ndel 9999\n").unwrap();
        assert_eq!(read_all(&chan), "");
        assert!(chan.registry().is_empty());
    }

    #[test]
    fn multiple_commands_in_order() {
        let chan = channel();
        write(&chan, b"add 7\nadd 3\nadd 7\n").unwrap();
        assert_eq!(read_all(&chan), "pid:    7\npid:    3\npid:    7\n");
    }

    #[test]
    fn unknown_line_ignored() {
        let chan = channel();
        write(&chan, b"add 5\n").unwrap();
        let gen = chan.registry().generation();
        assert_eq!(write(&chan, b"xx\n").unwrap(), 3);
        assert_eq!(chan.registry().list_all(), vec![Pid::new(5)]);
        assert_eq!(chan.registry().generation(), gen);
    }

    #[test]
    fn bad_add_argument_ignored() {
        let chan = channel();
        assert_eq!(write(&chan, b"add x\nadd 4\n").unwrap(), 12);
        assert_eq!(chan.registry().list_all(), vec![Pid::new(4)]);
    }

    #[test]
    fn failed_add_does_not_stop_later_lines() {
        let chan = channel();
        chan.registry().fail_next_alloc();
        let payload = b"add 1\nadd 2\nadd 3\n";
        assert_eq!(write(&chan, payload).unwrap(), payload.len());
        assert_eq!(chan.registry().list_all(), vec![Pid::new(2), Pid::new(3)]);
    }

    #[test]
    fn unterminated_tail_is_not_a_command() {
        let chan = channel();
        write(&chan, b"add 1\nadd 2").unwrap();
        assert_eq!(chan.registry().list_all(), vec![Pid::new(1)]);
    }

    #[test]
    fn undersized_rejected() {
        let chan = channel();
        let mut f = chan.open();
        assert_eq!(
            f.write_commands(b"ad"),
            Err(HideError::Undersized { len: 2, min: 3 })
        );
        let io_err = f.write(b"a").unwrap_err();
        assert_eq!(io_err.raw_os_error(), Some(libc::EAGAIN));
        assert_eq!(f.offset(), 0);
    }

    #[test]
    fn oversized_rejected_without_mutation() {
        let chan = Arc::new(ControlChannel::new(
            "small",
            Arc::new(HiddenRegistry::new()),
            16,
            false,
        ));
        let payload = b"add 1\nadd 2\nadd 3\n";
        assert_eq!(payload.len(), 18);
        let err = write(&chan, payload).unwrap_err();
        assert_eq!(err, HideError::Oversized { len: 18, max: 16 });
        assert!(chan.registry().is_empty());

        let exactly = [b'x'; 16];
        assert!(write(&chan, &exactly).is_err());
        assert!(write(&chan, b"add 9\n").is_ok());
    }

    #[test]
    fn second_read_is_empty_until_change() {
        let chan = channel();
        write(&chan, b"add 11\n").unwrap();

        let mut f = chan.open();
        let mut buf = [0u8; 64];
        assert_eq!(f.read_listing(&mut buf), 10);
        assert_eq!(&buf[..10], b"pid:   11\n");
        assert_eq!(f.read_listing(&mut buf), 0);

        write(&chan, b"add 12\n").unwrap();
        assert_eq!(f.read_listing(&mut buf), 20);
        assert_eq!(f.read_listing(&mut buf), 0);
    }

    #[test]
    fn read_capped_at_buffer() {
        let chan = channel();
        write(&chan, b"add 1\nadd 2\n").unwrap();
        let mut f = chan.open();
        let mut buf = [0u8; 12];
        assert_eq!(f.read_listing(&mut buf), 12);
        assert_eq!(&buf, b"pid:    1\npi");
        assert_eq!(f.offset(), 12);
        assert_eq!(f.read_listing(&mut buf), 8);
        assert_eq!(&buf[..8], b"d:    2\n");
        assert_eq!(f.read_listing(&mut buf), 0);
    }

    #[test]
    fn read_to_string_returns_every_entry() {
        let chan = channel();
        write(&chan, b"add 1\nadd 2\nadd 3\nadd 4\n").unwrap();
        let out = read_all(&chan);
        assert_eq!(out.len(), 40);
        assert_eq!(out, "pid:    1\npid:    2\npid:    3\npid:    4\n");

        let many: String = (1..=64).map(|n| format!("add {}\n", n)).collect();
        write(&chan, many.as_bytes()).unwrap();
        let out = read_all(&chan);
        assert_eq!(out.lines().count(), 68);
        assert!(out.ends_with("pid:   64\n"));
    }

    #[test]
    fn tiny_buffer_reads_the_whole_listing() {
        let chan = channel();
        write(&chan, b"add 10\nadd 20\n").unwrap();
        let mut f = chan.open();
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while f.read_listing(&mut byte) == 1 {
            out.push(byte[0]);
        }
        assert_eq!(out, b"pid:   10\npid:   20\n");
    }

    #[test]
    fn change_mid_pass_restarts_from_the_top() {
        let chan = channel();
        write(&chan, b"add 1\nadd 2\n").unwrap();
        let mut f = chan.open();
        let mut buf = [0u8; 10];
        assert_eq!(f.read_listing(&mut buf), 10);
        write(&chan, b"add 3\n").unwrap();
        let mut out = String::new();
        f.read_to_string(&mut out).unwrap();
        assert_eq!(out, "pid:    1\npid:    2\npid:    3\n");
    }

    #[test]
    fn write_then_read_on_one_handle_starts_at_top() {
        let chan = channel();
        write(&chan, b"add 6\n").unwrap();
        let mut f = chan.open();
        f.write_all(b"xx\n").unwrap();
        assert_eq!(f.offset(), 3);
        let mut out = String::new();
        f.read_to_string(&mut out).unwrap();
        assert_eq!(out, "pid:    6\n");
    }

    #[test]
    fn write_moves_offset() {
        let chan = channel();
        let mut f = chan.open();
        f.write_all(b"add 8\n").unwrap();
        assert_eq!(f.offset(), 6);
        // the write changed the set, so this handle reads it
        let mut out = String::new();
        f.read_to_string(&mut out).unwrap();
        assert_eq!(out, "pid:    8\n");
    }

    #[test]
    fn empty_registry_reads_nothing() {
        let chan = channel();
        assert_eq!(read_all(&chan), "");
        assert_eq!(chan.open_count(), 1);
    }

    #[test]
    fn dump_input_does_not_change_behavior() {
        let chan = Arc::new(ControlChannel::new(
            "dump",
            Arc::new(HiddenRegistry::new()),
            1024,
            true,
        ));
        write(&chan, b"add 2\n\0add 3\n").unwrap();
        assert_eq!(chan.registry().list_all(), vec![Pid::new(2)]);
    }
}
