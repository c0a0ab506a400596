//! Control channel wire protocol.
//!
//! Write side, one command per newline-terminated line:
//!
//! ```text
//!   add <pid>\n      hide <pid>
//!   del <pid>\n      clear the whole hidden set (<pid> is not used)
//!   anything else    ignored
//! ```
//!
//! Read side, one fixed-width line per hidden entry: `pid: %4d\n`.

use hideproc_core::error::{HideError, Result};
use hideproc_core::pid::Pid;

pub const ADD_KEYWORD: &[u8] = b"add";
pub const DEL_KEYWORD: &[u8] = b"del";
pub const KEYWORD_LEN: usize = 3;
/// Argument starts after the keyword and one separator byte.
pub const ARG_OFFSET: usize = KEYWORD_LEN + 1;
/// Shorter than either keyword: rejected.
pub const MIN_WRITE: usize = KEYWORD_LEN;
/// Rendered line cap, `sizeof("pid: %4d\n") + 4 - 1`.
pub const MAX_ENTRY_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Add(Pid),
    /// `add` whose argument is not a pid.
    BadAdd,
    /// Carries the parsed argument for logging only.
    Del(Option<Pid>),
    Ignored,
}

/// Parse one command line (newline already stripped).
pub fn parse_line(line: &[u8]) -> Command {
    if line.len() < KEYWORD_LEN {
        return Command::Ignored;
    }
    let arg = line.get(ARG_OFFSET..).and_then(Pid::parse_bytes);
    match &line[..KEYWORD_LEN] {
        ADD_KEYWORD => arg.map_or(Command::BadAdd, Command::Add),
        DEL_KEYWORD => Command::Del(arg),
        _ => Command::Ignored,
    }
}

/// Command lines of a write payload.
///
/// The payload ends at its first NUL; a trailing fragment without a
/// newline is not a command.
pub fn command_lines(payload: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    payload[..end]
        .split_inclusive(|&b| b == b'\n')
        .filter_map(|seg| seg.strip_suffix(b"\n"))
}

/// Write size gate. Undersized is checked first.
pub fn check_len(len: usize, max_write: usize) -> Result<()> {
    if len < MIN_WRITE {
        return Err(HideError::Undersized {
            len,
            min: MIN_WRITE,
        });
    }
    if len >= max_write {
        return Err(HideError::Oversized {
            len,
            max: max_write,
        });
    }
    Ok(())
}

/// `pid: %4d\n`, cut to `MAX_ENTRY_LEN` bytes.
pub fn format_entry(pid: Pid) -> String {
    let mut line = format!("pid: {:4}\n", pid.as_raw());
    line.truncate(MAX_ENTRY_LEN);
    line
}

pub fn render_listing(pids: &[Pid]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pids.len() * MAX_ENTRY_LEN);
    for &pid in pids {
        out.extend_from_slice(format_entry(pid).as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    fn lines(p: &[u8]) -> Vec<&[u8]> {
        command_lines(p).collect()
    }

    #[test]
    fn parse_commands() {
        assert_eq!(parse_line(b"add 1234"), Command::Add(Pid::new(1234)));
        assert_eq!(parse_line(b"add -5"), Command::Add(Pid::new(-5)));
        assert_eq!(parse_line(b"del 9999"), Command::Del(Some(Pid::new(9999))));
        assert_eq!(parse_line(b"del"), Command::Del(None));
        assert_eq!(parse_line(b"del junk"), Command::Del(None));
        assert_eq!(parse_line(b"add"), Command::BadAdd);
        assert_eq!(parse_line(b"add 12x"), Command::BadAdd);
        assert_eq!(parse_line(b"add 99999999999"), Command::BadAdd);
        assert_eq!(parse_line(b"xx"), Command::Ignored);
        assert_eq!(parse_line(b"list"), Command::Ignored);
        assert_eq!(parse_line(b""), Command::Ignored);
    }

    #[test]
    fn separator_byte_is_not_checked() {
        assert_eq!(parse_line(b"add:42"), Command::Add(Pid::new(42)));
        assert_eq!(parse_line(b"addition"), Command::BadAdd);
    }

    #[test]
    fn only_terminated_lines_count() {
        assert_eq!(lines(b"add 1\nadd 2"), vec![&b"add 1"[..]]);
        assert_eq!(lines(b"add 1\n\nadd 2\n").len(), 3);
        assert!(lines(b"add 1").is_empty());
    }

    #[test]
    fn payload_ends_at_nul() {
        assert_eq!(lines(b"add 1\n\0add 2\n"), vec![&b"add 1"[..]]);
        assert!(lines(b"add 1\0\n").is_empty());
    }

    #[test]
    fn length_gate() {
        assert_eq!(check_len(2, 1024).unwrap_err().errno(), Errno::EAGAIN);
        assert_eq!(check_len(0, 2).unwrap_err(), HideError::Undersized { len: 0, min: 3 });
        assert!(check_len(3, 1024).is_ok());
        assert!(check_len(1023, 1024).is_ok());
        assert_eq!(check_len(1024, 1024).unwrap_err().errno(), Errno::EINVAL);
    }

    #[test]
    fn entry_format() {
        assert_eq!(format_entry(Pid::new(7)), "pid:    7\n");
        assert_eq!(format_entry(Pid::new(1234)), "pid: 1234\n");
        assert_eq!(format_entry(Pid::new(123456)), "pid: 123456\n");
        // cut like the fixed message buffer
        assert_eq!(format_entry(Pid::new(12345678)), "pid: 12345678");
        assert_eq!(format_entry(Pid::new(i32::MIN)).len(), MAX_ENTRY_LEN);
    }

    #[test]
    fn listing_concatenates_in_order() {
        let out = render_listing(&[Pid::new(2), Pid::new(1), Pid::new(2)]);
        assert_eq!(out, b"pid:    2\npid:    1\npid:    2\n");
        assert!(render_listing(&[]).is_empty());
    }
}
