//! printk-style logging for hideproc
//!
//! Leveled, line-atomic output on stderr, plus a hex dump helper in the
//! spirit of `print_hex_dump_bytes`.
//!
//! # Environment Variables
//!
//! - `HIDEPROC_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0..5 (default info)
//! - `HIDEPROC_FLUSH_EPRINT=1` - flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use hideproc_core::{kinfo, kwarn, kdebug};
//!
//! kinfo!("resolved symbol: {} {}", name, addr);
//! kwarn!("hook not installed, enumeration is unfiltered");
//! hideproc_core::kprint::hex_dump("input buffer", payload);
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit. Unknown text yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Kernel-log style tag.
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "<3>",
            LogLevel::Warn => "<4>",
            LogLevel::Info => "<6>",
            LogLevel::Debug => "<7>",
            LogLevel::Trace => "<7>",
        }
    }
}

static INIT: Once = Once::new();
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Read the environment once. Later calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        if let Ok(val) = std::env::var("HIDEPROC_FLUSH_EPRINT") {
            let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
            FLUSH_ENABLED.store(flush, Ordering::Relaxed);
        }
        if let Some(level) = std::env::var("HIDEPROC_LOG_LEVEL")
            .ok()
            .and_then(|v| LogLevel::parse(&v))
        {
            LOG_LEVEL.store(level as u8, Ordering::Relaxed);
        }
    });
}

#[inline]
pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Override the level programmatically. Wins over the environment.
pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(line: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(line);
    let _ = handle.write_all(b"\n");
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _kprint_impl(args: std::fmt::Arguments<'_>) {
    init();
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    init();
    emit(args);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    emit(format_args!("{}hideproc: {}", level.tag(), args));
}

// ============================================================================
// Hex dump
// ============================================================================

/// Format one 16-byte row: `prefix+off: hex  ascii`.
pub fn hex_dump_row(prefix: &str, offset: usize, row: &[u8]) -> String {
    let mut out = format!("{}{:08x}: ", prefix, offset);
    for i in 0..16 {
        match row.get(i) {
            Some(b) => out.push_str(&format!("{:02x} ", b)),
            None => out.push_str("   "),
        }
    }
    out.push(' ');
    out.extend(row.iter().map(|&b| {
        if b.is_ascii_graphic() || b == b' ' {
            b as char
        } else {
            '.'
        }
    }));
    out
}

/// Dump `bytes` at debug level, 16 bytes per row.
pub fn hex_dump(prefix: &str, bytes: &[u8]) {
    if !level_enabled(LogLevel::Debug) {
        return;
    }
    for (i, row) in bytes.chunks(16).enumerate() {
        _klog_impl(LogLevel::Debug, format_args!("{}", hex_dump_row(prefix, i * 16, row)));
    }
}

// ============================================================================
// Public Macros
// ============================================================================

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::kprint::_kprint_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse(" WARN "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("0"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn hex_row_layout() {
        let row = hex_dump_row("input buffer: ", 16, b"add 12\n");
        assert!(row.starts_with("input buffer: 00000010: 61 64 64 20 31 32 0a "));
        assert!(row.ends_with(" add 12."));
    }

    #[test]
    fn macros_compile() {
        set_log_level(LogLevel::Off);
        assert!(!level_enabled(LogLevel::Error));

        kprint!("");
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info {}", 1);
        kdebug!("debug");
        ktrace!("trace");
        hex_dump("x", b"abc");
    }
}
