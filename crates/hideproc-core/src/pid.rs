//! Process identifier type.

use core::fmt;

/// A host process identifier.
///
/// Host-assigned, reusable after the owning process exits. Negative values
/// can be carried (the control protocol accepts a sign) but the host never
/// allocates them, so they never match a live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(libc::pid_t);

impl Pid {
    /// First pid handed out by the host (pid 0 is the idle task).
    pub const INIT: Pid = Pid(1);

    #[inline]
    pub const fn new(raw: libc::pid_t) -> Self {
        Pid(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> libc::pid_t {
        self.0
    }

    /// Lower bound for the next enumeration step after `self`.
    ///
    /// `None` at `pid_t::MAX`: there is nothing above it to enumerate.
    #[inline]
    pub fn next(self) -> Option<Pid> {
        self.0.checked_add(1).map(Pid)
    }

    /// Parse a signed decimal `pid_t`.
    ///
    /// Accepts an optional `+` or `-` followed by ASCII digits only. No
    /// whitespace, no radix prefix, and the value must fit `pid_t`.
    pub fn parse_bytes(text: &[u8]) -> Option<Pid> {
        let (negative, digits) = match text.split_first()? {
            (b'-', rest) => (true, rest),
            (b'+', rest) => (false, rest),
            _ => (false, text),
        };
        if digits.is_empty() {
            return None;
        }

        let mut value: i64 = 0;
        for &b in digits {
            if !b.is_ascii_digit() {
                return None;
            }
            value = value.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
        }
        if negative {
            value = -value;
        }
        libc::pid_t::try_from(value).ok().map(Pid)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<libc::pid_t> for Pid {
    fn from(raw: libc::pid_t) -> Self {
        Pid(raw)
    }
}

impl From<Pid> for nix::unistd::Pid {
    fn from(pid: Pid) -> Self {
        nix::unistd::Pid::from_raw(pid.0)
    }
}

impl From<nix::unistd::Pid> for Pid {
    fn from(pid: nix::unistd::Pid) -> Self {
        Pid(pid.as_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_signed() {
        assert_eq!(Pid::parse_bytes(b"1234"), Some(Pid::new(1234)));
        assert_eq!(Pid::parse_bytes(b"+7"), Some(Pid::new(7)));
        assert_eq!(Pid::parse_bytes(b"-5"), Some(Pid::new(-5)));
        assert_eq!(Pid::parse_bytes(b"0"), Some(Pid::new(0)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Pid::parse_bytes(b""), None);
        assert_eq!(Pid::parse_bytes(b"-"), None);
        assert_eq!(Pid::parse_bytes(b" 12"), None);
        assert_eq!(Pid::parse_bytes(b"12 "), None);
        assert_eq!(Pid::parse_bytes(b"0x10"), None);
        assert_eq!(Pid::parse_bytes(b"ess 5"), None);
    }

    #[test]
    fn parse_rejects_out_of_range() {
        assert_eq!(Pid::parse_bytes(b"2147483647"), Some(Pid::new(i32::MAX)));
        assert_eq!(Pid::parse_bytes(b"2147483648"), None);
        assert_eq!(Pid::parse_bytes(b"-2147483648"), Some(Pid::new(i32::MIN)));
        assert_eq!(Pid::parse_bytes(b"99999999999999999999999"), None);
    }

    #[test]
    fn next_stops_at_max() {
        assert_eq!(Pid::new(41).next(), Some(Pid::new(42)));
        assert_eq!(Pid::new(libc::pid_t::MAX).next(), None);
    }

    #[test]
    fn nix_round_trip() {
        let pid = Pid::new(4321);
        let nix_pid: nix::unistd::Pid = pid.into();
        assert_eq!(nix_pid.as_raw(), 4321);
        assert_eq!(Pid::from(nix_pid), pid);
    }
}
