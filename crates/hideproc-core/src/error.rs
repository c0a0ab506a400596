//! hideproc error types.

use std::fmt;

use nix::errno::Errno;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HideError {
    /// Target symbol has no entry in the host symbol table.
    Unresolved(String),
    /// Attaching the target to the trace ops filter failed.
    Filter { symbol: String, errno: Errno },
    /// Registering the trace ops with the host failed.
    Register(Errno),
    /// Unregistering the trace ops failed (teardown, reported only).
    Unregister(Errno),
    /// Dropping the target address from the ops filter failed (teardown).
    ClearFilter(Errno),
    /// Loading the replacement text into the host failed.
    ModuleLoad(Errno),
    /// `install` on a hook that is already live.
    AlreadyInstalled,
    /// `remove` on a hook that was never installed.
    NotInstalled,
    /// Control write at or above the size limit.
    Oversized { len: usize, max: usize },
    /// Control write shorter than any command keyword.
    Undersized { len: usize, min: usize },
    /// Registry entry allocation failed.
    NoMemory,
    /// Configuration value out of range.
    Config(&'static str),
}

/// Error taxonomy. Every variant maps to exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Resolution,
    Registration,
    Deregistration,
    Protocol,
    Allocation,
    Lifecycle,
}

impl HideError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unresolved(_) => ErrorCategory::Resolution,
            Self::Filter { .. } | Self::Register(_) | Self::ModuleLoad(_) => {
                ErrorCategory::Registration
            }
            Self::Unregister(_) | Self::ClearFilter(_) => ErrorCategory::Deregistration,
            Self::Oversized { .. } | Self::Undersized { .. } => ErrorCategory::Protocol,
            Self::NoMemory => ErrorCategory::Allocation,
            Self::AlreadyInstalled | Self::NotInstalled | Self::Config(_) => {
                ErrorCategory::Lifecycle
            }
        }
    }

    /// The errno an operator sees for this failure.
    pub fn errno(&self) -> Errno {
        match self {
            Self::Unresolved(_) => Errno::ENOENT,
            Self::Filter { errno, .. } => *errno,
            Self::Register(e) | Self::Unregister(e) | Self::ClearFilter(e) | Self::ModuleLoad(e) => {
                *e
            }
            Self::AlreadyInstalled => Errno::EBUSY,
            Self::NotInstalled | Self::Config(_) => Errno::EINVAL,
            Self::Oversized { .. } => Errno::EINVAL,
            Self::Undersized { .. } => Errno::EAGAIN,
            Self::NoMemory => Errno::ENOMEM,
        }
    }
}

impl fmt::Display for HideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved(name) => write!(f, "unresolved symbol: {}", name),
            Self::Filter { symbol, errno } => {
                write!(f, "set filter on {} failed: {}", symbol, errno)
            }
            Self::Register(e) => write!(f, "register ops failed: {}", e),
            Self::Unregister(e) => write!(f, "unregister ops failed: {}", e),
            Self::ClearFilter(e) => write!(f, "clear filter ip failed: {}", e),
            Self::ModuleLoad(e) => write!(f, "module text load failed: {}", e),
            Self::AlreadyInstalled => write!(f, "hook already installed"),
            Self::NotInstalled => write!(f, "hook not installed"),
            Self::Oversized { len, max } => {
                write!(f, "write of {} bytes too large to handle (max {})", len, max)
            }
            Self::Undersized { len, min } => {
                write!(f, "write of {} bytes shorter than any command ({})", len, min)
            }
            Self::NoMemory => write!(f, "out of memory"),
            Self::Config(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for HideError {}

impl From<HideError> for std::io::Error {
    fn from(e: HideError) -> Self {
        std::io::Error::from_raw_os_error(e.errno() as i32)
    }
}

pub type Result<T> = std::result::Result<T, HideError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_channel_signals() {
        let big = HideError::Oversized { len: 1024, max: 1024 };
        let small = HideError::Undersized { len: 2, min: 3 };
        assert_eq!(big.errno(), Errno::EINVAL);
        assert_eq!(small.errno(), Errno::EAGAIN);
        assert_eq!(big.category(), ErrorCategory::Protocol);
        assert_eq!(small.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn io_error_carries_errno() {
        let io: std::io::Error = HideError::Undersized { len: 1, min: 3 }.into();
        assert_eq!(io.raw_os_error(), Some(libc::EAGAIN));

        let io: std::io::Error = HideError::NoMemory.into();
        assert_eq!(io.raw_os_error(), Some(libc::ENOMEM));
    }

    #[test]
    fn display() {
        let e = HideError::Unresolved("find_ge_pid".into());
        assert_eq!(format!("{}", e), "unresolved symbol: find_ge_pid");
        assert_eq!(e.category(), ErrorCategory::Resolution);

        let e = HideError::Register(Errno::EBUSY);
        assert_eq!(e.category(), ErrorCategory::Registration);
        assert!(format!("{}", e).starts_with("register ops failed"));
    }
}
