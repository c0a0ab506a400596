//! Compile-time defaults. Every value can be overridden from the
//! environment, see `HideConfig::from_env`.

/// Enumeration primitive to intercept.
pub const TARGET_SYMBOL: &str = "find_ge_pid";

/// Control channel (device node) name.
pub const DEVICE_NAME: &str = "hideproc";

/// Writes at or above this many bytes are rejected.
pub const MAX_WRITE: usize = 1024;

/// Hex-dump every control write at debug level.
pub const DUMP_INPUT: bool = false;

/// Self-call guard: "reentry" or "module-range".
pub const GUARD: &str = "reentry";

/// Fail startup when the hook cannot be installed.
pub const REQUIRE_HOOK: bool = true;
