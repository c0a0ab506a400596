//! hideproc configuration
//!
//! Compile-time defaults (`defaults`) with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use hideproc_module::config::HideConfig;
//! use hideproc_module::guard::GuardKind;
//!
//! // Defaults with env overrides
//! let config = HideConfig::from_env();
//!
//! // Or customize programmatically
//! let config = HideConfig::new()
//!     .max_write(256)
//!     .guard(GuardKind::ModuleRange);
//! ```

pub mod defaults;

use hideproc_core::env::{env_get, env_get_bool, env_get_str};
use hideproc_core::error::{HideError, Result};
use hideproc_core::kwarn;

use crate::guard::GuardKind;
use crate::protocol::MIN_WRITE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HideConfig {
    /// Symbol the hook intercepts
    pub target_symbol: String,
    /// Control channel name
    pub device_name: String,
    /// Exclusive upper bound on a single control write
    pub max_write: usize,
    /// Hex-dump control writes at debug level
    pub dump_input: bool,
    /// How the redirect thunk recognizes the filter's own calls
    pub guard: GuardKind,
    /// Abort startup when install fails
    pub require_hook: bool,
}

impl Default for HideConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl HideConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `HIDEPROC_TARGET_SYMBOL` - symbol to intercept
    /// - `HIDEPROC_DEVICE_NAME` - control channel name
    /// - `HIDEPROC_MAX_WRITE` - write size limit in bytes
    /// - `HIDEPROC_DUMP_INPUT` - hex-dump writes (0/1)
    /// - `HIDEPROC_GUARD` - `reentry` or `module-range`
    /// - `HIDEPROC_REQUIRE_HOOK` - fail startup without a hook (0/1)
    pub fn from_env() -> Self {
        let guard_name = env_get_str("HIDEPROC_GUARD", defaults::GUARD);
        let guard = GuardKind::parse(&guard_name).unwrap_or_else(|| {
            kwarn!("HIDEPROC_GUARD={} not recognized, using {}", guard_name, defaults::GUARD);
            GuardKind::default()
        });

        Self {
            target_symbol: env_get_str("HIDEPROC_TARGET_SYMBOL", defaults::TARGET_SYMBOL),
            device_name: env_get_str("HIDEPROC_DEVICE_NAME", defaults::DEVICE_NAME),
            max_write: env_get("HIDEPROC_MAX_WRITE", defaults::MAX_WRITE),
            dump_input: env_get_bool("HIDEPROC_DUMP_INPUT", defaults::DUMP_INPUT),
            guard,
            require_hook: env_get_bool("HIDEPROC_REQUIRE_HOOK", defaults::REQUIRE_HOOK),
        }
    }

    /// Defaults only, no environment.
    pub fn new() -> Self {
        Self {
            target_symbol: defaults::TARGET_SYMBOL.to_string(),
            device_name: defaults::DEVICE_NAME.to_string(),
            max_write: defaults::MAX_WRITE,
            dump_input: defaults::DUMP_INPUT,
            guard: GuardKind::default(),
            require_hook: defaults::REQUIRE_HOOK,
        }
    }

    // Builder methods

    pub fn target_symbol(mut self, name: impl Into<String>) -> Self {
        self.target_symbol = name.into();
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn max_write(mut self, n: usize) -> Self {
        self.max_write = n;
        self
    }

    pub fn dump_input(mut self, enable: bool) -> Self {
        self.dump_input = enable;
        self
    }

    pub fn guard(mut self, kind: GuardKind) -> Self {
        self.guard = kind;
        self
    }

    pub fn require_hook(mut self, require: bool) -> Self {
        self.require_hook = require;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_symbol.is_empty() {
            return Err(HideError::Config("target_symbol must not be empty"));
        }
        if self.device_name.is_empty() {
            return Err(HideError::Config("device_name must not be empty"));
        }
        // A limit at or below the minimum would reject every write.
        if self.max_write <= MIN_WRITE {
            return Err(HideError::Config("max_write must be > 3"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("hideproc configuration:");
        eprintln!("  target_symbol:  {}", self.target_symbol);
        eprintln!("  device_name:    {}", self.device_name);
        eprintln!("  max_write:      {}", self.max_write);
        eprintln!("  dump_input:     {}", self.dump_input);
        eprintln!("  guard:          {:?}", self.guard);
        eprintln!("  require_hook:   {}", self.require_hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HideConfig::new();
        assert_eq!(config.target_symbol, "find_ge_pid");
        assert_eq!(config.device_name, "hideproc");
        assert_eq!(config.max_write, 1024);
        assert!(!config.dump_input);
        assert_eq!(config.guard, GuardKind::Reentry);
        assert!(config.require_hook);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env() {
        let config = HideConfig::from_env();
        assert!(!config.target_symbol.is_empty());
        assert!(config.max_write > 0);
    }

    #[test]
    fn test_builder() {
        let config = HideConfig::new()
            .target_symbol("next_tgid")
            .max_write(64)
            .guard(GuardKind::ModuleRange)
            .require_hook(false);

        assert_eq!(config.target_symbol, "next_tgid");
        assert_eq!(config.max_write, 64);
        assert_eq!(config.guard, GuardKind::ModuleRange);
        assert!(!config.require_hook);
    }

    #[test]
    fn test_validation() {
        assert!(HideConfig::new().max_write(3).validate().is_err());
        assert!(HideConfig::new().max_write(4).validate().is_ok());
        assert!(HideConfig::new().target_symbol("").validate().is_err());
        let err = HideConfig::new().device_name("").validate().unwrap_err();
        assert_eq!(err, HideError::Config("device_name must not be empty"));
    }
}
