//! Environment variable helpers
//!
//! ```ignore
//! use hideproc_core::env::{env_get, env_get_bool, env_get_str};
//!
//! let max_write: usize = env_get("HIDEPROC_MAX_WRITE", 1024);
//! let dump = env_get_bool("HIDEPROC_DUMP_INPUT", false);
//! let target = env_get_str("HIDEPROC_TARGET_SYMBOL", "find_ge_pid");
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` only when `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" are true, "0", "false", "no",
/// "off" are false (case-insensitive). Anything else, or unset, is `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Non-empty string value, or `default`.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns distinct variable names; the process environment is shared.

    #[test]
    fn get_parses_or_defaults() {
        std::env::set_var("HIDEPROC_TEST_ENV_NUM", " 42 ");
        std::env::set_var("HIDEPROC_TEST_ENV_BAD", "forty-two");
        assert_eq!(env_get::<usize>("HIDEPROC_TEST_ENV_NUM", 7), 42);
        assert_eq!(env_get::<usize>("HIDEPROC_TEST_ENV_BAD", 7), 7);
        assert_eq!(env_get::<usize>("HIDEPROC_TEST_ENV_UNSET", 7), 7);
        assert_eq!(env_get_opt::<usize>("HIDEPROC_TEST_ENV_UNSET"), None);
    }

    #[test]
    fn bool_values() {
        std::env::set_var("HIDEPROC_TEST_ENV_ON", "Yes");
        std::env::set_var("HIDEPROC_TEST_ENV_OFF", "off");
        std::env::set_var("HIDEPROC_TEST_ENV_ODD", "maybe");
        assert!(env_get_bool("HIDEPROC_TEST_ENV_ON", false));
        assert!(!env_get_bool("HIDEPROC_TEST_ENV_OFF", true));
        assert!(env_get_bool("HIDEPROC_TEST_ENV_ODD", true));
        assert!(!env_get_bool("HIDEPROC_TEST_ENV_BOOL_UNSET", false));
    }

    #[test]
    fn str_values() {
        std::env::set_var("HIDEPROC_TEST_ENV_STR", "next_tgid");
        std::env::set_var("HIDEPROC_TEST_ENV_BLANK", "  ");
        assert_eq!(env_get_str("HIDEPROC_TEST_ENV_STR", "x"), "next_tgid");
        assert_eq!(env_get_str("HIDEPROC_TEST_ENV_BLANK", "x"), "x");
    }
}
