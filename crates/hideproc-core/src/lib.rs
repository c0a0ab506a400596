//! # hideproc-core: Trait definitions for hideproc
//!
//! hideproc makes selected pids invisible to every caller of the host's
//! "next pid at or above N" enumeration primitive, without touching those
//! callers. This crate defines the host surface that mechanism runs
//! against; it contains no policy.
//!
//! ## Host surface
//!
//! | Trait          | Models                                   |
//! |----------------|------------------------------------------|
//! | `SymbolTable`  | live symbol lookup (kallsyms)            |
//! | `RedirectHost` | ftrace-style ops registration + filters  |
//! | `CallGate`     | calling code by address, with caller ip  |
//! | `ModuleLoader` | placing replacement code into host text  |
//! | `FindGePid`    | the enumeration primitive's shape        |
//!
//! `Host` bundles the first four. Default implementations, including an
//! in-memory host, live in `hideproc-module`.
//!
//! ## Modules
//!
//! - `pid` - process identifier type
//! - `symbol` - code addresses, text ranges, symbol lookup
//! - `redirect` - trace ops, thunks, redirect registration
//! - `enumerate` - enumeration primitive, call gate, module text
//! - `host` - umbrella trait
//! - `error` - error types
//! - `kprint` - printk-style logging macros
//! - `env` - environment variable utilities

pub mod pid;
pub mod symbol;
pub mod redirect;
pub mod enumerate;
pub mod host;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use pid::Pid;
pub use symbol::{SymbolAddr, SymbolTable, TextRange};
pub use redirect::{CallSite, OpsFlags, Redirect, RedirectHost, TraceOps, TraceThunk};
pub use enumerate::{CallGate, FindGePid, LoadedText, ModuleLoader};
pub use host::Host;
pub use error::{ErrorCategory, HideError, Result};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
