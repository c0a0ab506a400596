//! The full host surface the core consumes.

use crate::enumerate::{CallGate, ModuleLoader};
use crate::redirect::RedirectHost;
use crate::symbol::SymbolTable;

/// Everything the interception engine needs from its host: symbol lookup,
/// call redirection, calls by address, and somewhere to put its own code.
pub trait Host: SymbolTable + RedirectHost + CallGate + ModuleLoader {}

impl<T> Host for T where T: SymbolTable + RedirectHost + CallGate + ModuleLoader {}
