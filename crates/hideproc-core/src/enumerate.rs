//! The enumeration primitive and how code reaches it.
//!
//! `FindGePid` is the shape of the intercepted function: "next allocated
//! pid at or above `nr`". Both the host's real body and the replacement
//! filter have this shape.
//!
//! `CallGate` is how code calls *by address*. Calls made through the gate
//! pass through the host's redirect machinery, and the host records the
//! calling code address so thunks can see who is calling.

use std::sync::Arc;

use crate::error::Result;
use crate::pid::Pid;
use crate::symbol::{SymbolAddr, TextRange};

/// "Find the first allocated pid `>= nr`". `None` means exhausted.
pub trait FindGePid: Send + Sync {
    fn find_ge_pid(&self, nr: Pid) -> Option<Pid>;
}

/// Call enumeration-shaped code by address.
///
/// **Contract:**
/// - The call is traced exactly like any other call to `target`: registered
///   ops filtering `target` see it.
/// - `parent_ip` for the traced call is the address of the code currently
///   executing on this thread (`SymbolAddr::USER` when none).
/// - A `target` with no code behind it behaves as exhausted.
pub trait CallGate: Send + Sync {
    fn call(&self, target: SymbolAddr, nr: Pid) -> Option<Pid>;
}

/// Text placed into the host by `ModuleLoader::load_module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedText {
    /// Full range occupied by the module.
    pub range: TextRange,
    /// Address of the loaded entry function.
    pub entry: SymbolAddr,
}

/// Places replacement code into host text.
pub trait ModuleLoader: Send + Sync {
    fn load_module(&self, name: &str, entry: Arc<dyn FindGePid>) -> Result<LoadedText>;

    /// Release the range. Calls still landing in it behave as exhausted.
    fn unload_module(&self, range: TextRange);
}
