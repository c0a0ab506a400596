//! Symbol resolution abstraction.
//!
//! A `SymbolTable` maps a function name to its current runtime address,
//! the way `kallsyms_lookup_name` does for kernel text.

use core::fmt;

/// A code address in host text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SymbolAddr(pub usize);

impl SymbolAddr {
    /// Address used as `parent_ip` for calls that come from outside any
    /// host text (no frame on the call stack).
    pub const USER: SymbolAddr = SymbolAddr(0);

    #[inline]
    pub const fn offset(self, off: usize) -> SymbolAddr {
        SymbolAddr(self.0 + off)
    }
}

impl fmt::Display for SymbolAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Live symbol-table lookup.
///
/// **Contract:**
/// - Pure lookup, no side effects.
/// - `None` means the name has no entry ("unresolved symbol").
pub trait SymbolTable: Send + Sync {
    fn lookup(&self, name: &str) -> Option<SymbolAddr>;
}

/// A half-open `[start, end)` range of host text, e.g. a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: SymbolAddr,
    pub end: SymbolAddr,
}

impl TextRange {
    #[inline]
    pub fn contains(&self, addr: SymbolAddr) -> bool {
        self.start <= addr && addr < self.end
    }
}
