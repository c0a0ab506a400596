//! Self-call guard for the redirect thunk.
//!
//! The filter has to call the original enumeration function, and that call
//! is traced like any other. If the thunk redirected it, the filter would
//! re-enter itself forever. The guard answers one question for the thunk:
//! "is this call coming from inside hideproc?"
//!
//! Two forms:
//!
//! - `SelfCallGuard::ModuleRange`: inspects the caller address and checks
//!   it against our loaded text range (`within_module(parent_ip)`).
//! - `SelfCallGuard::Reentry`: a per-thread depth counter that the filter
//!   raises for exactly the span of its calls to the original
//!   (`ReentryScope`). Does not depend on the host reporting caller
//!   addresses. Default.
//!
//! The filter always enters a `ReentryScope` and always calls from its own
//! text, so either guard can be paired with it.

use std::cell::Cell;

use hideproc_core::redirect::CallSite;
use hideproc_core::symbol::TextRange;

thread_local! {
    /// Nesting depth of filter -> original calls on this thread.
    static REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII marker: "this thread is inside the filter, calling the original".
pub struct ReentryScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ReentryScope {
    #[inline]
    pub fn enter() -> Self {
        REENTRY_DEPTH.with(|d| d.set(d.get() + 1));
        ReentryScope {
            _not_send: std::marker::PhantomData,
        }
    }

    #[inline]
    pub fn active() -> bool {
        REENTRY_DEPTH.with(|d| d.get() > 0)
    }
}

impl Drop for ReentryScope {
    #[inline]
    fn drop(&mut self) {
        REENTRY_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfCallGuard {
    ModuleRange(TextRange),
    Reentry,
}

impl SelfCallGuard {
    /// True when the call must reach the real target, not the replacement.
    #[inline]
    pub fn is_self_call(&self, site: &CallSite) -> bool {
        match self {
            SelfCallGuard::ModuleRange(range) => range.contains(site.parent_ip),
            SelfCallGuard::Reentry => ReentryScope::active(),
        }
    }
}

/// Which guard to build, before the module range is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardKind {
    ModuleRange,
    #[default]
    Reentry,
}

impl GuardKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "module-range" | "module_range" | "range" => Some(GuardKind::ModuleRange),
            "reentry" | "flag" => Some(GuardKind::Reentry),
            _ => None,
        }
    }

    pub fn build(self, text: TextRange) -> SelfCallGuard {
        match self {
            GuardKind::ModuleRange => SelfCallGuard::ModuleRange(text),
            GuardKind::Reentry => SelfCallGuard::Reentry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hideproc_core::symbol::SymbolAddr;

    const TEXT: TextRange = TextRange {
        start: SymbolAddr(0xc000_0000),
        end: SymbolAddr(0xc000_1000),
    };

    fn site(parent: usize) -> CallSite {
        CallSite {
            ip: SymbolAddr(0x8100_0000),
            parent_ip: SymbolAddr(parent),
        }
    }

    #[test]
    fn module_range_checks_caller() {
        let g = SelfCallGuard::ModuleRange(TEXT);
        assert!(g.is_self_call(&site(0xc000_0010)));
        assert!(!g.is_self_call(&site(0x8200_0000)));
        assert!(!g.is_self_call(&site(0)));
    }

    #[test]
    fn reentry_scope_nests() {
        let g = SelfCallGuard::Reentry;
        assert!(!g.is_self_call(&site(0)));
        {
            let _outer = ReentryScope::enter();
            assert!(g.is_self_call(&site(0)));
            {
                let _inner = ReentryScope::enter();
                assert!(g.is_self_call(&site(0)));
            }
            assert!(g.is_self_call(&site(0)));
        }
        assert!(!g.is_self_call(&site(0)));
    }

    #[test]
    fn reentry_is_per_thread() {
        let _scope = ReentryScope::enter();
        assert!(ReentryScope::active());
        let other = std::thread::spawn(ReentryScope::active).join().unwrap();
        assert!(!other);
    }

    #[test]
    fn kind_parse_and_build() {
        assert_eq!(GuardKind::parse("module-range"), Some(GuardKind::ModuleRange));
        assert_eq!(GuardKind::parse("Reentry"), Some(GuardKind::Reentry));
        assert_eq!(GuardKind::parse("nope"), None);
        assert_eq!(GuardKind::default(), GuardKind::Reentry);
        assert_eq!(GuardKind::ModuleRange.build(TEXT), SelfCallGuard::ModuleRange(TEXT));
        assert_eq!(GuardKind::Reentry.build(TEXT), SelfCallGuard::Reentry);
    }
}
