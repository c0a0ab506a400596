//! Call-redirection abstraction.
//!
//! Modeled on ftrace ops: a `TraceOps` carries a thunk and a filter (the
//! set of traced function addresses). Once registered with a
//! `RedirectHost`, every call to a filtered address first runs the thunk,
//! which may send control somewhere else.
//!
//! ```text
//!   caller ──call──▶ target ─┐
//!                            │  host consults registered ops
//!                            ▼
//!                  thunk(CallSite { ip, parent_ip })
//!                     │                      │
//!            Redirect::Proceed        Redirect::To(func)
//!                     ▼                      ▼
//!               target body           replacement body
//! ```
//!
//! # Implementors
//!
//! - `MemHost` (hideproc-module): in-memory host used by tests and the
//!   smoke binary.

use std::collections::BTreeSet;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::symbol::SymbolAddr;

// ── Ops flags ──

/// Trace ops flags (subset of `FTRACE_OPS_FL_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpsFlags(u32);

impl OpsFlags {
    pub const NONE: Self = Self(0);
    /// Thunk receives the full call site.
    pub const SAVE_REGS: Self = Self(1 << 0);
    /// Host suppresses recursion into the same ops.
    pub const RECURSION: Self = Self(1 << 1);
    /// Thunk may rewrite the instruction pointer (redirect).
    pub const IPMODIFY: Self = Self(1 << 2);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for OpsFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ── Call site / decision ──

/// What the thunk gets to see about an intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Address of the traced function being entered.
    pub ip: SymbolAddr,
    /// Address of the code that made the call.
    pub parent_ip: SymbolAddr,
}

/// Thunk verdict for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirect {
    /// Run the traced function normally.
    Proceed,
    /// Resume execution at this address instead.
    To(SymbolAddr),
}

/// Runs on entry to every traced function.
///
/// **Contract:**
/// - Must not block and must not call back into traced functions.
/// - Called concurrently from any thread that calls the target.
pub trait TraceThunk: Send + Sync {
    fn on_call(&self, site: &CallSite) -> Redirect;
}

// ── Ops record ──

static NEXT_OPS_ID: AtomicU64 = AtomicU64::new(1);

/// One trace registration: a thunk plus the addresses it filters on.
///
/// Shared (`Arc`) between the owner and the host for as long as it is
/// registered, so the thunk can never dangle.
pub struct TraceOps {
    id: u64,
    flags: OpsFlags,
    thunk: Arc<dyn TraceThunk>,
    filter: Mutex<BTreeSet<SymbolAddr>>,
}

impl TraceOps {
    pub fn new(thunk: Arc<dyn TraceThunk>, flags: OpsFlags) -> Self {
        Self {
            id: NEXT_OPS_ID.fetch_add(1, Ordering::Relaxed),
            flags,
            thunk,
            filter: Mutex::new(BTreeSet::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn flags(&self) -> OpsFlags {
        self.flags
    }

    #[inline]
    pub fn thunk(&self) -> &Arc<dyn TraceThunk> {
        &self.thunk
    }

    /// Add `addr` to the filter. Returns false if it was already present.
    pub fn filter_add(&self, addr: SymbolAddr) -> bool {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr)
    }

    /// Drop `addr` from the filter. Returns false if it was not present.
    pub fn filter_remove(&self, addr: SymbolAddr) -> bool {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&addr)
    }

    pub fn filters(&self, addr: SymbolAddr) -> bool {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&addr)
    }

    pub fn filter_snapshot(&self) -> Vec<SymbolAddr> {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}

impl std::fmt::Debug for TraceOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceOps")
            .field("id", &self.id)
            .field("flags", &self.flags)
            .field("filter", &self.filter_snapshot())
            .finish()
    }
}

// ── Host primitive ──

/// Call-redirection registration, keyed by ops.
///
/// **Contract:**
/// - `set_filter` resolves `name` itself and adds the address to the
///   ops filter. Fails with `HideError::Filter` when nothing matches.
/// - `register_ops` makes the ops live. The host quiesces callers around
///   (de)registration, so a call either sees the ops or does not.
/// - Only `IPMODIFY` ops may redirect, and at most one `IPMODIFY` ops may
///   filter a given address.
/// - A `RECURSION` ops is not re-entered: while its thunk runs on a thread,
///   traced calls made from that thread skip it and run the target body.
pub trait RedirectHost: Send + Sync {
    fn set_filter(&self, ops: &TraceOps, name: &str) -> Result<()>;

    /// Add (`remove == false`) or drop (`remove == true`) one address.
    fn set_filter_ip(&self, ops: &TraceOps, addr: SymbolAddr, remove: bool) -> Result<()>;

    fn register_ops(&self, ops: Arc<TraceOps>) -> Result<()>;

    fn unregister_ops(&self, ops: &TraceOps) -> Result<()>;
}
