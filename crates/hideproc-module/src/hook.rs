//! Interception engine: `HookDescriptor` install/remove.
//!
//! Installing a hook:
//!
//! ```text
//! 1. resolve   target_name ──SymbolTable──▶ address
//! 2. publish   address ──▶ OriginalSlot        (filter can reach original)
//! 3. filter    set_filter(ops, target_name)
//! 4. register  register_ops(ops)               (redirect goes live)
//! ```
//!
//! Any failure after step 2 unwinds what was done before it, so callers of
//! the target never observe a half-installed hook. Removal runs
//! unregister -> drop filter ip -> clear slot, logging (not propagating
//! past the return value) each failure.
//!
//! The thunk redirects every call to the replacement except self calls,
//! as decided by `SelfCallGuard`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hideproc_core::error::{HideError, Result};
use hideproc_core::host::Host;
use hideproc_core::redirect::{CallSite, OpsFlags, Redirect, RedirectHost, TraceOps, TraceThunk};
use hideproc_core::symbol::{SymbolAddr, SymbolTable};
use hideproc_core::{kdebug, kerror, kinfo, kwarn};

use crate::guard::SelfCallGuard;

/// Flags every hideproc trace ops is registered with.
pub const HOOK_OPS_FLAGS: OpsFlags = OpsFlags::SAVE_REGS
    .union(OpsFlags::RECURSION)
    .union(OpsFlags::IPMODIFY);

// ── Original slot ──

/// Where the real function's address lives while the hook is installed.
///
/// Lock-free: read on every filtered call. `0` means empty.
#[derive(Debug, Default)]
pub struct OriginalSlot(AtomicUsize);

impl OriginalSlot {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    #[inline]
    pub fn load(&self) -> Option<SymbolAddr> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            addr => Some(SymbolAddr(addr)),
        }
    }

    #[inline]
    pub fn store(&self, addr: SymbolAddr) {
        self.0.store(addr.0, Ordering::Release);
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

// ── Thunk ──

/// `hook_ftrace_thunk`: redirect to `func` unless the caller is us.
pub struct RedirectThunk {
    func: SymbolAddr,
    guard: SelfCallGuard,
}

impl RedirectThunk {
    pub fn new(func: SymbolAddr, guard: SelfCallGuard) -> Self {
        Self { func, guard }
    }
}

impl TraceThunk for RedirectThunk {
    #[inline]
    fn on_call(&self, site: &CallSite) -> Redirect {
        if self.guard.is_self_call(site) {
            Redirect::Proceed
        } else {
            Redirect::To(self.func)
        }
    }
}

// ── Descriptor ──

/// One interception of one named function.
///
/// Either fully installed (resolved address known, ops registered) or
/// fully uninstalled; `install`/`remove` never leave anything in between.
#[derive(Debug)]
pub struct HookDescriptor {
    target_name: String,
    replacement: SymbolAddr,
    guard: SelfCallGuard,
    original: Arc<OriginalSlot>,
    resolved: Option<SymbolAddr>,
    ops: Option<Arc<TraceOps>>,
}

impl HookDescriptor {
    pub fn new(
        target_name: impl Into<String>,
        replacement: SymbolAddr,
        original: Arc<OriginalSlot>,
        guard: SelfCallGuard,
    ) -> Self {
        Self {
            target_name: target_name.into(),
            replacement,
            guard,
            original,
            resolved: None,
            ops: None,
        }
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn replacement(&self) -> SymbolAddr {
        self.replacement
    }

    pub fn resolved_address(&self) -> Option<SymbolAddr> {
        self.resolved
    }

    pub fn original(&self) -> &Arc<OriginalSlot> {
        &self.original
    }

    pub fn is_installed(&self) -> bool {
        self.ops.is_some()
    }

    /// `hook_resolve_addr`: look the target up in the live symbol table.
    pub fn resolve<S: SymbolTable + ?Sized>(&self, symbols: &S) -> Result<SymbolAddr> {
        match symbols.lookup(&self.target_name) {
            Some(addr) => {
                kinfo!("resolved symbol: {} {}", self.target_name, addr);
                Ok(addr)
            }
            None => {
                kerror!("unresolved symbol: {}", self.target_name);
                Err(HideError::Unresolved(self.target_name.clone()))
            }
        }
    }

    pub fn install<H: Host + ?Sized>(&mut self, host: &H) -> Result<()> {
        if self.is_installed() {
            kwarn!("hook on {} already installed", self.target_name);
            return Err(HideError::AlreadyInstalled);
        }

        let address = self.resolve(host)?;
        self.original.store(address);

        let thunk = Arc::new(RedirectThunk::new(self.replacement, self.guard));
        let ops = Arc::new(TraceOps::new(thunk, HOOK_OPS_FLAGS));

        if let Err(e) = host.set_filter(&ops, &self.target_name) {
            kerror!("set filter failed: {}", e);
            self.original.clear();
            return Err(e);
        }

        if let Err(e) = host.register_ops(ops.clone()) {
            kerror!("register ops failed: {}", e);
            if let Err(undo) = host.set_filter_ip(&ops, address, true) {
                kerror!("undo filter after failed register: {}", undo);
            }
            self.original.clear();
            return Err(e);
        }

        kinfo!(
            "hooked {} at {} -> {}",
            self.target_name,
            address,
            self.replacement
        );
        self.resolved = Some(address);
        self.ops = Some(ops);
        Ok(())
    }

    /// Best-effort teardown. Every step runs; the first failure is returned
    /// for reporting and the descriptor ends up uninstalled regardless.
    pub fn remove<R: RedirectHost + ?Sized>(&mut self, host: &R) -> Result<()> {
        let Some(ops) = self.ops.take() else {
            kwarn!("remove: hook on {} not installed", self.target_name);
            return Err(HideError::NotInstalled);
        };
        let address = self.resolved.take();
        let mut first_err = None;

        if let Err(e) = host.unregister_ops(&ops) {
            kerror!("unregister ops failed: {}", e);
            first_err = Some(e);
        }
        if let Some(addr) = address {
            if let Err(e) = host.set_filter_ip(&ops, addr, true) {
                kerror!("clear filter ip failed: {}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        self.original.clear();
        kdebug!("unhooked {}", self.target_name);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for HookDescriptor {
    fn drop(&mut self) {
        if self.is_installed() {
            // The host still holds the ops, so the thunk stays valid.
            kwarn!("hook on {} dropped while installed", self.target_name);
        }
    }
}
