//! `MemHost`: in-memory `Host` implementation.
//!
//! Stands in for the kernel: a live pid table with a real `find_ge_pid`
//! body, a symbol table, loadable module text, ftrace-style ops
//! registration and a per-thread call stack that supplies `parent_ip`.
//!
//! ```text
//!  enumerate_from(caller, nr)
//!        │ push frame(caller)
//!        ▼
//!  call(find_ge_pid, nr) ── ops filtering find_ge_pid? ── thunk ──┐
//!        │                                                        │
//!        ▼ Proceed                                   To(entry)    ▼
//!  pid table range(nr..)                        module code at entry
//!                                                 │ push frame(entry)
//!                                                 ▼
//!                                        call(find_ge_pid, ..) again
//! ```
//!
//! Registration rules follow ftrace: an ops needs a non-empty filter, only
//! `IPMODIFY` ops can redirect, and two `IPMODIFY` ops cannot share an
//! address (`EBUSY`). A `RECURSION` ops is skipped while its own thunk is
//! already running on the calling thread. `fail_next` injects one failure
//! into a chosen primitive.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use nix::errno::Errno;

use hideproc_core::enumerate::{CallGate, FindGePid, LoadedText, ModuleLoader};
use hideproc_core::error::{HideError, Result};
use hideproc_core::pid::Pid;
use hideproc_core::redirect::{CallSite, OpsFlags, Redirect, RedirectHost, TraceOps};
use hideproc_core::symbol::{SymbolAddr, SymbolTable, TextRange};
use hideproc_core::{kdebug, kinfo, ktrace, kwarn};

// ── Address layout ──

pub mod addr {
    use hideproc_core::symbol::SymbolAddr;

    /// Core kernel text.
    pub const KERNEL_TEXT: usize = 0xffff_ffff_8100_0000;
    pub const FIND_GE_PID: SymbolAddr = SymbolAddr(KERNEL_TEXT + 0x000d_c310);
    /// `/proc` readdir path: the usual caller of `find_ge_pid`.
    pub const NEXT_TGID: SymbolAddr = SymbolAddr(KERNEL_TEXT + 0x0035_2a40);
    pub const PROC_PID_READDIR: SymbolAddr = SymbolAddr(KERNEL_TEXT + 0x0035_2c90);
    pub const SCHEDULE: SymbolAddr = SymbolAddr(KERNEL_TEXT + 0x00f1_0a20);

    /// Module text area. Each loaded module gets one `MODULE_TEXT_SIZE` slab.
    pub const MODULE_BASE: usize = 0xffff_ffff_c000_0000;
    pub const MODULE_TEXT_SIZE: usize = 0x1000;
    pub const MODULE_ENTRY_OFFSET: usize = 0x10;
}

/// Host primitive a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    SetFilter,
    SetFilterIp,
    RegisterOps,
    UnregisterOps,
    LoadModule,
}

struct ModuleText {
    name: String,
    text: LoadedText,
    code: Arc<dyn FindGePid>,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Default)]
pub struct HostStats {
    /// Calls that went through `CallGate::call`.
    pub calls: AtomicU64,
    /// Calls a thunk sent somewhere else.
    pub redirects: AtomicU64,
}

thread_local! {
    /// Addresses of host code currently executing on this thread.
    static FRAMES: RefCell<Vec<SymbolAddr>> = const { RefCell::new(Vec::new()) };
    /// Ids of ops whose thunk is running on this thread.
    static IN_THUNK: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// One call-stack frame; popped on drop.
struct Frame;

impl Frame {
    fn enter(addr: SymbolAddr) -> Self {
        FRAMES.with(|f| f.borrow_mut().push(addr));
        Frame
    }

    fn current() -> Option<SymbolAddr> {
        FRAMES.with(|f| f.borrow().last().copied())
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        FRAMES.with(|f| {
            f.borrow_mut().pop();
        });
    }
}

/// Marks one ops thunk as running on this thread; cleared on drop.
struct ThunkScope;

impl ThunkScope {
    /// `None` if a `RECURSION` ops is already inside its thunk here.
    fn enter(ops: &TraceOps) -> Option<Self> {
        IN_THUNK.with(|t| {
            let mut t = t.borrow_mut();
            if ops.flags().contains(OpsFlags::RECURSION) && t.contains(&ops.id()) {
                return None;
            }
            t.push(ops.id());
            Some(ThunkScope)
        })
    }
}

impl Drop for ThunkScope {
    fn drop(&mut self) {
        IN_THUNK.with(|t| {
            t.borrow_mut().pop();
        });
    }
}

pub struct MemHost {
    pids: RwLock<BTreeSet<Pid>>,
    symbols: RwLock<BTreeMap<String, SymbolAddr>>,
    modules: RwLock<Vec<ModuleText>>,
    next_module_base: AtomicUsize,
    ops: RwLock<Vec<Arc<TraceOps>>>,
    faults: Mutex<Vec<(HostOp, Errno)>>,
    stats: HostStats,
}

impl MemHost {
    /// Empty pid table, kernel symbols seeded.
    pub fn new() -> Self {
        let symbols = [
            ("find_ge_pid", addr::FIND_GE_PID),
            ("next_tgid", addr::NEXT_TGID),
            ("proc_pid_readdir", addr::PROC_PID_READDIR),
            ("schedule", addr::SCHEDULE),
        ]
        .into_iter()
        .map(|(n, a)| (n.to_string(), a))
        .collect();

        Self {
            pids: RwLock::new(BTreeSet::new()),
            symbols: RwLock::new(symbols),
            modules: RwLock::new(Vec::new()),
            next_module_base: AtomicUsize::new(addr::MODULE_BASE),
            ops: RwLock::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            stats: HostStats::default(),
        }
    }

    pub fn with_pids<I>(pids: I) -> Self
    where
        I: IntoIterator<Item = libc::pid_t>,
    {
        let host = Self::new();
        for p in pids {
            host.spawn(Pid::new(p));
        }
        host
    }

    // ── Pid table ──

    /// Allocate `pid`. Negative pids are never allocated.
    pub fn spawn(&self, pid: Pid) -> bool {
        if pid.as_raw() < 0 {
            return false;
        }
        self.pids.write().unwrap_or_else(PoisonError::into_inner).insert(pid)
    }

    pub fn exit(&self, pid: Pid) -> bool {
        self.pids.write().unwrap_or_else(PoisonError::into_inner).remove(&pid)
    }

    /// The unfiltered truth, bypassing every hook.
    pub fn live_pids(&self) -> Vec<Pid> {
        self.pids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    // ── Symbols ──

    pub fn add_symbol(&self, name: &str, at: SymbolAddr) {
        self.symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), at);
    }

    pub fn remove_symbol(&self, name: &str) -> Option<SymbolAddr> {
        self.symbols
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    // ── Callers ──

    /// Call `find_ge_pid(nr)` as code at `caller` would.
    pub fn enumerate_from(&self, caller: SymbolAddr, nr: Pid) -> Option<Pid> {
        let _frame = Frame::enter(caller);
        self.call(addr::FIND_GE_PID, nr)
    }

    /// Walk every visible pid upward from 1, as `/proc` readdir does.
    pub fn proc_walk(&self) -> Vec<Pid> {
        let mut seen = Vec::new();
        let mut nr = Pid::INIT;
        while let Some(pid) = self.enumerate_from(addr::NEXT_TGID, nr) {
            seen.push(pid);
            match pid.next() {
                Some(next) => nr = next,
                None => break,
            }
        }
        seen
    }

    // ── Diagnostics / fault injection ──

    /// Make the next call to `op` fail with `errno`.
    pub fn fail_next(&self, op: HostOp, errno: Errno) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((op, errno));
    }

    fn take_fault(&self, op: HostOp) -> Option<Errno> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let idx = faults.iter().position(|(o, _)| *o == op)?;
        Some(faults.remove(idx).1)
    }

    pub fn registered_ops(&self) -> usize {
        self.ops.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    // ── Internals ──

    /// Run registered thunks for `site`; first redirect wins.
    fn trace(&self, site: &CallSite) -> SymbolAddr {
        // Clone out so thunks run without the ops lock held.
        let active: Vec<Arc<TraceOps>> = self
            .ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|o| o.filters(site.ip))
            .cloned()
            .collect();

        for ops in active {
            let Some(_scope) = ThunkScope::enter(&ops) else {
                ktrace!("ops {} recursion at {}, skipped", ops.id(), site.ip);
                continue;
            };
            if let Redirect::To(dest) = ops.thunk().on_call(site) {
                if ops.flags().contains(OpsFlags::IPMODIFY) {
                    self.stats.redirects.fetch_add(1, Ordering::Relaxed);
                    return dest;
                }
            }
        }
        site.ip
    }

    fn execute(&self, at: SymbolAddr, nr: Pid) -> Option<Pid> {
        let _frame = Frame::enter(at);
        if at == addr::FIND_GE_PID {
            return self
                .pids
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .range(nr..)
                .next()
                .copied();
        }

        let code = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.text.entry == at)
            .map(|m| m.code.clone());
        match code {
            Some(code) => code.find_ge_pid(nr),
            None => {
                kwarn!("call into unmapped text {}", at);
                None
            }
        }
    }
}

impl Default for MemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable for MemHost {
    fn lookup(&self, name: &str) -> Option<SymbolAddr> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

impl CallGate for MemHost {
    fn call(&self, target: SymbolAddr, nr: Pid) -> Option<Pid> {
        self.stats.calls.fetch_add(1, Ordering::Relaxed);
        let site = CallSite {
            ip: target,
            parent_ip: Frame::current().unwrap_or(SymbolAddr::USER),
        };
        let dest = self.trace(&site);
        self.execute(dest, nr)
    }
}

impl RedirectHost for MemHost {
    fn set_filter(&self, ops: &TraceOps, name: &str) -> Result<()> {
        if let Some(errno) = self.take_fault(HostOp::SetFilter) {
            return Err(HideError::Filter {
                symbol: name.to_string(),
                errno,
            });
        }
        let at = self.lookup(name).ok_or_else(|| HideError::Filter {
            symbol: name.to_string(),
            errno: Errno::EINVAL,
        })?;
        ops.filter_add(at);
        kdebug!("ops {} filters {} ({})", ops.id(), name, at);
        Ok(())
    }

    fn set_filter_ip(&self, ops: &TraceOps, at: SymbolAddr, remove: bool) -> Result<()> {
        if let Some(errno) = self.take_fault(HostOp::SetFilterIp) {
            return Err(if remove {
                HideError::ClearFilter(errno)
            } else {
                HideError::Filter {
                    symbol: at.to_string(),
                    errno,
                }
            });
        }
        if remove {
            if !ops.filter_remove(at) {
                return Err(HideError::ClearFilter(Errno::ENOENT));
            }
        } else {
            ops.filter_add(at);
        }
        Ok(())
    }

    fn register_ops(&self, ops: Arc<TraceOps>) -> Result<()> {
        if let Some(errno) = self.take_fault(HostOp::RegisterOps) {
            return Err(HideError::Register(errno));
        }
        let wanted = ops.filter_snapshot();
        if wanted.is_empty() {
            return Err(HideError::Register(Errno::EINVAL));
        }

        let mut active = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        if active.iter().any(|o| o.id() == ops.id()) {
            return Err(HideError::Register(Errno::EBUSY));
        }
        if ops.flags().contains(OpsFlags::IPMODIFY) {
            let clash = active.iter().any(|o| {
                o.flags().contains(OpsFlags::IPMODIFY) && wanted.iter().any(|&a| o.filters(a))
            });
            if clash {
                return Err(HideError::Register(Errno::EBUSY));
            }
        }
        kdebug!("register ops {} on {:?}", ops.id(), wanted);
        active.push(ops);
        Ok(())
    }

    fn unregister_ops(&self, ops: &TraceOps) -> Result<()> {
        if let Some(errno) = self.take_fault(HostOp::UnregisterOps) {
            return Err(HideError::Unregister(errno));
        }
        let mut active = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        let idx = active
            .iter()
            .position(|o| o.id() == ops.id())
            .ok_or(HideError::Unregister(Errno::EINVAL))?;
        active.remove(idx);
        Ok(())
    }
}

impl ModuleLoader for MemHost {
    fn load_module(&self, name: &str, entry: Arc<dyn FindGePid>) -> Result<LoadedText> {
        if let Some(errno) = self.take_fault(HostOp::LoadModule) {
            return Err(HideError::ModuleLoad(errno));
        }
        let base = self
            .next_module_base
            .fetch_add(addr::MODULE_TEXT_SIZE, Ordering::Relaxed);
        let text = LoadedText {
            range: TextRange {
                start: SymbolAddr(base),
                end: SymbolAddr(base + addr::MODULE_TEXT_SIZE),
            },
            entry: SymbolAddr(base).offset(addr::MODULE_ENTRY_OFFSET),
        };
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ModuleText {
                name: name.to_string(),
                text,
                code: entry,
            });
        kinfo!("module {} loaded at {}..{}", name, text.range.start, text.range.end);
        Ok(text)
    }

    fn unload_module(&self, range: TextRange) {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = modules.iter().position(|m| m.text.range == range) {
            let m = modules.remove(idx);
            kinfo!("module {} unloaded", m.name);
        }
    }
}
