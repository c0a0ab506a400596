//! `HiddenRegistry`: the set of pids the enumeration filter skips.
//!
//! The only state shared between the control channel (writers) and the
//! enumeration filter (readers on arbitrary threads). One mutex guards
//! every operation and is held only for that operation; nothing here
//! calls out while holding it.
//!
//! Duplicates are kept: `hide(p)` twice lists `p` twice. There is no
//! single-entry removal; `unhide_all` clears everything whatever pid the
//! operator named.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hideproc_core::error::{HideError, Result};
use hideproc_core::pid::Pid;
use hideproc_core::{kdebug, kinfo};

pub struct HiddenRegistry {
    entries: Mutex<Vec<Pid>>,
    /// Bumped on every mutation. Lets readers notice the set changed.
    generation: AtomicU64,
    #[cfg(test)]
    fail_alloc: std::sync::atomic::AtomicBool,
}

impl HiddenRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            #[cfg(test)]
            fail_alloc: std::sync::atomic::AtomicBool::new(false),
        }
    }

    // A panic while holding the lock cannot leave a Vec<Pid> half-written.
    fn lock(&self) -> MutexGuard<'_, Vec<Pid>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry for `pid`. No uniqueness check.
    ///
    /// Fails only if the entry cannot be allocated, in which case the
    /// registry is unchanged.
    pub fn hide(&self, pid: Pid) -> Result<()> {
        let mut entries = self.lock();
        #[cfg(test)]
        if self.fail_alloc.swap(false, Ordering::Relaxed) {
            return Err(HideError::NoMemory);
        }
        entries.try_reserve(1).map_err(|_| HideError::NoMemory)?;
        entries.push(pid);
        self.generation.fetch_add(1, Ordering::Release);
        kdebug!("hide pid {} ({} hidden)", pid, entries.len());
        Ok(())
    }

    /// Linear scan.
    pub fn is_hidden(&self, pid: Pid) -> bool {
        self.lock().contains(&pid)
    }

    /// Remove every entry. `requested` is only reported.
    ///
    /// Returns how many entries were removed.
    pub fn unhide_all(&self, requested: Option<Pid>) -> usize {
        let removed = {
            let mut entries = self.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        self.generation.fetch_add(1, Ordering::Release);
        match requested {
            Some(pid) => kinfo!("del {}: cleared all {} hidden entries", pid, removed),
            None => kinfo!("del: cleared all {} hidden entries", removed),
        }
        removed
    }

    /// Snapshot in storage (insertion) order.
    pub fn list_all(&self) -> Vec<Pid> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Make the next `hide` fail as if the entry could not be allocated.
    #[cfg(test)]
    pub(crate) fn fail_next_alloc(&self) {
        self.fail_alloc.store(true, Ordering::Relaxed);
    }
}

impl Default for HiddenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HiddenRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiddenRegistry")
            .field("entries", &self.list_all())
            .field("generation", &self.generation())
            .finish()
    }
}
