// src/formula/locks.rs

//! Per-formula install exclusion
//!
//! Two invocations that both need the same formula must not build it twice.
//! Each formula name maps to its own mutex; a caller holds it for the whole
//! ensure-installed step and re-checks the receipt once it has it, so the
//! loser of a race finds the winner's receipt and skips the build.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
pub struct InstallLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstallLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex guarding installs of `name`
    pub fn for_formula(&self, name: &str) -> Arc<Mutex<()>> {
        // Clone out so the shard lock is released before anyone blocks on the mutex
        Arc::clone(
            self.locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Number of formulas that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
