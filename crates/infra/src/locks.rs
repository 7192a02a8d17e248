//! Per-league single-writer locks.
//!
//! Standings of one league are rebuilt by at most one worker at a time; other
//! leagues proceed in parallel. No lock is held while the rebuild of a
//! different league runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use scoreline_core::LeagueId;

#[derive(Debug, Default)]
pub struct LeagueLocks {
    locks: Mutex<HashMap<LeagueId, Arc<Mutex<()>>>>,
}

impl LeagueLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `league_id`.
    ///
    /// A poisoned lock is taken over: a rebuild always starts from scratch, so
    /// a panic halfway through an earlier one leaves nothing to repair.
    pub fn with_league<T>(&self, league_id: LeagueId, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.entry(league_id).or_default().clone()
        };

        let _guard = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f()
    }

    /// Number of leagues that have been locked at least once.
    pub fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
