//! Commit ordering between writers and consistency readers.
//!
//! A mutation holds its key's lock from the read through the audit append,
//! so one key's commits reach the store, the broker and the log in version
//! order. Every mutation also holds the shared side of a gate; a reader that
//! needs store and log to agree (the ledger check) takes the exclusive side
//! and never observes a commit half done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The locks guard no data, so a poisoned lock is still a usable lock.
fn recover<G>(result: Result<G, PoisonError<G>>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct CommitLocks {
    gate: RwLock<()>,
    keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock serializing commits on `key`. Lock it with [`hold`].
    pub fn key(&self, key: &str) -> Arc<Mutex<()>> {
        let mut keys = recover(self.keys.lock());
        Arc::clone(keys.entry(key.to_string()).or_default())
    }

    /// Shared side of the gate, held for the duration of one mutation.
    pub fn enter(&self) -> RwLockReadGuard<'_, ()> {
        recover(self.gate.read())
    }

    /// Wait for in-flight mutations to finish and hold new ones off until
    /// the returned guard drops.
    pub fn quiesce(&self) -> RwLockWriteGuard<'_, ()> {
        recover(self.gate.write())
    }
}

pub fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    recover(lock.lock())
}
