//! Per-stock-position mutual exclusion.
//!
//! Every mutation locks the `(item, warehouse)` positions it touches. Keys are always
//! taken in ascending `StockKey` order (item, then warehouse), so two operations that
//! overlap in opposite directions cannot deadlock: a waiter only ever holds keys
//! smaller than the one it waits for.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::warn;

use stockbook_core::{StockError, StockResult};
use stockbook_inventory::StockKey;

/// Lock table keyed by stock position.
#[derive(Debug)]
pub struct KeyLocks {
    held: Mutex<HashSet<StockKey>>,
    released: Condvar,
    timeout: Duration,
}

impl KeyLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Acquire every key in global order, waiting up to the configured timeout.
    ///
    /// Not re-entrant. On timeout all keys taken so far are released and a
    /// `ConcurrencyConflict` is returned.
    pub fn acquire(&self, keys: impl IntoIterator<Item = StockKey>) -> StockResult<KeyLockGuard<'_>> {
        let mut keys: Vec<StockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|_| StockError::persistence("stock lock table poisoned"))?;
        let mut acquired = Vec::with_capacity(keys.len());

        for key in keys {
            while held.contains(&key) {
                let now = Instant::now();
                if now >= deadline {
                    for k in &acquired {
                        held.remove(k);
                    }
                    drop(held);
                    self.released.notify_all();
                    warn!(%key, timeout_ms = self.timeout.as_millis() as u64, "stock lock wait timed out");
                    return Err(StockError::conflict(format!(
                        "timed out waiting for stock position {key}; retry the operation"
                    )));
                }
                let (guard, _) = self
                    .released
                    .wait_timeout(held, deadline - now)
                    .map_err(|_| StockError::persistence("stock lock table poisoned"))?;
                held = guard;
            }
            held.insert(key);
            acquired.push(key);
        }

        Ok(KeyLockGuard {
            locks: self,
            keys: acquired,
        })
    }

    /// Number of positions currently locked.
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .map(|held| held.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }
}

/// Held stock-position locks; released on drop.
#[derive(Debug)]
pub struct KeyLockGuard<'a> {
    locks: &'a KeyLocks,
    keys: Vec<StockKey>,
}

impl KeyLockGuard<'_> {
    pub fn keys(&self) -> &[StockKey] {
        &self.keys
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
