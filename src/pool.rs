//! Key pool manager.
//!
//! Owns the immutable key store together with the mutable daily state: the
//! usage ledger and the round-robin cursor. One mutex guards both plus the
//! snapshot write, so counter updates, quarantine changes, day rollover,
//! and cursor advances are serialized; upstream I/O happens outside the
//! lock. Two concurrent requests can never observe the same cursor tick.

use tokio::sync::Mutex;

use crate::keys::{self, KeyStore};
use crate::ledger::{self, UsageLedger};
use crate::logger;

struct PoolInner {
    ledger: UsageLedger,
    cursor: usize,
}

pub struct KeyPool {
    store: KeyStore,
    usage_path: String,
    inner: Mutex<PoolInner>,
}

impl KeyPool {
    /// Build the pool, restoring today's usage snapshot if one exists.
    pub fn new(store: KeyStore, usage_path: &str) -> Self {
        let ledger = ledger::load(usage_path);
        Self {
            store,
            usage_path: usage_path.to_string(),
            inner: Mutex::new(PoolInner { ledger, cursor: 0 }),
        }
    }

    pub fn key_count(&self) -> usize {
        self.store.count()
    }

    /// Rollover clock: reset the ledger when the calendar day has changed.
    /// Called on every request entry; no background timer needed.
    pub async fn ensure_today(&self) {
        let today = ledger::today();
        let mut inner = self.inner.lock().await;
        if inner.ledger.day != today {
            logger::info(
                "pool",
                &format!(
                    "Date changed from {} to {}. Resetting daily usage counts and quarantine.",
                    inner.ledger.day, today
                ),
            );
            inner.ledger = UsageLedger::empty(today);
            ledger::save(&inner.ledger, &self.usage_path);
        }
    }

    /// Yield the next key for `model` in round-robin order, skipping keys
    /// quarantined for that model. Scans at most one full pass over the
    /// pool; `None` means every key is quarantined (or the pool is empty).
    pub async fn next_key(&self, model: &str) -> Option<String> {
        let count = self.store.count();
        if count == 0 {
            return None;
        }

        let mut inner = self.inner.lock().await;
        for _ in 0..count {
            let idx = inner.cursor % count;
            inner.cursor = (inner.cursor + 1) % count;
            let key = self.store.get(idx)?;
            if inner.ledger.is_exhausted(key, model) {
                logger::debug(
                    "pool",
                    &format!(
                        "Skipping key ...{} for model '{}': marked exhausted today.",
                        keys::suffix(key),
                        model
                    ),
                );
                continue;
            }
            return Some(key.to_string());
        }
        None
    }

    /// Quarantine (key, model) for the rest of the day and persist.
    /// Returns true when the whole pool is now exhausted for `model`.
    pub async fn mark_exhausted(&self, key: &str, model: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.ledger.mark_exhausted(key, model);
        ledger::save(&inner.ledger, &self.usage_path);
        inner.ledger.all_exhausted_for(self.store.iter(), model)
    }

    /// Count a forwarded request against (key, model) and persist. Returns
    /// the new (model count, total count) for logging.
    pub async fn record_success(&self, key: &str, model: &str) -> (u64, u64) {
        let mut inner = self.inner.lock().await;
        let counts = inner.ledger.record_success(key, model);
        ledger::save(&inner.ledger, &self.usage_path);
        counts
    }

    /// True iff every key in the pool is quarantined for `model`.
    pub async fn all_exhausted_for(&self, model: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.ledger.all_exhausted_for(self.store.iter(), model)
    }

    /// Clone of the current ledger state.
    pub async fn snapshot(&self) -> UsageLedger {
        self.inner.lock().await.ledger.clone()
    }
}
