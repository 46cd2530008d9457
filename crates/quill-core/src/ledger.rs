//! Resource Ledger: exclusive access to resource keys plus last known existence.
//!
//! At most one scenario holds a key at a time. Waiters park on a [`Notify`]
//! instead of a blocked thread, so a contended key never occupies a worker.

use quill_proto::Existence;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Entry {
    holder: Option<String>,
    existence: Existence,
}

/// Per-run table of resource keys.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Mutex<HashMap<String, Entry>>,
    released: Notify,
}

impl Ledger {
    /// Creates an empty, shareable ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until `key` is free, then holds it for `scenario_id`.
    ///
    /// The returned permit releases the key when dropped, which also covers a
    /// task aborted by the run timeout.
    pub async fn acquire(self: &Arc<Self>, key: &str, scenario_id: &str) -> LedgerPermit {
        loop {
            // Register interest before checking so a release between the
            // check and the await is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire(key, scenario_id) {
                return permit;
            }

            debug!(
                key,
                scenario = scenario_id,
                holder = ?self.holder(key),
                "Waiting for resource key"
            );
            notified.await;
        }
    }

    /// Holds `key` for `scenario_id` if nobody else does.
    pub fn try_acquire(self: &Arc<Self>, key: &str, scenario_id: &str) -> Option<LedgerPermit> {
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_default();
        if entry.holder.is_some() {
            return None;
        }
        entry.holder = Some(scenario_id.to_string());
        debug!(key, scenario = scenario_id, "Acquired resource key");
        Some(LedgerPermit {
            ledger: Arc::clone(self),
            key: key.to_string(),
            scenario_id: scenario_id.to_string(),
        })
    }

    /// Frees `key` regardless of who holds it and wakes every waiter.
    pub fn release(&self, key: &str) {
        if let Some(entry) = self.entries().get_mut(key) {
            entry.holder = None;
        }
        self.released.notify_waiters();
    }

    fn release_held(&self, key: &str, scenario_id: &str) {
        let freed = match self.entries().get_mut(key) {
            Some(entry) if entry.holder.as_deref() == Some(scenario_id) => {
                entry.holder = None;
                true
            }
            _ => false,
        };
        if freed {
            debug!(key, scenario = scenario_id, "Released resource key");
            self.released.notify_waiters();
        }
    }

    /// Returns the scenario currently holding `key`.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.entries().get(key).and_then(|e| e.holder.clone())
    }

    /// Returns the last known existence of the resource behind `key`.
    pub fn existence(&self, key: &str) -> Existence {
        self.entries()
            .get(key)
            .map(|e| e.existence)
            .unwrap_or_default()
    }

    /// Updates the last known existence of the resource behind `key`.
    pub fn record_existence(&self, key: &str, existence: Existence) {
        let mut entries = self.entries();
        let entry = entries.entry(key.to_string()).or_default();
        if entry.existence != existence {
            debug!(key, from = %entry.existence, to = %existence, "Existence changed");
        }
        entry.existence = existence;
    }
}

/// Exclusive hold on a resource key.
#[derive(Debug)]
pub struct LedgerPermit {
    ledger: Arc<Ledger>,
    key: String,
    scenario_id: String,
}

impl LedgerPermit {
    /// Returns the held key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the holding scenario.
    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }
}

impl Drop for LedgerPermit {
    fn drop(&mut self) {
        self.ledger.release_held(&self.key, &self.scenario_id);
    }
}
