//! Due-time scheduler.
//!
//! The scheduler owns the due-time index: one hash at [`NEXT_UPDATES_KEY`]
//! mapping joined resource paths to RFC 3339 UTC instants. A path present in
//! the index is tracked and eligible for dispatch; its value is the earliest
//! instant at which it should next be refreshed. No other component writes
//! to this hash.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::SchedulerError;
use crate::kv::{KvStore, TxOutcome, WriteBatch};
use crate::path::ResourcePath;

/// Storage key of the due-time index.
pub const NEXT_UPDATES_KEY: &str = "meta:next_updates";

/// When a resource should next be refreshed.
#[derive(Debug, Clone, Copy)]
pub enum Due {
    /// Now plus a duration.
    After(chrono::Duration),
    /// An absolute instant.
    At(DateTime<Utc>),
}

impl Due {
    fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Due::After(duration) => now + duration,
            Due::At(instant) => instant,
        }
    }
}

/// Earliest instant representable in the index's serialized form.
///
/// Entries carrying this value sort ahead of anything actually scheduled,
/// so newly tracked paths are dispatched first.
fn min_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(0, 1, 1, 0, 0, 0).unwrap()
}

fn parse_due(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(instant) => instant.with_timezone(&Utc),
        Err(_) => {
            // An unreadable timestamp means the entry should not starve;
            // treat it as due immediately and let the refresh rewrite it.
            debug!(raw, "unparsable due time in index, treating as overdue");
            min_instant()
        }
    }
}

/// Maintains resource records and the due-time index.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn KvStore>,
}

impl Scheduler {
    /// Create a scheduler over a store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Write the record for `path` and, if `due` is given, its index entry,
    /// as one atomic batch. Upsert semantics: no error if nothing existed.
    pub async fn set<T: Serialize>(
        &self,
        path: &ResourcePath,
        payload: &T,
        due: Option<Due>,
    ) -> Result<(), SchedulerError> {
        let key = path.joined();
        let mut batch = WriteBatch::new();
        batch.put(&key, serde_json::to_vec(payload)?);
        if let Some(due) = due {
            batch.hash_put(NEXT_UPDATES_KEY, &key, due.resolve(Utc::now()).to_rfc3339());
        }
        self.store.apply(batch).await?;
        Ok(())
    }

    /// Read the record for `path`. Absence is `Ok(None)`, not an error.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &ResourcePath,
    ) -> Result<Option<T>, SchedulerError> {
        match self.store.get(&path.joined()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove the record for `path` and its index entry in one atomic batch.
    /// No error if either was already absent.
    pub async fn delete(&self, path: &ResourcePath) -> Result<(), SchedulerError> {
        let key = path.joined();
        let mut batch = WriteBatch::new();
        batch.remove(&key);
        batch.hash_remove(NEXT_UPDATES_KEY, &key);
        self.store.apply(batch).await?;
        Ok(())
    }

    /// Remove only the index entry for `path`, leaving its record alone.
    /// No error if the path was not tracked.
    pub async fn untrack(&self, path: &ResourcePath) -> Result<(), SchedulerError> {
        let mut batch = WriteBatch::new();
        batch.hash_remove(NEXT_UPDATES_KEY, path.joined());
        self.store.apply(batch).await?;
        Ok(())
    }

    /// Reconcile the due-time index to track exactly `desired`.
    ///
    /// Newly desired paths are added as immediately overdue; paths no longer
    /// desired lose their index entry (their records are left untouched);
    /// paths already tracked keep their due time. Runs as an optimistic
    /// transaction watching the index: a concurrent writer aborts the
    /// commit, the diff is discarded and recomputed from fresh state.
    /// Retries are unbounded, with a yield between attempts.
    pub async fn set_update_pool(&self, desired: &[ResourcePath]) -> Result<(), SchedulerError> {
        let desired: BTreeSet<String> = desired.iter().map(ResourcePath::joined).collect();

        loop {
            let token = self.store.watch(&[NEXT_UPDATES_KEY]).await?;
            let tracked = self.store.hash_get_all(NEXT_UPDATES_KEY).await?;

            let mut batch = WriteBatch::new();
            let mut added = 0usize;
            let mut removed = 0usize;
            for key in &desired {
                if !tracked.contains_key(key) {
                    batch.hash_put(NEXT_UPDATES_KEY, key, min_instant().to_rfc3339());
                    added += 1;
                }
            }
            for key in tracked.keys() {
                if !desired.contains(key) {
                    batch.hash_remove(NEXT_UPDATES_KEY, key);
                    removed += 1;
                }
            }

            // Commit even an empty diff: the watch check gives the
            // reconciliation a clean linearization point.
            match self.store.commit(token, batch).await? {
                TxOutcome::Committed => {
                    debug!(added, removed, tracked = desired.len(), "update pool reconciled");
                    return Ok(());
                }
                TxOutcome::Aborted => {
                    debug!("due-time index changed concurrently, retrying reconciliation");
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Return the tracked path with the minimal due time.
    ///
    /// Ties are broken by the lexicographically smallest joined path, so
    /// selection is deterministic. Fails with
    /// [`SchedulerError::EmptyIndex`] when nothing is tracked.
    pub async fn get_next(&self) -> Result<ResourcePath, SchedulerError> {
        let tracked = self.store.hash_get_all(NEXT_UPDATES_KEY).await?;

        let mut best: Option<(&String, DateTime<Utc>)> = None;
        for (key, raw) in &tracked {
            let due = parse_due(raw);
            // Strictly-less keeps the first (lexically smallest) key on ties.
            if best.is_none_or(|(_, best_due)| due < best_due) {
                best = Some((key, due));
            }
        }

        match best {
            Some((key, _)) => Ok(ResourcePath::parse(key)?),
            None => Err(SchedulerError::EmptyIndex),
        }
    }

    /// Number of tracked paths.
    pub async fn tracked_count(&self) -> Result<usize, SchedulerError> {
        Ok(self.store.hash_len(NEXT_UPDATES_KEY).await?)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
