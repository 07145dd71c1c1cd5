//! Key-value store port.
//!
//! The scheduler talks to its backing store exclusively through [`KvStore`].
//! Besides plain reads and writes the port offers two atomic primitives:
//!
//! - [`KvStore::apply`] applies a multi-key [`WriteBatch`] atomically.
//! - [`KvStore::watch`] + [`KvStore::commit`] form an optimistic
//!   watch-read-conditional-commit transaction: `watch` snapshots a version
//!   fingerprint for a set of keys *before* the caller reads current state,
//!   and `commit` applies a batch only if none of the watched keys changed
//!   in the meantime. A conflict is reported as [`TxOutcome::Aborted`], a
//!   value rather than an error, so callers can re-read and retry.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;

/// Outcome of a conditional commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// No watched key changed; all staged writes were applied.
    Committed,
    /// A watched key changed since `watch`; nothing was applied.
    Aborted,
}

/// A single staged write.
#[derive(Debug, Clone)]
enum WriteOp {
    Put(String, Vec<u8>),
    Remove(String),
    HashPut(String, String, String),
    HashRemove(String, String),
}

/// An ordered batch of writes applied atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a value write.
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put(key.into(), value));
    }

    /// Stage a value removal.
    pub fn remove(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Remove(key.into()));
    }

    /// Stage a hash field write.
    pub fn hash_put(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.ops
            .push(WriteOp::HashPut(key.into(), field.into(), value.into()));
    }

    /// Stage a hash field removal.
    pub fn hash_remove(&mut self, key: impl Into<String>, field: impl Into<String>) {
        self.ops.push(WriteOp::HashRemove(key.into(), field.into()));
    }

    /// Whether the batch stages no writes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Version fingerprint taken by [`KvStore::watch`].
///
/// Opaque to callers; hand it back to [`KvStore::commit`] unchanged.
#[derive(Debug, Clone)]
pub struct WatchToken {
    observed: Vec<(String, u64)>,
}

/// Store port used by the scheduler.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a single value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.apply(batch).await
    }

    /// Remove a single value. No error if the key was absent.
    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.remove(key);
        self.apply(batch).await
    }

    /// Read all fields of a hash. Missing hashes read as empty.
    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Apply a batch atomically, unconditionally.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Snapshot the current version of each key for a later conditional
    /// commit. Must be called before reading the state the commit depends on.
    async fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError>;

    /// Apply a batch atomically iff none of the watched keys changed since
    /// `token` was taken.
    async fn commit(&self, token: WatchToken, batch: WriteBatch) -> Result<TxOutcome, StoreError>;

    /// Number of fields in a hash.
    async fn hash_len(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.hash_get_all(key).await?.len())
    }
}

/// In-memory store contents shared by both implementations.
///
/// Every mutation of a key advances that key's version counter, including
/// hash-field mutations and writes applied by a committed batch. Watch
/// tokens compare against these counters.
#[derive(Debug, Default, Clone)]
struct KvState {
    records: BTreeMap<String, Vec<u8>>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    versions: HashMap<String, u64>,
}

impl KvState {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn observe(&self, keys: &[&str]) -> WatchToken {
        WatchToken {
            observed: keys
                .iter()
                .map(|key| (key.to_string(), self.version(key)))
                .collect(),
        }
    }

    fn unchanged(&self, token: &WatchToken) -> bool {
        token
            .observed
            .iter()
            .all(|(key, version)| self.version(key) == *version)
    }

    fn apply(&mut self, batch: WriteBatch) {
        for op in batch.ops {
            match op {
                WriteOp::Put(key, value) => {
                    self.records.insert(key.clone(), value);
                    self.bump(&key);
                }
                WriteOp::Remove(key) => {
                    if self.records.remove(&key).is_some() {
                        self.bump(&key);
                    }
                }
                WriteOp::HashPut(key, field, value) => {
                    self.hashes.entry(key.clone()).or_default().insert(field, value);
                    self.bump(&key);
                }
                WriteOp::HashRemove(key, field) => {
                    let mut removed = false;
                    if let Some(hash) = self.hashes.get_mut(&key) {
                        removed = hash.remove(&field).is_some();
                        if hash.is_empty() {
                            self.hashes.remove(&key);
                        }
                    }
                    if removed {
                        self.bump(&key);
                    }
                }
            }
        }
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    state: RwLock<KvState>,
}

impl MemoryKvStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.get(key).cloned())
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.apply(batch);
        Ok(())
    }

    async fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError> {
        let state = self.state.read().await;
        Ok(state.observe(keys))
    }

    async fn commit(&self, token: WatchToken, batch: WriteBatch) -> Result<TxOutcome, StoreError> {
        let mut state = self.state.write().await;
        if !state.unchanged(&token) {
            return Ok(TxOutcome::Aborted);
        }
        state.apply(batch);
        Ok(TxOutcome::Committed)
    }
}

/// Persisted snapshot layout of [`FileKvStore`].
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Snapshot {
    records: BTreeMap<String, Vec<u8>>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
}

/// File-backed store.
///
/// The whole store is one JSON snapshot under the data directory, loaded at
/// open and rewritten through a temp file + rename after every applied
/// batch. Version counters live in memory only; watch tokens do not survive
/// a restart, which is fine because transactions never span one.
///
/// Batches are applied to a scratch copy of the state and only swapped in
/// once the snapshot is on disk, so a failed write leaves readers seeing
/// the pre-batch state.
#[derive(Debug)]
pub struct FileKvStore {
    snapshot_path: PathBuf,
    state: RwLock<KvState>,
}

impl FileKvStore {
    /// Open (or create) a store under `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot create {data_dir:?}: {e}")))?;
        let snapshot_path = data_dir.join("state.json");

        let mut state = KvState::default();
        match fs::read(&snapshot_path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Corrupt(format!("{snapshot_path:?}: {e}")))?;
                state.records = snapshot.records;
                state.hashes = snapshot.hashes;
                debug!(
                    records = state.records.len(),
                    "loaded store snapshot from {}", snapshot_path.display()
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "cannot read {snapshot_path:?}: {e}"
                )));
            }
        }

        Ok(Self {
            snapshot_path,
            state: RwLock::new(state),
        })
    }

    /// Persist the current state. Called with the write lock held so
    /// snapshots are never interleaved.
    async fn persist(&self, state: &KvState) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            records: state.records.clone(),
            hashes: state.hashes.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| StoreError::Corrupt(format!("snapshot encode failed: {e}")))?;

        let tmp_path = self.snapshot_path.with_extension("tmp");
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot write {tmp_path:?}: {e}")))?;
        fs::rename(&tmp_path, &self.snapshot_path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("cannot replace snapshot: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.get(key).cloned())
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.apply(batch);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn watch(&self, keys: &[&str]) -> Result<WatchToken, StoreError> {
        let state = self.state.read().await;
        Ok(state.observe(keys))
    }

    async fn commit(&self, token: WatchToken, batch: WriteBatch) -> Result<TxOutcome, StoreError> {
        let mut state = self.state.write().await;
        if !state.unchanged(&token) {
            return Ok(TxOutcome::Aborted);
        }
        let mut next = state.clone();
        next.apply(batch);
        self.persist(&next).await?;
        *state = next;
        Ok(TxOutcome::Committed)
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
