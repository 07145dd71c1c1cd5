//! # ttsync Store
//!
//! Persistent scheduling state for the timetable refresh daemon.
//!
//! ## Features
//!
//! - Key-value store port with optimistic-concurrency transactions
//! - In-memory and file-backed store implementations
//! - Due-time index: a persistent "earliest due wins" priority structure
//! - Desired-set reconciliation with transparent conflict retry

pub mod error;
pub mod kv;
pub mod path;
pub mod scheduler;

pub use error::{SchedulerError, StoreError};
pub use kv::{FileKvStore, KvStore, MemoryKvStore, TxOutcome, WatchToken, WriteBatch};
pub use path::{ResourcePath, TimetablePath};
pub use scheduler::{Due, NEXT_UPDATES_KEY, Scheduler};
