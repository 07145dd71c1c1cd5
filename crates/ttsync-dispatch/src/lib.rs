//! # ttsync Dispatch
//!
//! The fixed-rate loop that consumes the due-time index.
//!
//! ## Features
//!
//! - One refresh per tick, always the most-overdue resource
//! - Meta refresh rebuilds the tracked-resource pool
//! - Timetable refresh with distance-based backoff
//! - Single-item failure handling: a failed tick is logged, never fatal
//! - Graceful shutdown between ticks

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod signal;

pub use backoff::{current_week_index, refresh_delay};
pub use config::DispatchConfig;
pub use dispatcher::{Dispatcher, MetaRecord};
pub use error::DispatchError;
pub use signal::ShutdownSignal;
