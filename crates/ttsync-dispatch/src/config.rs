//! Dispatch configuration.

use serde::{Deserialize, Serialize};

/// Dispatch loop and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between ticks; one upstream refresh happens per tick.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Hours until the metadata record is refreshed again.
    #[serde(default = "default_meta_refresh")]
    pub meta_refresh_hours: i64,

    /// Base refresh delay in minutes; also the per-week increment.
    #[serde(default = "default_base_delay")]
    pub base_delay_minutes: i64,

    /// Fallback delay in minutes for weeks already in the past.
    #[serde(default = "default_stale_delay")]
    pub stale_delay_minutes: i64,

    /// Position of the running semester in the upstream's semester list.
    #[serde(default = "default_semester_index")]
    pub active_semester_index: usize,
}

fn default_tick_interval() -> u64 {
    30
}

fn default_meta_refresh() -> i64 {
    24
}

fn default_base_delay() -> i64 {
    30
}

fn default_stale_delay() -> i64 {
    2880
}

fn default_semester_index() -> usize {
    1
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            meta_refresh_hours: default_meta_refresh(),
            base_delay_minutes: default_base_delay(),
            stale_delay_minutes: default_stale_delay(),
            active_semester_index: default_semester_index(),
        }
    }
}
