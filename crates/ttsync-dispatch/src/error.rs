//! Dispatch errors.

use thiserror::Error;
use ttsync_store::SchedulerError;
use ttsync_upstream::UpstreamError;

/// Errors raised while dispatching refreshes.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Scheduler or store failure.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Upstream fetch failure. The resource keeps its due time and is
    /// retried on a later tick.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The upstream semester list has no entry at the configured position.
    #[error("no semester at position {0} in upstream metadata")]
    MissingSemester(usize),

    /// No cached metadata is available for a timetable refresh.
    #[error("metadata record missing")]
    MetadataMissing,

    /// A tracked week id does not exist in the cached week list.
    #[error("week {0} not present in cached metadata")]
    UnknownWeek(u32),

    /// Today is past the end of every known week.
    #[error("current date is past every known week")]
    WeekOutOfRange,
}
