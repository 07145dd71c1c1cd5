//! The dispatch loop.
//!
//! One refresh per tick, always the most-overdue tracked resource. Ticks
//! never overlap: a tick runs to completion (including any reconciliation
//! retries) before the timer fires again, and an overrunning tick delays
//! the next one instead of stacking.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use ttsync_store::{Due, ResourcePath, Scheduler, SchedulerError, TimetablePath};
use ttsync_upstream::{SchoolClass, Semester, TimeSlot, UpstreamClient, Week};

use crate::backoff::{current_week_index, refresh_delay};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::signal::ShutdownSignal;

/// Cached global metadata, persisted under the `meta` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRecord {
    pub semesters: Vec<Semester>,
    pub classes: Vec<SchoolClass>,
    pub time_slots: Vec<TimeSlot>,
    pub weeks: Vec<Week>,
}

/// Fixed-rate dispatcher over the due-time index.
pub struct Dispatcher {
    scheduler: Arc<Scheduler>,
    upstream: Arc<dyn UpstreamClient>,
    config: DispatchConfig,
    shutdown: ShutdownSignal,
    /// Metadata cache. Owned by the single-threaded tick loop; written only
    /// at startup and by the meta refresh.
    meta: Option<MetaRecord>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        scheduler: Arc<Scheduler>,
        upstream: Arc<dyn UpstreamClient>,
        config: DispatchConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            scheduler,
            upstream,
            config,
            shutdown,
            meta: None,
        }
    }

    /// Load the metadata cache, fetching it from upstream if the store has
    /// none yet. The upstream fetch also seeds the update pool, so a fresh
    /// deployment starts with a populated due-time index.
    pub async fn init(&mut self) -> Result<(), DispatchError> {
        match self.scheduler.get::<MetaRecord>(&ResourcePath::meta()).await? {
            Some(meta) => {
                debug!(
                    classes = meta.classes.len(),
                    weeks = meta.weeks.len(),
                    "loaded cached metadata"
                );
                self.meta = Some(meta);
            }
            None => {
                info!("no cached metadata, fetching from upstream");
                self.refresh_meta().await?;
            }
        }
        Ok(())
    }

    /// Run the tick loop until shutdown is requested.
    pub async fn run(&mut self) -> Result<(), DispatchError> {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.tick_interval_secs,
            "dispatch loop started"
        );
        loop {
            // Re-checking the flag covers a request that raced subscription.
            if self.shutdown.is_requested() {
                info!("shutdown requested, stopping dispatch loop");
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("shutdown requested, stopping dispatch loop");
                    return Ok(());
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    /// Run one tick. Failures end the tick and leave the resource's due
    /// time untouched, so it is re-selected on a later tick.
    pub async fn tick(&mut self) {
        match self.dispatch_next().await {
            Ok(()) => {}
            Err(DispatchError::Scheduler(SchedulerError::EmptyIndex)) => {
                debug!("due-time index is empty, skipping tick");
            }
            Err(error) => warn!(%error, "refresh failed"),
        }
    }

    async fn dispatch_next(&mut self) -> Result<(), DispatchError> {
        let path = self.scheduler.get_next().await?;

        if path.is_meta() {
            self.refresh_meta().await?;
            info!(kind = "meta", "refresh succeeded");
        } else if let Some(timetable) = path.as_timetable() {
            self.refresh_timetable(&timetable).await?;
            info!(
                kind = "lessons",
                semester = %timetable.semester,
                week = timetable.week,
                class = %timetable.class,
                "refresh succeeded"
            );
        } else {
            // Such entries only appear through operator edits. Left in
            // place they would win selection on every tick, so drop the
            // entry and keep the record.
            warn!(%path, "unrecognized path in due-time index, untracking it");
            self.scheduler.untrack(&path).await?;
        }
        Ok(())
    }

    /// Fetch global metadata, store it with a fixed due time, and rebuild
    /// the update pool: the meta path itself plus one entry per week×class
    /// of the active semester. Reconciliation both seeds new resources and
    /// prunes ones no longer reported upstream.
    async fn refresh_meta(&mut self) -> Result<(), DispatchError> {
        let metadata = self.upstream.get_metadata().await?;
        let semester = metadata
            .semesters
            .get(self.config.active_semester_index)
            .ok_or(DispatchError::MissingSemester(self.config.active_semester_index))?
            .clone();
        let classes = self.upstream.get_classes(&semester.id).await?;
        let weeks = metadata.weeks(&semester.id);

        let record = MetaRecord {
            semesters: metadata.semesters,
            classes,
            time_slots: metadata.time_slots,
            weeks,
        };
        self.scheduler
            .set(
                &ResourcePath::meta(),
                &record,
                Some(Due::After(chrono::Duration::hours(self.config.meta_refresh_hours))),
            )
            .await?;

        let mut pool = vec![ResourcePath::meta()];
        for week in &record.weeks {
            for class in &record.classes {
                pool.push(ResourcePath::timetable(&semester.id, week.id, &class.id));
            }
        }
        self.scheduler.set_update_pool(&pool).await?;

        debug!(tracked = pool.len(), "update pool rebuilt");
        self.meta = Some(record);
        Ok(())
    }

    /// Fetch one week×class timetable and store it with its backoff due
    /// time.
    async fn refresh_timetable(&mut self, timetable: &TimetablePath) -> Result<(), DispatchError> {
        let meta = self.meta.as_ref().ok_or(DispatchError::MetadataMissing)?;
        let week = meta
            .weeks
            .iter()
            .find(|week| week.id == timetable.week)
            .ok_or(DispatchError::UnknownWeek(timetable.week))?;

        let lessons = self
            .upstream
            .get_lessons(week.start_date, week.end_date, &timetable.class)
            .await?;

        let current_week = current_week_index(&meta.weeks, chrono::Utc::now())?;
        let delay = refresh_delay(timetable.week, current_week, &self.config);

        let path = ResourcePath::timetable(&timetable.semester, timetable.week, &timetable.class);
        self.scheduler
            .set(&path, &lessons, Some(Due::After(delay)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
