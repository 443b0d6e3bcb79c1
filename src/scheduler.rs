//! # Ingestion Scheduler
//!
//! Fires the ingestion cycle once a day at a fixed local time and once on startup.
//! [`IngestionJob`] owns the watermark: it is read, used and advanced while holding
//! both an in-process lock and a database lease shared by every process, so
//! overlapping triggers skip instead of interleaving. The watermark only moves after
//! a cycle completes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::time::{Duration as TokioDuration, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigError, SchedulerConfig};
use crate::error::PipelineError;
use crate::pipeline::{CycleReport, IngestionCycle};
use crate::repositories::{LeaseStore, WatermarkStore};

/// Lease guarding the watermark read-advance cycle.
pub const INGESTION_LEASE: &str = "fema_ingestion";

/// Lease lifetime beyond the cycle timeout, so a crashed holder is eventually replaced.
const LEASE_GRACE_SECONDS: i64 = 60;

/// A unit of work fired by a trigger.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, now: DateTime<Utc>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobRun {
    Completed(CycleReport),
    /// Another cycle, in this process or another, held the watermark
    Skipped,
}

pub struct IngestionJob {
    cycle: IngestionCycle,
    watermarks: Arc<dyn WatermarkStore>,
    leases: Arc<dyn LeaseStore>,
    holder: Uuid,
    /// Watermark this process last stored
    watermark: Mutex<Option<DateTime<Utc>>>,
    initial_lookback: Duration,
    cycle_timeout: TokioDuration,
}

impl IngestionJob {
    pub fn new(
        cycle: IngestionCycle,
        watermarks: Arc<dyn WatermarkStore>,
        leases: Arc<dyn LeaseStore>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            cycle,
            watermarks,
            leases,
            holder: Uuid::new_v4(),
            watermark: Mutex::new(None),
            initial_lookback: Duration::hours(config.initial_lookback_hours as i64),
            cycle_timeout: TokioDuration::from_secs(config.cycle_timeout_seconds),
        }
    }

    /// Start of the declaration-date window; the lower bound of a backfill.
    pub fn lookback_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.cycle.ingestor().lookback_start(now)
    }

    /// Watermark this process last advanced to, if a cycle has completed here.
    pub async fn current_watermark(&self) -> Option<DateTime<Utc>> {
        *self.watermark.lock().await
    }

    /// Runs one cycle unless another is in progress in any process.
    ///
    /// `since_override` replaces the watermark as the lower bound for this run only.
    /// The watermark is advanced and persisted only when the cycle succeeds.
    #[instrument(skip(self))]
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        since_override: Option<DateTime<Utc>>,
    ) -> Result<JobRun, PipelineError> {
        let Ok(mut guard) = self.watermark.try_lock() else {
            return Ok(JobRun::Skipped);
        };

        let lease_ttl =
            Duration::seconds(self.cycle_timeout.as_secs() as i64 + LEASE_GRACE_SECONDS);
        if !self
            .leases
            .try_acquire(INGESTION_LEASE, self.holder, lease_ttl, Utc::now())
            .await?
        {
            info!(lease = INGESTION_LEASE, "ingestion lease held elsewhere");
            return Ok(JobRun::Skipped);
        }

        let result = self.run_leased(&mut guard, now, since_override).await;

        if let Err(err) = self.leases.release(INGESTION_LEASE, self.holder).await {
            warn!(
                error = %err,
                lease = INGESTION_LEASE,
                "failed to release ingestion lease; it will expire"
            );
        }

        result.map(JobRun::Completed)
    }

    async fn run_leased(
        &self,
        last_stored: &mut Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        since_override: Option<DateTime<Utc>>,
    ) -> Result<CycleReport, PipelineError> {
        let stored = self.watermarks.load().await?;
        let previous = match *last_stored {
            // Another process may have advanced the stored value since our last run.
            Some(last) => stored.map_or(last, |stored| stored.max(last)),
            None => self.startup_watermark(stored, now),
        };
        let since = since_override.unwrap_or(previous);

        let report = match timeout(self.cycle_timeout, self.cycle.run_cycle(since, now)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PipelineError::Timeout {
                    timeout_secs: self.cycle_timeout.as_secs(),
                });
            }
        };

        let advanced = report.new_watermark.max(previous);
        self.watermarks.store(advanced).await?;
        *last_stored = Some(advanced);

        Ok(report)
    }

    /// First watermark of the process: the stored one, but never later than the
    /// initial lookback before `now`.
    fn startup_watermark(
        &self,
        stored: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let margin = now - self.initial_lookback;
        stored.map_or(margin, |stored| stored.min(margin))
    }
}

#[async_trait]
impl ScheduledJob for IngestionJob {
    fn name(&self) -> &'static str {
        "fema-ingestion"
    }

    async fn run(&self, now: DateTime<Utc>) {
        match self.run_once(now, None).await {
            Ok(JobRun::Completed(report)) => {
                info!(new_watermark = %report.new_watermark, "scheduled ingestion finished");
            }
            Ok(JobRun::Skipped) => {
                warn!("previous ingestion cycle still running; skipping this trigger");
            }
            Err(err) => {
                error!(error = %err, fatal = err.is_fatal(), "ingestion cycle failed; watermark unchanged");
            }
        }
    }
}

/// Fixed wall-clock time in a named time zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailySchedule {
    time: NaiveTime,
    tz: Tz,
}

impl DailySchedule {
    pub fn new(time: NaiveTime, tz: Tz) -> Self {
        Self { time, tz }
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.daily_time()?, config.tz()?))
    }

    /// First fire time strictly after `now`.
    ///
    /// A time skipped by a DST jump fires an hour later; a repeated time fires on its
    /// first occurrence.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = now.with_timezone(&self.tz).date_naive();

        for _ in 0..3 {
            let local = date.and_time(self.time);
            let fire = self
                .tz
                .from_local_datetime(&local)
                .earliest()
                .or_else(|| {
                    self.tz
                        .from_local_datetime(&(local + Duration::hours(1)))
                        .earliest()
                })
                .map(|fire| fire.with_timezone(&Utc));

            if let Some(fire) = fire
                && fire > now
            {
                return fire;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }

        now + Duration::days(1)
    }
}

/// Drives a [`ScheduledJob`] on a [`DailySchedule`].
pub struct DailyTrigger {
    job: Arc<dyn ScheduledJob>,
    schedule: DailySchedule,
    run_on_startup: bool,
}

impl DailyTrigger {
    pub fn new(job: Arc<dyn ScheduledJob>, schedule: DailySchedule, run_on_startup: bool) -> Self {
        Self {
            job,
            schedule,
            run_on_startup,
        }
    }

    /// Runs until the shutdown token fires.
    #[instrument(skip_all, fields(job = self.job.name()))]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(tz = %self.schedule.tz, time = %self.schedule.time, "Starting daily trigger");

        if self.run_on_startup {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Daily trigger shutdown requested");
                    return;
                }
                _ = self.job.run(Utc::now()) => {}
            }
        }

        loop {
            let now = Utc::now();
            let next = self.schedule.next_after(now);
            let wait = (next - now).to_std().unwrap_or(TokioDuration::ZERO);
            info!(next_run = %next, "next scheduled run");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Daily trigger shutdown requested");
                    break;
                }
                _ = sleep(wait) => {
                    self.job.run(Utc::now()).await;
                }
            }
        }

        info!("Daily trigger stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eastern_midnight() -> DailySchedule {
        DailySchedule::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            chrono_tz::America::New_York,
        )
    }

    #[test]
    fn next_midnight_in_new_york() {
        let now = Utc.with_ymd_and_hms(2025, 9, 10, 12, 0, 0).unwrap();
        assert_eq!(
            eastern_midnight().next_after(now),
            Utc.with_ymd_and_hms(2025, 9, 11, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn exact_fire_time_moves_to_next_day() {
        let now = Utc.with_ymd_and_hms(2025, 9, 11, 4, 0, 0).unwrap();
        assert_eq!(
            eastern_midnight().next_after(now),
            Utc.with_ymd_and_hms(2025, 9, 12, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn winter_offset_is_applied() {
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 12, 0, 0).unwrap();
        assert_eq!(
            eastern_midnight().next_after(now),
            Utc.with_ymd_and_hms(2025, 12, 2, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn skipped_local_time_fires_an_hour_later() {
        let schedule = DailySchedule::new(
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            chrono_tz::America::New_York,
        );
        // 2025-03-09 02:30 does not exist in New York.
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 5, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(now),
            Utc.with_ymd_and_hms(2025, 3, 9, 7, 30, 0).unwrap()
        );
    }
}
