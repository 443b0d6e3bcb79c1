//! # Ingestion Cycle
//!
//! One pass of ingest → match → plan. Disasters that are new or materially changed
//! in this pass, together with any whose earlier fan-out did not finish, are fanned
//! out one at a time. A failure confined to one disaster leaves it pending for the
//! next cycle; only fatal errors abort the cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use tracing::{error, info, instrument, warn};

use crate::domain::Disaster;
use crate::error::PipelineError;
use crate::ingest::DisasterIngestor;
use crate::matcher::LocationMatcher;
use crate::planner::{FanOutStats, NotificationPlanner};
use crate::repositories::DisasterStore;

/// Upper bound on pending disasters retried per cycle.
const PENDING_FANOUT_LIMIT: u64 = 500;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub disasters_fanned_out: usize,
    pub disasters_failed: usize,
    pub notifications_created: usize,
    pub notifications_refreshed: usize,
    pub emails_enqueued: usize,
    /// Watermark the next cycle should start from
    pub new_watermark: DateTime<Utc>,
}

pub struct IngestionCycle {
    ingestor: DisasterIngestor,
    disasters: Arc<dyn DisasterStore>,
    matcher: LocationMatcher,
    planner: NotificationPlanner,
}

impl IngestionCycle {
    pub fn new(
        ingestor: DisasterIngestor,
        disasters: Arc<dyn DisasterStore>,
        matcher: LocationMatcher,
        planner: NotificationPlanner,
    ) -> Self {
        Self {
            ingestor,
            disasters,
            matcher,
            planner,
        }
    }

    pub fn ingestor(&self) -> &DisasterIngestor {
        &self.ingestor
    }

    #[instrument(skip(self), fields(since = %since))]
    pub async fn run_cycle(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, PipelineError> {
        let started = Instant::now();
        let ingest = self.ingestor.ingest(since, now).await?;

        let mut report = CycleReport {
            fetched: ingest.fetched,
            ingested: ingest.ingested,
            skipped: ingest.skipped,
            new_watermark: ingest.new_watermark,
            ..CycleReport::default()
        };

        let pending = self.disasters.find_pending_fanout(PENDING_FANOUT_LIMIT).await?;
        let mut seen = HashSet::new();
        let work: Vec<Disaster> = ingest
            .changed
            .into_iter()
            .chain(pending)
            .filter(|disaster| seen.insert(disaster.id.clone()))
            .collect();

        for disaster in &work {
            match self.fan_out(disaster, now).await {
                Ok(stats) => {
                    report.disasters_fanned_out += 1;
                    report.notifications_created += stats.created;
                    report.notifications_refreshed += stats.refreshed;
                    report.emails_enqueued += stats.emails_enqueued;
                }
                Err(err) if err.is_fatal() => {
                    error!(disaster_id = %disaster.id, error = %err, "fatal error during fan-out");
                    return Err(err);
                }
                Err(err) => {
                    report.disasters_failed += 1;
                    warn!(
                        disaster_id = %disaster.id,
                        error = %err,
                        "fan-out failed; disaster stays pending"
                    );
                }
            }
        }

        histogram!("disaster_cycle_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            fetched = report.fetched,
            ingested = report.ingested,
            skipped = report.skipped,
            fanned_out = report.disasters_fanned_out,
            failed = report.disasters_failed,
            created = report.notifications_created,
            refreshed = report.notifications_refreshed,
            emails = report.emails_enqueued,
            "ingestion cycle complete"
        );

        Ok(report)
    }

    async fn fan_out(
        &self,
        disaster: &Disaster,
        now: DateTime<Utc>,
    ) -> Result<FanOutStats, PipelineError> {
        let matched = self.matcher.find_affected(disaster).await?;
        let stats = self.planner.fan_out(disaster, &matched, now).await?;
        self.disasters.mark_fanout_complete(&disaster.id, now).await?;
        Ok(stats)
    }
}
