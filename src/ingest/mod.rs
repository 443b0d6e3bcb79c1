//! # Disaster Ingestion
//!
//! Pulls declarations from the feed, validates each record on its own and upserts the
//! valid ones. Only declarations that are new or materially changed are handed on to
//! matching.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Months, Utc};
use metrics::counter;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::domain::Disaster;
use crate::error::PipelineError;
use crate::feed::{DeclarationFeed, FeedQuery};
use crate::repositories::{DisasterStore, DisasterUpsert};

mod validation;

pub use validation::{ValidationError, validate_declaration};

/// Summary of one ingestion pass.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// Records returned by the feed
    pub fetched: usize,
    /// Rows inserted or updated
    pub ingested: usize,
    /// Records rejected by validation
    pub skipped: usize,
    /// Re-fetched records that matched the stored row exactly
    pub unchanged: usize,
    /// New or materially changed declarations, in feed order
    pub changed: Vec<Disaster>,
    /// Watermark to use for the next pass
    pub new_watermark: DateTime<Utc>,
}

impl IngestOutcome {
    pub fn changed_ids(&self) -> Vec<&str> {
        self.changed.iter().map(|d| d.id.as_str()).collect()
    }
}

pub struct DisasterIngestor {
    feed: Arc<dyn DeclarationFeed>,
    store: Arc<dyn DisasterStore>,
    lookback_months: u32,
}

impl DisasterIngestor {
    pub fn new(
        feed: Arc<dyn DeclarationFeed>,
        store: Arc<dyn DisasterStore>,
        lookback_months: u32,
    ) -> Self {
        Self {
            feed,
            store,
            lookback_months,
        }
    }

    /// Start of the trailing declaration-date window relative to `now`.
    pub fn lookback_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or_else(|| now - Duration::days(30 * i64::from(self.lookback_months)))
    }

    /// Fetches declarations refreshed after `since` and upserts them.
    ///
    /// A feed failure or an unreachable store aborts the pass; invalid records are
    /// logged and skipped.
    #[instrument(skip(self), fields(since = %since))]
    pub async fn ingest(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, PipelineError> {
        let query = FeedQuery {
            declared_since: self.lookback_start(now),
            refreshed_after: since,
        };
        let records = self.feed.fetch_declarations(query).await?;

        let mut outcome = IngestOutcome {
            fetched: records.len(),
            ingested: 0,
            skipped: 0,
            unchanged: 0,
            changed: Vec::new(),
            new_watermark: since,
        };
        let mut seen_changed = HashSet::new();

        for record in &records {
            let disaster = match validate_declaration(record) {
                Ok(disaster) => disaster,
                Err(err) => {
                    outcome.skipped += 1;
                    counter!("disaster_ingest_records_total", "outcome" => "invalid").increment(1);
                    warn!(
                        record_id = record_id(record),
                        error = %err,
                        "skipping invalid FEMA declaration"
                    );
                    continue;
                }
            };

            let result = self.store.upsert_disaster(&disaster, now).await?;
            counter!("disaster_ingest_records_total", "outcome" => outcome_label(result))
                .increment(1);

            match result {
                DisasterUpsert::Unchanged => outcome.unchanged += 1,
                DisasterUpsert::Inserted | DisasterUpsert::Updated { .. } => outcome.ingested += 1,
            }

            if disaster.last_refresh > outcome.new_watermark {
                outcome.new_watermark = disaster.last_refresh;
            }

            if result.needs_fanout() && seen_changed.insert(disaster.id.clone()) {
                outcome.changed.push(disaster);
            }
        }

        info!(
            fetched = outcome.fetched,
            ingested = outcome.ingested,
            skipped = outcome.skipped,
            unchanged = outcome.unchanged,
            changed = outcome.changed.len(),
            new_watermark = %outcome.new_watermark,
            "FEMA ingestion complete"
        );

        Ok(outcome)
    }
}

fn outcome_label(result: DisasterUpsert) -> &'static str {
    match result {
        DisasterUpsert::Inserted => "inserted",
        DisasterUpsert::Updated { material: true } => "updated",
        DisasterUpsert::Updated { material: false } => "refreshed",
        DisasterUpsert::Unchanged => "unchanged",
    }
}

fn record_id(record: &Value) -> &str {
    record
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
}
