//! # Email Batch Consumer
//!
//! Renders and sends queued disaster alert emails. Each message of a batch is handled
//! in its own task so one bad message cannot take the rest of the batch down; the
//! batch result lists only the messages that failed.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EmailWorkerConfig;
use crate::error::RepositoryError;
use crate::mail::{
    EmailDispatchJob, EmailTransport, JobValidationError, RenderError, TransportError, render,
};
use crate::queue::{EmailJobQueue, QueuedEmail, ReleaseOutcome};

/// One queue message as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub message_id: String,
    pub body: String,
}

impl From<&QueuedEmail> for EmailMessage {
    fn from(queued: &QueuedEmail) -> Self {
        Self {
            message_id: queued.message_id.to_string(),
            body: queued.body.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
    #[serde(skip)]
    pub reason: String,
}

/// Result of one batch: every message not listed in `batch_item_failures` was sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    #[serde(skip)]
    pub processed: usize,
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchOutcome {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|failure| failure.item_identifier.as_str())
            .collect()
    }

    pub fn is_failed(&self, message_id: &str) -> bool {
        self.batch_item_failures
            .iter()
            .any(|failure| failure.item_identifier == message_id)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("email job is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] JobValidationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub struct EmailBatchConsumer {
    transport: Arc<dyn EmailTransport>,
    concurrency: usize,
}

impl EmailBatchConsumer {
    pub fn new(transport: Arc<dyn EmailTransport>, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency: concurrency.max(1),
        }
    }

    /// Processes every message of the batch and reports the ones that failed.
    #[instrument(skip_all, fields(batch_size = batch.len()))]
    pub async fn process(&self, batch: Vec<EmailMessage>) -> BatchOutcome {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(batch.len());

        for message in batch {
            let semaphore = semaphore.clone();
            let transport = self.transport.clone();
            let message_id = message.message_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                dispatch(transport.as_ref(), &message.body).await
            });
            handles.push((message_id, handle));
        }

        let mut outcome = BatchOutcome::default();
        for (message_id, handle) in handles {
            outcome.processed += 1;
            let reason = match handle.await {
                Ok(Ok(())) => {
                    counter!("email_batch_messages_total", "outcome" => "sent").increment(1);
                    continue;
                }
                Ok(Err(err)) => {
                    warn!(message_id = %message_id, error = %err, "email job failed");
                    err.to_string()
                }
                Err(err) => {
                    error!(message_id = %message_id, error = ?err, "email task panicked or was cancelled");
                    err.to_string()
                }
            };
            counter!("email_batch_messages_total", "outcome" => "failed").increment(1);
            outcome.batch_item_failures.push(BatchItemFailure {
                item_identifier: message_id,
                reason,
            });
        }

        outcome
    }
}

async fn dispatch(transport: &dyn EmailTransport, body: &str) -> Result<(), DispatchError> {
    let job: EmailDispatchJob = serde_json::from_str(body)?;
    job.validate()?;
    let email = render(&job)?;
    transport.send(&email).await?;
    debug!(
        notification_id = %job.notification_id,
        disaster_id = %job.disaster_id,
        "email dispatched"
    );
    Ok(())
}

/// Counts for one drained batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Drains the durable email queue through an [`EmailBatchConsumer`].
pub struct EmailWorker {
    queue: Arc<EmailJobQueue>,
    consumer: EmailBatchConsumer,
    config: EmailWorkerConfig,
}

impl EmailWorker {
    pub fn new(
        queue: Arc<EmailJobQueue>,
        transport: Arc<dyn EmailTransport>,
        config: EmailWorkerConfig,
    ) -> Self {
        Self {
            queue,
            consumer: EmailBatchConsumer::new(transport, config.concurrency),
            config,
        }
    }

    /// Polls the queue until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting email worker");
        let tick_interval = TokioDuration::from_millis(self.config.tick_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Email worker shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let started = std::time::Instant::now();
                    if let Err(err) = self.drain_once().await {
                        error!(error = ?err, "Email worker tick failed");
                    }
                    histogram!("email_worker_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Email worker stopped");
    }

    /// Drains until the queue has nothing deliverable; used by the CLI.
    pub async fn drain_all(&self) -> Result<DrainReport, RepositoryError> {
        let mut total = DrainReport::default();
        loop {
            let report = self.drain_once().await?;
            if report.claimed == 0 {
                return Ok(total);
            }
            total.claimed += report.claimed;
            total.sent += report.sent;
            total.retried += report.retried;
            total.dead += report.dead;
        }
    }

    /// Claims one batch, sends it, and settles every message.
    pub async fn drain_once(&self) -> Result<DrainReport, RepositoryError> {
        let claimed = self.queue.claim(self.config.batch_size, Utc::now()).await?;
        let mut report = DrainReport {
            claimed: claimed.len(),
            ..DrainReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }

        let outcome = self
            .consumer
            .process(claimed.iter().map(EmailMessage::from).collect())
            .await;

        for message in &claimed {
            let message_id = message.message_id.to_string();
            let failure = outcome
                .batch_item_failures
                .iter()
                .find(|failure| failure.item_identifier == message_id);

            let now = Utc::now();
            match failure {
                None => {
                    if self.queue.acknowledge(message, now).await? {
                        report.sent += 1;
                    } else {
                        warn!(message_id = %message_id, "claim expired before acknowledgement");
                    }
                }
                Some(failure) => match self.queue.release(message, &failure.reason, now).await? {
                    ReleaseOutcome::Retry { available_at } => {
                        report.retried += 1;
                        debug!(
                            message_id = %message_id,
                            attempts = message.attempts,
                            available_at = %available_at,
                            "email job scheduled for retry"
                        );
                    }
                    ReleaseOutcome::Dead => {
                        report.dead += 1;
                        error!(
                            message_id = %message_id,
                            attempts = message.attempts,
                            reason = %failure.reason,
                            "email job exhausted its attempts"
                        );
                    }
                    ReleaseOutcome::Stale => {
                        warn!(message_id = %message_id, "claim expired before release");
                    }
                },
            }
        }

        info!(
            claimed = report.claimed,
            sent = report.sent,
            retried = report.retried,
            dead = report.dead,
            "email batch settled"
        );
        Ok(report)
    }
}
