//! # Email Dispatch Queue
//!
//! Durable at-least-once queue of [`EmailDispatchJob`]s backed by the `email_jobs`
//! table. The planner enqueues; the [`crate::consumer::EmailWorker`] claims batches,
//! acknowledges delivered messages and releases failed ones for redelivery.
//!
//! A claimed message stays invisible until its visibility timeout expires. Released
//! messages come back after an exponential backoff with jitter and are parked as
//! `dead` once they reach the attempt limit.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use rand::{Rng, thread_rng};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EmailWorkerConfig;
use crate::error::{RepositoryError, is_unique_violation};
use crate::mail::EmailDispatchJob;
use crate::models::EmailJob;
use crate::models::email_job::{self, ActiveModel as EmailJobActiveModel};

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_IN_FLIGHT: &str = "in_flight";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_DEAD: &str = "dead";

#[async_trait]
pub trait EmailDispatchQueue: Send + Sync {
    /// Enqueues the job. A second enqueue for the same notification returns the
    /// existing message with `created == false`.
    async fn enqueue(
        &self,
        job: &EmailDispatchJob,
        now: DateTime<Utc>,
    ) -> Result<Enqueued, RepositoryError>;
}

/// Result of [`EmailDispatchQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub message_id: Uuid,
    pub created: bool,
}

/// A message handed to a consumer by [`EmailJobQueue::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEmail {
    pub message_id: Uuid,
    pub claim_token: Uuid,
    /// Deliveries including this one
    pub attempts: i32,
    /// Serialized [`EmailDispatchJob`]
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Retry { available_at: DateTime<Utc> },
    Dead,
    /// The claim expired and another consumer owns the message now
    Stale,
}

/// Exponential backoff with jitter for failed deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_seconds: u64,
    pub max_seconds: u64,
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &EmailWorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_seconds: config.backoff_base_seconds,
            max_seconds: config.backoff_max_seconds,
            jitter_factor: config.jitter_factor,
        }
    }

    /// Delay before the next delivery after `prior_failures` earlier failures.
    pub fn backoff(&self, prior_failures: i32) -> Duration {
        let base = self.base_seconds as f64;
        let max = self.max_seconds as f64;
        let backoff = (base * 2_f64.powi(prior_failures.max(0))).min(max);
        let jitter = if self.jitter_factor > 0.0 && backoff > 0.0 {
            thread_rng().gen_range(0.0..(self.jitter_factor * backoff))
        } else {
            0.0
        };
        Duration::milliseconds(((backoff + jitter) * 1_000.0) as i64)
    }
}

#[derive(Debug, Clone)]
pub struct EmailJobQueue {
    db: DatabaseConnection,
    visibility_timeout: Duration,
    retry: RetryPolicy,
}

impl EmailJobQueue {
    pub fn new(db: DatabaseConnection, config: &EmailWorkerConfig) -> Self {
        Self {
            db,
            visibility_timeout: Duration::seconds(config.visibility_timeout_seconds as i64),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// Claims up to `limit` deliverable messages: queued ones that are due and
    /// in-flight ones whose visibility timeout expired.
    pub async fn claim(
        &self,
        limit: u64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueuedEmail>, RepositoryError> {
        let now_tz: DateTimeWithTimeZone = now.into();
        let locked_until: DateTimeWithTimeZone = (now + self.visibility_timeout).into();
        let token = Uuid::new_v4();
        let txn = self.db.begin().await?;

        // Expired deliveries that already used every attempt are not redelivered.
        let parked = EmailJob::update_many()
            .col_expr(email_job::Column::Status, Expr::value(STATUS_DEAD))
            .col_expr(email_job::Column::UpdatedAt, Expr::value(now_tz))
            .filter(email_job::Column::Status.eq(STATUS_IN_FLIGHT))
            .filter(email_job::Column::LockedUntil.lte(now_tz))
            .filter(email_job::Column::Attempts.gte(self.retry.max_attempts))
            .exec(&txn)
            .await?;
        if parked.rows_affected > 0 {
            warn!(
                count = parked.rows_affected,
                "parked expired email deliveries at the attempt limit"
            );
        }

        let eligible = EmailJob::find()
            .select_only()
            .column(email_job::Column::Id)
            .filter(deliverable(now_tz))
            .order_by_asc(email_job::Column::AvailableAt)
            .order_by_asc(email_job::Column::Id)
            .limit(limit)
            .into_tuple::<Uuid>()
            .all(&txn)
            .await?;

        if eligible.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        EmailJob::update_many()
            .col_expr(email_job::Column::Status, Expr::value(STATUS_IN_FLIGHT))
            .col_expr(email_job::Column::ClaimToken, Expr::value(token))
            .col_expr(email_job::Column::LockedUntil, Expr::value(locked_until))
            .col_expr(
                email_job::Column::Attempts,
                Expr::col(email_job::Column::Attempts).add(1),
            )
            .col_expr(email_job::Column::UpdatedAt, Expr::value(now_tz))
            .filter(email_job::Column::Id.is_in(eligible))
            .filter(deliverable(now_tz))
            .exec(&txn)
            .await?;

        let claimed = EmailJob::find()
            .filter(email_job::Column::ClaimToken.eq(token))
            .order_by_asc(email_job::Column::AvailableAt)
            .order_by_asc(email_job::Column::Id)
            .all(&txn)
            .await?;
        txn.commit().await?;

        counter!("email_queue_claimed_total").increment(claimed.len() as u64);
        debug!(count = claimed.len(), "claimed email jobs");

        Ok(claimed
            .into_iter()
            .map(|row| QueuedEmail {
                message_id: row.id,
                claim_token: token,
                attempts: row.attempts,
                body: row.payload.to_string(),
            })
            .collect())
    }

    /// Marks a delivered message as sent. Returns `false` if the claim was lost.
    pub async fn acknowledge(
        &self,
        message: &QueuedEmail,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now: DateTimeWithTimeZone = now.into();
        let result = EmailJob::update_many()
            .col_expr(email_job::Column::Status, Expr::value(STATUS_SENT))
            .col_expr(email_job::Column::SentAt, Expr::value(now))
            .col_expr(
                email_job::Column::LockedUntil,
                Expr::value(Option::<DateTimeWithTimeZone>::None),
            )
            .col_expr(email_job::Column::ClaimToken, Expr::value(Option::<Uuid>::None))
            .col_expr(email_job::Column::UpdatedAt, Expr::value(now))
            .filter(email_job::Column::Id.eq(message.message_id))
            .filter(email_job::Column::ClaimToken.eq(message.claim_token))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Returns a failed message to the queue with backoff, or parks it as dead.
    pub async fn release(
        &self,
        message: &QueuedEmail,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, RepositoryError> {
        let Some(row) = EmailJob::find_by_id(message.message_id)
            .filter(email_job::Column::ClaimToken.eq(message.claim_token))
            .one(&self.db)
            .await?
        else {
            return Ok(ReleaseOutcome::Stale);
        };

        let attempts = row.attempts;
        let mut active: EmailJobActiveModel = row.into();
        active.locked_until = Set(None);
        active.claim_token = Set(None);
        active.last_error = Set(Some(error.to_string()));
        active.updated_at = Set(now.into());

        let outcome = if attempts >= self.retry.max_attempts {
            active.status = Set(STATUS_DEAD.to_string());
            ReleaseOutcome::Dead
        } else {
            let available_at = now + self.retry.backoff(attempts - 1);
            active.status = Set(STATUS_QUEUED.to_string());
            active.available_at = Set(available_at.into());
            ReleaseOutcome::Retry { available_at }
        };
        active.update(&self.db).await?;

        Ok(outcome)
    }

    pub async fn find(&self, message_id: Uuid) -> Result<Option<email_job::Model>, RepositoryError> {
        Ok(EmailJob::find_by_id(message_id).one(&self.db).await?)
    }

    pub async fn count_by_status(&self, status: &str) -> Result<u64, RepositoryError> {
        Ok(EmailJob::find()
            .filter(email_job::Column::Status.eq(status))
            .count(&self.db)
            .await?)
    }
}

fn deliverable(now: DateTimeWithTimeZone) -> Condition {
    Condition::any()
        .add(
            Condition::all()
                .add(email_job::Column::Status.eq(STATUS_QUEUED))
                .add(email_job::Column::AvailableAt.lte(now)),
        )
        .add(
            Condition::all()
                .add(email_job::Column::Status.eq(STATUS_IN_FLIGHT))
                .add(email_job::Column::LockedUntil.lte(now)),
        )
}

#[async_trait]
impl EmailDispatchQueue for EmailJobQueue {
    async fn enqueue(
        &self,
        job: &EmailDispatchJob,
        now: DateTime<Utc>,
    ) -> Result<Enqueued, RepositoryError> {
        let notification_id = job
            .notification_uuid()
            .map_err(|err| RepositoryError::invalid("email_job", err.to_string()))?;
        let payload = serde_json::to_value(job)
            .map_err(|err| RepositoryError::invalid("email_job", err.to_string()))?;

        let id = Uuid::new_v4();
        let active = EmailJobActiveModel {
            id: Set(id),
            notification_id: Set(notification_id),
            payload: Set(payload),
            status: Set(STATUS_QUEUED.to_string()),
            attempts: Set(0),
            available_at: Set(now.into()),
            locked_until: Set(None),
            claim_token: Set(None),
            last_error: Set(None),
            sent_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match EmailJob::insert(active).exec_without_returning(&self.db).await {
            Ok(_) => Ok(Enqueued {
                message_id: id,
                created: true,
            }),
            Err(err) if is_unique_violation(&err) => {
                let existing = EmailJob::find()
                    .filter(email_job::Column::NotificationId.eq(notification_id))
                    .one(&self.db)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity: "email_job",
                        id: notification_id.to_string(),
                    })?;
                debug!(
                    notification_id = %notification_id,
                    message_id = %existing.id,
                    "email already queued for notification"
                );
                Ok(Enqueued {
                    message_id: existing.id,
                    created: false,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
