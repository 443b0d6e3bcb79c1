//! # Lease Repository
//!
//! Named leases in `pipeline_leases`, used to keep a job single-flight across every
//! process sharing the database. Acquisition is an insert, or a guarded update that
//! only matches an expired lease or one the caller already holds.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::debug;
use uuid::Uuid;

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::PipelineLease;
use crate::models::pipeline_lease::{self, ActiveModel as PipelineLeaseActiveModel};

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Takes the lease for `ttl`. Returns `false` while another holder's lease is live.
    async fn try_acquire(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Drops the lease if `holder` still owns it.
    async fn release(&self, name: &str, holder: Uuid) -> Result<(), RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct LeaseRepository {
    db: DatabaseConnection,
}

impl LeaseRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, name: &str) -> Result<Option<pipeline_lease::Model>, RepositoryError> {
        Ok(PipelineLease::find_by_id(name.to_string())
            .one(&self.db)
            .await?)
    }
}

#[async_trait]
impl LeaseStore for LeaseRepository {
    async fn try_acquire(
        &self,
        name: &str,
        holder: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let now_tz: DateTimeWithTimeZone = now.into();
        let expires_at: DateTimeWithTimeZone = (now + ttl).into();

        let active = PipelineLeaseActiveModel {
            name: Set(name.to_string()),
            holder: Set(holder),
            expires_at: Set(expires_at),
            updated_at: Set(now_tz),
        };

        match PipelineLease::insert(active)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => {
                let taken = PipelineLease::update_many()
                    .col_expr(pipeline_lease::Column::Holder, Expr::value(holder))
                    .col_expr(pipeline_lease::Column::ExpiresAt, Expr::value(expires_at))
                    .col_expr(pipeline_lease::Column::UpdatedAt, Expr::value(now_tz))
                    .filter(pipeline_lease::Column::Name.eq(name))
                    .filter(
                        Condition::any()
                            .add(pipeline_lease::Column::ExpiresAt.lte(now_tz))
                            .add(pipeline_lease::Column::Holder.eq(holder)),
                    )
                    .exec(&self.db)
                    .await?;
                let acquired = taken.rows_affected == 1;
                debug!(lease = name, %holder, acquired, "lease already existed");
                Ok(acquired)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn release(&self, name: &str, holder: Uuid) -> Result<(), RepositoryError> {
        PipelineLease::delete_many()
            .filter(pipeline_lease::Column::Name.eq(name))
            .filter(pipeline_lease::Column::Holder.eq(holder))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
