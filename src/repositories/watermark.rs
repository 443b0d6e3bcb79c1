//! # Watermark Repository
//!
//! Durable copy of the feed refresh watermark in `pipeline_state`. The stored value
//! only ever moves forward.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::error::{RepositoryError, is_unique_violation};
use crate::models::PipelineState;
use crate::models::pipeline_state::{self, ActiveModel as PipelineStateActiveModel};

pub const FEMA_WATERMARK_KEY: &str = "fema_refresh_watermark";

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, RepositoryError>;

    /// Persists `watermark` unless the stored value is already later.
    async fn store(&self, watermark: DateTime<Utc>) -> Result<(), RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct PipelineStateRepository {
    db: DatabaseConnection,
    key: String,
}

impl PipelineStateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_key(db, FEMA_WATERMARK_KEY)
    }

    pub fn with_key(db: DatabaseConnection, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
        }
    }
}

#[async_trait]
impl WatermarkStore for PipelineStateRepository {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(PipelineState::find_by_id(self.key.clone())
            .one(&self.db)
            .await?
            .map(|row| row.value_at.with_timezone(&Utc)))
    }

    async fn store(&self, watermark: DateTime<Utc>) -> Result<(), RepositoryError> {
        let value_at: DateTimeWithTimeZone = watermark.into();
        let now: DateTimeWithTimeZone = Utc::now().into();
        let active = PipelineStateActiveModel {
            key: Set(self.key.clone()),
            value_at: Set(value_at),
            updated_at: Set(now),
        };

        match PipelineState::insert(active)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                PipelineState::update_many()
                    .col_expr(pipeline_state::Column::ValueAt, Expr::value(value_at))
                    .col_expr(pipeline_state::Column::UpdatedAt, Expr::value(now))
                    .filter(pipeline_state::Column::Key.eq(self.key.as_str()))
                    .filter(pipeline_state::Column::ValueAt.lt(value_at))
                    .exec(&self.db)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
