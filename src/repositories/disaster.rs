//! # Disaster Repository
//!
//! Idempotent storage of FEMA declarations keyed by their external id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::Expr,
};
use tracing::debug;

use crate::domain::Disaster;
use crate::error::{RepositoryError, is_unique_violation};
use crate::models::fema_disaster::{self, ActiveModel as FemaDisasterActiveModel};
use crate::models::FemaDisaster;

/// What an upsert did to the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisasterUpsert {
    Inserted,
    /// Row existed and at least one field changed
    Updated { material: bool },
    /// Row existed with identical content
    Unchanged,
}

impl DisasterUpsert {
    /// New or materially changed declarations are fanned out again.
    pub fn needs_fanout(&self) -> bool {
        matches!(
            self,
            DisasterUpsert::Inserted | DisasterUpsert::Updated { material: true }
        )
    }
}

#[async_trait]
pub trait DisasterStore: Send + Sync {
    /// Inserts the declaration or overwrites the stored non-key fields.
    async fn upsert_disaster(
        &self,
        disaster: &Disaster,
        now: DateTime<Utc>,
    ) -> Result<DisasterUpsert, RepositoryError>;

    /// Declarations whose notification fan-out has not completed, oldest first.
    async fn find_pending_fanout(&self, limit: u64) -> Result<Vec<Disaster>, RepositoryError>;

    async fn mark_fanout_complete(
        &self,
        disaster_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// SeaORM implementation over `fema_disasters`.
#[derive(Debug, Clone)]
pub struct DisasterRepository {
    db: DatabaseConnection,
}

impl DisasterRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, disaster_id: &str) -> Result<Option<Disaster>, RepositoryError> {
        Ok(FemaDisaster::find_by_id(disaster_id.to_string())
            .one(&self.db)
            .await?
            .map(Disaster::from))
    }

    pub async fn count(&self) -> Result<u64, RepositoryError> {
        use sea_orm::PaginatorTrait;
        Ok(FemaDisaster::find().count(&self.db).await?)
    }
}

fn apply_fields(active: &mut FemaDisasterActiveModel, disaster: &Disaster) {
    active.disaster_number = Set(disaster.disaster_number);
    active.fips_state_code = Set(disaster.fips_state_code);
    active.fips_county_code = Set(disaster.fips_county_code);
    active.declaration_date = Set(disaster.declaration_date.into());
    active.incident_begin_date = Set(disaster.incident_begin_date.map(Into::into));
    active.incident_end_date = Set(disaster.incident_end_date.map(Into::into));
    active.declaration_type = Set(disaster.declaration_type.clone());
    active.designated_area = Set(disaster.designated_area.clone());
    active.designated_incident_types = Set(disaster.designated_incident_types.clone());
    active.last_refresh = Set(disaster.last_refresh.into());
}

#[async_trait]
impl DisasterStore for DisasterRepository {
    async fn upsert_disaster(
        &self,
        disaster: &Disaster,
        now: DateTime<Utc>,
    ) -> Result<DisasterUpsert, RepositoryError> {
        let mut active = FemaDisasterActiveModel {
            id: Set(disaster.id.clone()),
            fanout_pending: Set(true),
            fanout_completed_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };
        apply_fields(&mut active, disaster);

        match FemaDisaster::insert(active)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => return Ok(DisasterUpsert::Inserted),
            Err(err) if is_unique_violation(&err) => {
                debug!(disaster_id = %disaster.id, "disaster already stored; updating in place");
            }
            Err(err) => return Err(err.into()),
        }

        let existing = FemaDisaster::find_by_id(disaster.id.clone())
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "fema_disaster",
                id: disaster.id.clone(),
            })?;

        let stored = Disaster::from(existing.clone());
        if stored == *disaster {
            return Ok(DisasterUpsert::Unchanged);
        }

        let material = stored.materially_differs(disaster);
        let mut active: FemaDisasterActiveModel = existing.into();
        apply_fields(&mut active, disaster);
        active.updated_at = Set(now.into());
        if material {
            active.fanout_pending = Set(true);
            active.fanout_completed_at = Set(None);
        }
        active.update(&self.db).await?;

        Ok(DisasterUpsert::Updated { material })
    }

    async fn find_pending_fanout(&self, limit: u64) -> Result<Vec<Disaster>, RepositoryError> {
        let rows = FemaDisaster::find()
            .filter(fema_disaster::Column::FanoutPending.eq(true))
            .order_by_asc(fema_disaster::Column::DeclarationDate)
            .order_by_asc(fema_disaster::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Disaster::from).collect())
    }

    async fn mark_fanout_complete(
        &self,
        disaster_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let now: sea_orm::prelude::DateTimeWithTimeZone = now.into();
        FemaDisaster::update_many()
            .col_expr(fema_disaster::Column::FanoutPending, Expr::value(false))
            .col_expr(fema_disaster::Column::FanoutCompletedAt, Expr::value(now))
            .filter(fema_disaster::Column::Id.eq(disaster_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
