//! # Location Repository

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::domain::{AdminCodes, LocationAddress};
use crate::error::RepositoryError;
use crate::models::location_address;
use crate::models::LocationAddress as LocationAddressEntity;

#[async_trait]
pub trait LocationDirectory: Send + Sync {
    /// Locations whose (state, county) codes equal `codes`.
    async fn find_locations_by_admin_codes(
        &self,
        codes: AdminCodes,
    ) -> Result<Vec<LocationAddress>, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct LocationRepository {
    db: DatabaseConnection,
}

impl LocationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocationDirectory for LocationRepository {
    async fn find_locations_by_admin_codes(
        &self,
        codes: AdminCodes,
    ) -> Result<Vec<LocationAddress>, RepositoryError> {
        let rows = LocationAddressEntity::find()
            .filter(location_address::Column::FipsStateCode.eq(codes.state))
            .filter(location_address::Column::FipsCountyCode.eq(codes.county))
            .order_by_asc(location_address::Column::CompanyId)
            .order_by_asc(location_address::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(LocationAddress::from).collect())
    }
}
