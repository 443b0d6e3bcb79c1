//! # User Repository
//!
//! Resolves the users of a company along with their notification preferences.

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::domain::{CompanyUser, NotificationPreference};
use crate::error::RepositoryError;
use crate::models::{Company, User, UserPreference, user};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// All users of `company_id`; `preference` is `None` when the user never saved any.
    async fn find_users_and_preferences_by_company(
        &self,
        company_id: Uuid,
    ) -> Result<Vec<CompanyUser>, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    db: DatabaseConnection,
}

impl UserRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn find_users_and_preferences_by_company(
        &self,
        company_id: Uuid,
    ) -> Result<Vec<CompanyUser>, RepositoryError> {
        let company_name = Company::find_by_id(company_id)
            .one(&self.db)
            .await?
            .map(|company| company.name);

        let rows = User::find()
            .filter(user::Column::CompanyId.eq(company_id))
            .order_by_asc(user::Column::Id)
            .find_also_related(UserPreference)
            .all(&self.db)
            .await?;

        rows.into_iter()
            .map(|(user, preference)| -> Result<CompanyUser, RepositoryError> {
                let preference = preference
                    .map(NotificationPreference::try_from)
                    .transpose()?;
                Ok(CompanyUser::from_model(
                    user,
                    company_name.clone(),
                    preference,
                ))
            })
            .collect()
    }
}
