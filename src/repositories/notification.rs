//! # Notification Repository
//!
//! Persists disaster notifications and their read state. The unique
//! `(user_id, fema_disaster_id)` index is the only guard against duplicate rows, so
//! creation always attempts the insert first and falls back to refreshing the row
//! that won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, prelude::DateTimeWithTimeZone, sea_query::Expr,
};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Notification, NotificationStatus, NotificationTask, NotificationUpsert};
use crate::error::{RepositoryError, is_unique_violation};
use crate::models::DisasterNotification;
use crate::models::disaster_notification::{self, ActiveModel as NotificationActiveModel};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn find_existing_notification(
        &self,
        user_id: Uuid,
        disaster_id: &str,
    ) -> Result<Option<Notification>, RepositoryError>;

    /// Creates the notification for the task's (user, disaster) or, if one exists,
    /// refreshes its last-sent time and triggering location.
    async fn upsert_notification(
        &self,
        task: &NotificationTask,
        now: DateTime<Utc>,
    ) -> Result<NotificationUpsert, RepositoryError>;
}

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    db: DatabaseConnection,
}

impl NotificationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Most recently sent notifications of a user, optionally filtered by status.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<NotificationStatus>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let mut query = DisasterNotification::find()
            .filter(disaster_notification::Column::UserId.eq(user_id));
        if let Some(status) = status {
            query = query.filter(disaster_notification::Column::NotificationStatus.eq(status.as_str()));
        }

        query
            .order_by_desc(disaster_notification::Column::LastSentAt)
            .order_by_asc(disaster_notification::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    pub async fn count_unread(&self, user_id: Uuid) -> Result<u64, RepositoryError> {
        Ok(DisasterNotification::find()
            .filter(disaster_notification::Column::UserId.eq(user_id))
            .filter(
                disaster_notification::Column::NotificationStatus
                    .eq(NotificationStatus::Unread.as_str()),
            )
            .count(&self.db)
            .await?)
    }

    pub async fn mark_read(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Notification, RepositoryError> {
        self.set_status(notification_id, NotificationStatus::Read, now)
            .await
    }

    pub async fn mark_unread(
        &self,
        notification_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Notification, RepositoryError> {
        self.set_status(notification_id, NotificationStatus::Unread, now)
            .await
    }

    /// Marks every unread notification of the user as read; returns how many changed.
    pub async fn mark_all_read(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let now: DateTimeWithTimeZone = now.into();
        let result = DisasterNotification::update_many()
            .col_expr(
                disaster_notification::Column::NotificationStatus,
                Expr::value(NotificationStatus::Read.as_str()),
            )
            .col_expr(disaster_notification::Column::ReadAt, Expr::value(now))
            .col_expr(disaster_notification::Column::UpdatedAt, Expr::value(now))
            .filter(disaster_notification::Column::UserId.eq(user_id))
            .filter(
                disaster_notification::Column::NotificationStatus
                    .eq(NotificationStatus::Unread.as_str()),
            )
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn set_status(
        &self,
        notification_id: Uuid,
        status: NotificationStatus,
        now: DateTime<Utc>,
    ) -> Result<Notification, RepositoryError> {
        let existing = DisasterNotification::find_by_id(notification_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "disaster_notification",
                id: notification_id.to_string(),
            })?;

        let mut active: NotificationActiveModel = existing.into();
        active.notification_status = Set(status.as_str().to_string());
        active.read_at = Set(match status {
            NotificationStatus::Read => Some(now.into()),
            NotificationStatus::Unread => None,
        });
        active.updated_at = Set(now.into());
        Notification::try_from(active.update(&self.db).await?)
    }

    async fn refresh_existing(
        &self,
        task: &NotificationTask,
        now: DateTime<Utc>,
    ) -> Result<Notification, RepositoryError> {
        let existing = DisasterNotification::find()
            .filter(disaster_notification::Column::UserId.eq(task.user.id))
            .filter(disaster_notification::Column::FemaDisasterId.eq(task.disaster.id.as_str()))
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "disaster_notification",
                id: format!("{}/{}", task.user.id, task.disaster.id),
            })?;

        // Email only ever goes out on creation, so is_email keeps its original value.
        let is_web = existing.is_web || task.channels.web;
        let mut active: NotificationActiveModel = existing.into();
        active.last_sent_at = Set(now.into());
        active.location_address_id = Set(Some(task.location.id));
        active.is_web = Set(is_web);
        active.updated_at = Set(now.into());
        Notification::try_from(active.update(&self.db).await?)
    }
}

#[async_trait]
impl NotificationStore for NotificationRepository {
    async fn find_existing_notification(
        &self,
        user_id: Uuid,
        disaster_id: &str,
    ) -> Result<Option<Notification>, RepositoryError> {
        DisasterNotification::find()
            .filter(disaster_notification::Column::UserId.eq(user_id))
            .filter(disaster_notification::Column::FemaDisasterId.eq(disaster_id))
            .one(&self.db)
            .await?
            .map(Notification::try_from)
            .transpose()
    }

    async fn upsert_notification(
        &self,
        task: &NotificationTask,
        now: DateTime<Utc>,
    ) -> Result<NotificationUpsert, RepositoryError> {
        let id = Uuid::new_v4();
        let active = NotificationActiveModel {
            id: Set(id),
            user_id: Set(task.user.id),
            fema_disaster_id: Set(task.disaster.id.clone()),
            location_address_id: Set(Some(task.location.id)),
            is_web: Set(task.channels.web),
            is_email: Set(task.channels.email),
            notification_status: Set(NotificationStatus::Unread.as_str().to_string()),
            first_sent_at: Set(now.into()),
            last_sent_at: Set(now.into()),
            read_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        match DisasterNotification::insert(active)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(_) => Ok(NotificationUpsert::Created(Notification {
                id,
                user_id: task.user.id,
                disaster_id: task.disaster.id.clone(),
                location_address_id: Some(task.location.id),
                is_web: task.channels.web,
                is_email: task.channels.email,
                status: NotificationStatus::Unread,
                first_sent_at: now,
                last_sent_at: now,
                read_at: None,
            })),
            Err(err) if is_unique_violation(&err) => {
                debug!(
                    user_id = %task.user.id,
                    disaster_id = %task.disaster.id,
                    "notification exists; refreshing"
                );
                self.refresh_existing(task, now)
                    .await
                    .map(NotificationUpsert::Refreshed)
            }
            Err(err) => Err(err.into()),
        }
    }
}
