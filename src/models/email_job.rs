//! EmailJob entity model
//!
//! Rows in `email_jobs` are the durable messages of the email dispatch queue. The
//! payload is the serialized [`crate::mail::EmailDispatchJob`].

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "email_jobs")]
pub struct Model {
    /// Message identifier reported back by the batch consumer
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub notification_id: Uuid,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// `queued`, `in_flight`, `sent` or `dead`
    pub status: String,

    /// Number of deliveries so far
    pub attempts: i32,

    /// Earliest time the message may be delivered
    pub available_at: DateTimeWithTimeZone,

    /// Visibility timeout of the current in-flight delivery
    pub locked_until: Option<DateTimeWithTimeZone>,

    pub claim_token: Option<Uuid>,

    pub last_error: Option<String>,

    pub sent_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
