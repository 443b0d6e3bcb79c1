//! DisasterNotification entity model
//!
//! At most one row exists per `(user_id, fema_disaster_id)`; repeat matches refresh
//! `last_sent_at` on the existing row.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "disaster_notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub fema_disaster_id: String,

    /// Location whose codes most recently matched
    pub location_address_id: Option<Uuid>,

    pub is_web: bool,

    pub is_email: bool,

    /// `unread` or `read`
    pub notification_status: String,

    pub first_sent_at: DateTimeWithTimeZone,

    pub last_sent_at: DateTimeWithTimeZone,

    pub read_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::fema_disaster::Entity",
        from = "Column::FemaDisasterId",
        to = "super::fema_disaster::Column::Id"
    )]
    FemaDisaster,
    #[sea_orm(
        belongs_to = "super::location_address::Entity",
        from = "Column::LocationAddressId",
        to = "super::location_address::Column::Id"
    )]
    LocationAddress,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::fema_disaster::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FemaDisaster.def()
    }
}

impl Related<super::location_address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LocationAddress.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
