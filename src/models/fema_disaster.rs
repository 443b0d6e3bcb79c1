//! FemaDisaster entity model
//!
//! Stores one row per declaration record returned by the FEMA feed, keyed by the
//! feed's own id.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "fema_disasters")]
pub struct Model {
    /// External declaration id (natural key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub disaster_number: i32,

    pub fips_state_code: i32,

    pub fips_county_code: i32,

    pub declaration_date: DateTimeWithTimeZone,

    pub incident_begin_date: Option<DateTimeWithTimeZone>,

    pub incident_end_date: Option<DateTimeWithTimeZone>,

    /// Two letter declaration type (`DR`, `EM`, `FM`)
    pub declaration_type: String,

    pub designated_area: String,

    /// Comma-delimited single character incident codes
    pub designated_incident_types: Option<String>,

    /// Feed-side `lastRefresh` of the version we stored
    pub last_refresh: DateTimeWithTimeZone,

    /// True until notification fan-out for the current version has completed
    pub fanout_pending: bool,

    pub fanout_completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::disaster_notification::Entity")]
    DisasterNotification,
}

impl Related<super::disaster_notification::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DisasterNotification.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
