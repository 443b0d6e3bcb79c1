//! # Domain Types
//!
//! Plain value types the pipeline passes between components. Repositories convert
//! SeaORM models into these so matching and planning never touch the ORM.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{
    disaster_notification, fema_disaster, location_address, user, user_preference,
};

/// FIPS (state, county) pair used as the matching key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdminCodes {
    pub state: i32,
    pub county: i32,
}

impl AdminCodes {
    pub fn new(state: i32, county: i32) -> Self {
        Self { state, county }
    }
}

impl fmt::Display for AdminCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:03}", self.state, self.county)
    }
}

/// A validated disaster declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disaster {
    pub id: String,
    pub disaster_number: i32,
    pub fips_state_code: i32,
    pub fips_county_code: i32,
    pub declaration_date: DateTime<Utc>,
    pub incident_begin_date: Option<DateTime<Utc>>,
    pub incident_end_date: Option<DateTime<Utc>>,
    pub declaration_type: String,
    pub designated_area: String,
    /// Comma-delimited incident codes, e.g. `"F,W"`
    pub designated_incident_types: Option<String>,
    pub last_refresh: DateTime<Utc>,
}

impl Disaster {
    pub fn admin_codes(&self) -> AdminCodes {
        AdminCodes::new(self.fips_state_code, self.fips_county_code)
    }

    /// Fields whose change warrants a new fan-out.
    pub fn materially_differs(&self, other: &Disaster) -> bool {
        self.fips_state_code != other.fips_state_code
            || self.fips_county_code != other.fips_county_code
            || self.declaration_type != other.declaration_type
            || self.designated_area != other.designated_area
            || self.designated_incident_types != other.designated_incident_types
    }
}

impl From<fema_disaster::Model> for Disaster {
    fn from(model: fema_disaster::Model) -> Self {
        Self {
            id: model.id,
            disaster_number: model.disaster_number,
            fips_state_code: model.fips_state_code,
            fips_county_code: model.fips_county_code,
            declaration_date: model.declaration_date.with_timezone(&Utc),
            incident_begin_date: model.incident_begin_date.map(|d| d.with_timezone(&Utc)),
            incident_end_date: model.incident_end_date.map(|d| d.with_timezone(&Utc)),
            declaration_type: model.declaration_type,
            designated_area: model.designated_area,
            designated_incident_types: model.designated_incident_types,
            last_refresh: model.last_refresh.with_timezone(&Utc),
        }
    }
}

/// A business location belonging to one company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationAddress {
    pub id: Uuid,
    pub company_id: Uuid,
    pub alias: Option<String>,
    pub street_address: String,
    pub city: String,
    pub state_province: String,
    pub postal_code: String,
    pub country: String,
    pub fips_state_code: i32,
    pub fips_county_code: i32,
}

impl LocationAddress {
    pub fn admin_codes(&self) -> AdminCodes {
        AdminCodes::new(self.fips_state_code, self.fips_county_code)
    }
}

impl From<location_address::Model> for LocationAddress {
    fn from(model: location_address::Model) -> Self {
        Self {
            id: model.id,
            company_id: model.company_id,
            alias: model.alias,
            street_address: model.street_address,
            city: model.city,
            state_province: model.state_province,
            postal_code: model.postal_code,
            country: model.country,
            fips_state_code: model.fips_state_code,
            fips_county_code: model.fips_county_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFrequency {
    #[default]
    Daily,
    Weekly,
}

impl NotificationFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationFrequency::Daily => "daily",
            NotificationFrequency::Weekly => "weekly",
        }
    }
}

impl FromStr for NotificationFrequency {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "daily" => Ok(NotificationFrequency::Daily),
            "weekly" => Ok(NotificationFrequency::Weekly),
            other => Err(format!("unknown notification frequency '{other}'")),
        }
    }
}

/// Per-user channel preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub email_enabled: bool,
    pub web_enabled: bool,
    pub frequency: NotificationFrequency,
}

impl Default for NotificationPreference {
    /// Users who never saved preferences receive everything.
    fn default() -> Self {
        Self {
            email_enabled: true,
            web_enabled: true,
            frequency: NotificationFrequency::Daily,
        }
    }
}

impl TryFrom<user_preference::Model> for NotificationPreference {
    type Error = RepositoryError;

    fn try_from(model: user_preference::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            email_enabled: model.email_enabled,
            web_enabled: model.web_notifications_enabled,
            frequency: model
                .notification_frequency
                .parse()
                .map_err(|msg: String| RepositoryError::invalid("user_preferences", msg))?,
        })
    }
}

/// A user of a company together with their stored preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyUser {
    pub id: Uuid,
    pub company_id: Uuid,
    pub company_name: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub preference: Option<NotificationPreference>,
}

impl CompanyUser {
    pub fn from_model(
        model: user::Model,
        company_name: Option<String>,
        preference: Option<NotificationPreference>,
    ) -> Self {
        Self {
            id: model.id,
            company_id: model.company_id,
            company_name,
            first_name: model.first_name,
            last_name: model.last_name,
            email: model.email,
            preference,
        }
    }

    pub fn effective_preference(&self) -> NotificationPreference {
        self.preference.unwrap_or_default()
    }

    /// Usable email address, if any.
    pub fn email_address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

/// Channels a notification is delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSet {
    pub web: bool,
    pub email: bool,
}

impl ChannelSet {
    pub fn is_empty(&self) -> bool {
        !self.web && !self.email
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Unread,
    Read,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Unread => "unread",
            NotificationStatus::Read => "read",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unread" => Ok(NotificationStatus::Unread),
            "read" => Ok(NotificationStatus::Read),
            other => Err(format!("unknown notification status '{other}'")),
        }
    }
}

/// Stored notification row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub disaster_id: String,
    pub location_address_id: Option<Uuid>,
    pub is_web: bool,
    pub is_email: bool,
    pub status: NotificationStatus,
    pub first_sent_at: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl TryFrom<disaster_notification::Model> for Notification {
    type Error = RepositoryError;

    fn try_from(model: disaster_notification::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            user_id: model.user_id,
            disaster_id: model.fema_disaster_id,
            location_address_id: model.location_address_id,
            is_web: model.is_web,
            is_email: model.is_email,
            status: model
                .notification_status
                .parse()
                .map_err(|msg: String| RepositoryError::invalid("disaster_notifications", msg))?,
            first_sent_at: model.first_sent_at.with_timezone(&Utc),
            last_sent_at: model.last_sent_at.with_timezone(&Utc),
            read_at: model.read_at.map(|d| d.with_timezone(&Utc)),
        })
    }
}

/// One unit of fan-out produced by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTask {
    pub user: CompanyUser,
    pub disaster: Disaster,
    pub location: LocationAddress,
    pub channels: ChannelSet,
}

/// Result of writing a [`NotificationTask`] to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationUpsert {
    /// First notification for this (user, disaster)
    Created(Notification),
    /// Existing row whose last-sent time and location were refreshed
    Refreshed(Notification),
}

impl NotificationUpsert {
    pub fn notification(&self) -> &Notification {
        match self {
            NotificationUpsert::Created(n) | NotificationUpsert::Refreshed(n) => n,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, NotificationUpsert::Created(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn disaster() -> Disaster {
        Disaster {
            id: "a".into(),
            disaster_number: 4800,
            fips_state_code: 25,
            fips_county_code: 17,
            declaration_date: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            incident_begin_date: None,
            incident_end_date: None,
            declaration_type: "DR".into(),
            designated_area: "Middlesex (County)".into(),
            designated_incident_types: Some("F".into()),
            last_refresh: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn end_date_change_is_not_material() {
        let original = disaster();
        let mut updated = original.clone();
        updated.incident_end_date = Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        updated.last_refresh = Utc.with_ymd_and_hms(2025, 2, 2, 0, 0, 0).unwrap();
        assert!(!original.materially_differs(&updated));

        updated.designated_incident_types = Some("F,W".into());
        assert!(original.materially_differs(&updated));
    }

    #[test]
    fn missing_preferences_enable_everything() {
        let user = CompanyUser {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            company_name: None,
            first_name: "Ada".into(),
            last_name: "L".into(),
            email: Some("  ".into()),
            preference: None,
        };
        let pref = user.effective_preference();
        assert!(pref.email_enabled && pref.web_enabled);
        assert_eq!(user.email_address(), None);
    }

    #[test]
    fn admin_codes_display_zero_padded() {
        assert_eq!(AdminCodes::new(6, 1).to_string(), "06/001");
    }
}
