//! # Disaster Alert Email
//!
//! The [`EmailDispatchJob`] queue message, deterministic rendering of that message into
//! HTML and plain-text bodies, and the outbound [`EmailTransport`].
//!
//! A job is self-contained: everything the email needs is copied into the payload when
//! the notification is created, so sending never reads the database.

pub mod template;
pub mod transport;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::MailConfig;
use crate::domain::{Notification, NotificationTask};

pub use template::{RenderError, RenderedEmail, render};
pub use transport::{EmailTransport, LoggingTransport, SmtpEmailTransport, TransportError};

/// Queue message body for one disaster alert email.
///
/// Missing fields deserialize as empty so [`EmailDispatchJob::validate`] can name
/// exactly which one a malformed message lacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailDispatchJob {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub first_name: String,
    /// RFC 3339 timestamp of the declaration
    pub declaration_date: String,
    pub declaration_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    pub notification_id: String,
    /// OpenFEMA record id. Only checked for presence: the feed treats ids as opaque
    /// strings, so no UUID shape is enforced here.
    pub disaster_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobValidationError {
    #[error("email job is missing '{0}'")]
    MissingField(&'static str),
    #[error("email job recipient '{0}' is not an email address")]
    InvalidRecipient(String),
    #[error("email job notificationId '{0}' is not a UUID")]
    InvalidNotificationId(String),
}

/// Sender settings stamped onto every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub from_address: String,
    pub subject: String,
}

impl From<&MailConfig> for MailSettings {
    fn from(config: &MailConfig) -> Self {
        Self {
            from_address: config.from_address.clone(),
            subject: config.subject.clone(),
        }
    }
}

impl EmailDispatchJob {
    /// Builds the job for a freshly created notification. Returns `None` when the
    /// user has no usable address.
    pub fn for_task(
        task: &NotificationTask,
        notification: &Notification,
        settings: &MailSettings,
    ) -> Option<Self> {
        let to = task.user.email_address()?;
        Some(Self {
            to: to.to_string(),
            from: settings.from_address.clone(),
            subject: settings.subject.clone(),
            first_name: task.user.first_name.clone(),
            declaration_date: task
                .disaster
                .declaration_date
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            declaration_type: task.disaster.declaration_type.clone(),
            city: Some(task.location.city.clone()).filter(|city| !city.trim().is_empty()),
            notification_id: notification.id.to_string(),
            disaster_id: task.disaster.id.clone(),
            company_name: task.user.company_name.clone(),
        })
    }

    pub fn notification_uuid(&self) -> Result<Uuid, JobValidationError> {
        Uuid::parse_str(&self.notification_id)
            .map_err(|_| JobValidationError::InvalidNotificationId(self.notification_id.clone()))
    }

    /// Checks the fields rendering and sending rely on.
    pub fn validate(&self) -> Result<(), JobValidationError> {
        let required = [
            ("to", &self.to),
            ("from", &self.from),
            ("subject", &self.subject),
            ("firstName", &self.first_name),
            ("declarationDate", &self.declaration_date),
            ("declarationType", &self.declaration_type),
            ("notificationId", &self.notification_id),
            ("disasterId", &self.disaster_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(JobValidationError::MissingField(field));
            }
        }

        if !self.to.contains('@') {
            return Err(JobValidationError::InvalidRecipient(self.to.clone()));
        }
        self.notification_uuid()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ChannelSet, CompanyUser, Disaster, LocationAddress, NotificationStatus,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn task(email: Option<&str>) -> NotificationTask {
        let company_id = Uuid::new_v4();
        NotificationTask {
            user: CompanyUser {
                id: Uuid::new_v4(),
                company_id,
                company_name: Some("Acme Bakery".into()),
                first_name: "Rosa".into(),
                last_name: "Diaz".into(),
                email: email.map(str::to_string),
                preference: None,
            },
            disaster: Disaster {
                id: "6c2f3b0e-5d3a-4b8e-9d1c-0a3f5e7b9c11".into(),
                disaster_number: 4834,
                fips_state_code: 25,
                fips_county_code: 17,
                declaration_date: Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap(),
                incident_begin_date: None,
                incident_end_date: None,
                declaration_type: "DR".into(),
                designated_area: "Middlesex (County)".into(),
                designated_incident_types: Some("F".into()),
                last_refresh: Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap(),
            },
            location: LocationAddress {
                id: Uuid::new_v4(),
                company_id,
                alias: None,
                street_address: "12 Elm St".into(),
                city: "Cambridge".into(),
                state_province: "MA".into(),
                postal_code: "02139".into(),
                country: "US".into(),
                fips_state_code: 25,
                fips_county_code: 17,
            },
            channels: ChannelSet {
                web: true,
                email: true,
            },
        }
    }

    fn notification(task: &NotificationTask) -> Notification {
        let now = Utc.with_ymd_and_hms(2025, 9, 3, 0, 0, 0).unwrap();
        Notification {
            id: Uuid::new_v4(),
            user_id: task.user.id,
            disaster_id: task.disaster.id.clone(),
            location_address_id: Some(task.location.id),
            is_web: true,
            is_email: true,
            status: NotificationStatus::Unread,
            first_sent_at: now,
            last_sent_at: now,
            read_at: None,
        }
    }

    fn settings() -> MailSettings {
        MailSettings {
            from_address: "alerts@prisere.test".into(),
            subject: "FEMA Disaster Alert from Prisere".into(),
        }
    }

    #[test]
    fn job_carries_everything_needed_to_render() {
        let task = task(Some(" rosa@acme.test "));
        let notification = notification(&task);
        let job = EmailDispatchJob::for_task(&task, &notification, &settings()).unwrap();

        assert_eq!(job.to, "rosa@acme.test");
        assert_eq!(job.declaration_date, "2025-09-01T00:00:00Z");
        assert_eq!(job.city.as_deref(), Some("Cambridge"));
        assert_eq!(job.notification_id, notification.id.to_string());
        job.validate().unwrap();

        let body = serde_json::to_value(&job).unwrap();
        assert_eq!(body["firstName"], "Rosa");
        assert_eq!(body["companyName"], "Acme Bakery");
        assert_eq!(body["disasterId"], task.disaster.id);
    }

    #[test]
    fn no_address_no_job() {
        let task = task(None);
        let notification = notification(&task);
        assert!(EmailDispatchJob::for_task(&task, &notification, &settings()).is_none());
    }

    #[test]
    fn missing_fields_are_named() {
        let job: EmailDispatchJob = serde_json::from_value(json!({
            "to": "rosa@acme.test",
            "from": "alerts@prisere.test",
            "subject": "Alert",
            "declarationDate": "2025-09-01T00:00:00Z",
            "declarationType": "DR",
            "notificationId": Uuid::new_v4().to_string(),
            "disasterId": "d"
        }))
        .unwrap();
        assert_eq!(
            job.validate(),
            Err(JobValidationError::MissingField("firstName"))
        );
    }

    #[test]
    fn notification_id_must_be_uuid() {
        let task = task(Some("rosa@acme.test"));
        let notification = notification(&task);
        let mut job = EmailDispatchJob::for_task(&task, &notification, &settings()).unwrap();
        job.notification_id = "42".into();
        assert!(matches!(
            job.validate(),
            Err(JobValidationError::InvalidNotificationId(_))
        ));
    }

    #[test]
    fn disaster_id_is_opaque() {
        let task = task(Some("rosa@acme.test"));
        let notification = notification(&task);
        let mut job = EmailDispatchJob::for_task(&task, &notification, &settings()).unwrap();
        job.disaster_id = "DR-4834-MA".into();
        assert_eq!(job.validate(), Ok(()));

        job.disaster_id = "  ".into();
        assert_eq!(
            job.validate(),
            Err(JobValidationError::MissingField("disasterId"))
        );
    }
}
