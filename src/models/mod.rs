//! # Data Models
//!
//! SeaORM entities for every table the disaster alert pipeline reads or writes.

use serde::{Deserialize, Serialize};

pub mod company;
pub mod disaster_notification;
pub mod email_job;
pub mod fema_disaster;
pub mod location_address;
pub mod pipeline_lease;
pub mod pipeline_state;
pub mod user;
pub mod user_preference;

pub use company::Entity as Company;
pub use disaster_notification::Entity as DisasterNotification;
pub use email_job::Entity as EmailJob;
pub use fema_disaster::Entity as FemaDisaster;
pub use location_address::Entity as LocationAddress;
pub use pipeline_lease::Entity as PipelineLease;
pub use pipeline_state::Entity as PipelineState;
pub use user::Entity as User;
pub use user_preference::Entity as UserPreference;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "disaster-alerts".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
