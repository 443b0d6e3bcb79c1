//! Test utilities for database testing.
//!
//! In-memory SQLite with every migration applied, plus fixture builders for the
//! company / user / location graph and a scripted FEMA feed.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use disaster_alerts::feed::{DeclarationFeed, FeedError, FeedQuery};
use disaster_alerts::models::{company, location_address, user, user_preference};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use serde_json::{Value, json};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

#[allow(dead_code)]
pub async fn insert_company(db: &DatabaseConnection, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    company::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

#[allow(dead_code)]
pub async fn insert_user(
    db: &DatabaseConnection,
    company_id: Uuid,
    first_name: &str,
    email: Option<&str>,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    user::ActiveModel {
        id: Set(id),
        company_id: Set(company_id),
        first_name: Set(first_name.to_string()),
        last_name: Set("Tester".to_string()),
        email: Set(email.map(str::to_string)),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

#[allow(dead_code)]
pub async fn insert_preferences(
    db: &DatabaseConnection,
    user_id: Uuid,
    email_enabled: bool,
    web_enabled: bool,
) -> Result<()> {
    user_preference::ActiveModel {
        user_id: Set(user_id),
        email_enabled: Set(email_enabled),
        web_notifications_enabled: Set(web_enabled),
        notification_frequency: Set("daily".to_string()),
        updated_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(())
}

#[allow(dead_code)]
pub async fn insert_location(
    db: &DatabaseConnection,
    company_id: Uuid,
    city: &str,
    state: i32,
    county: i32,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    location_address::ActiveModel {
        id: Set(id),
        company_id: Set(company_id),
        alias: Set(None),
        street_address: Set("1 Main St".to_string()),
        city: Set(city.to_string()),
        state_province: Set("MA".to_string()),
        postal_code: Set("02139".to_string()),
        country: Set("US".to_string()),
        fips_state_code: Set(state),
        fips_county_code: Set(county),
        created_at: Set(Utc::now().into()),
    }
    .insert(db)
    .await?;
    Ok(id)
}

/// A raw OpenFEMA declaration record.
#[allow(dead_code)]
pub fn declaration(id: &str, state: &str, county: &str, last_refresh: &str) -> Value {
    json!({
        "id": id,
        "disasterNumber": 4834,
        "fipsStateCode": state,
        "fipsCountyCode": county,
        "declarationDate": "2025-09-01T00:00:00.000Z",
        "incidentBeginDate": "2025-08-28T00:00:00.000Z",
        "incidentEndDate": null,
        "declarationType": "DR",
        "designatedArea": "Middlesex (County)",
        "designatedIncidentTypes": "F",
        "incidentType": "Flood",
        "lastRefresh": last_refresh
    })
}

/// Feed that replays scripted responses in order and records each query.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedFeed {
    responses: Mutex<VecDeque<Result<Vec<Value>, u16>>>,
    pub queries: Mutex<Vec<DateTime<Utc>>>,
}

#[allow(dead_code)]
impl ScriptedFeed {
    pub fn new(responses: Vec<Result<Vec<Value>, u16>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn refreshed_after(&self) -> Vec<DateTime<Utc>> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeclarationFeed for ScriptedFeed {
    async fn fetch_declarations(&self, query: FeedQuery) -> Result<Vec<Value>, FeedError> {
        self.queries.lock().unwrap().push(query.refreshed_after);
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(records)) => Ok(records),
            Some(Err(status)) => Err(FeedError::Status { status }),
            None => Ok(Vec::new()),
        }
    }
}
