//! Database migrations for the disaster alert pipeline.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_09_01_000001_create_companies_and_users;
mod m2025_09_01_000002_create_location_addresses;
mod m2025_09_01_000003_create_fema_disasters;
mod m2025_09_01_000004_create_disaster_notifications;
mod m2025_09_01_000005_create_email_jobs;
mod m2025_09_01_000006_create_pipeline_state;
mod m2025_09_01_000007_create_pipeline_leases;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_09_01_000001_create_companies_and_users::Migration),
            Box::new(m2025_09_01_000002_create_location_addresses::Migration),
            Box::new(m2025_09_01_000003_create_fema_disasters::Migration),
            Box::new(m2025_09_01_000004_create_disaster_notifications::Migration),
            Box::new(m2025_09_01_000005_create_email_jobs::Migration),
            Box::new(m2025_09_01_000006_create_pipeline_state::Migration),
            Box::new(m2025_09_01_000007_create_pipeline_leases::Migration),
        ]
    }
}
