//! # Disaster Alerts Library
//!
//! Ingests FEMA disaster declarations, matches them to business locations and fans
//! notifications out to the affected companies' users over web and email.

pub mod config;
pub mod consumer;
pub mod db;
pub mod domain;
pub mod error;
pub mod feed;
pub mod incident;
pub mod ingest;
pub mod mail;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod queue;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub use migration;
