//! # Repository Layer
//!
//! Narrow collaborator traits consumed by the pipeline, each with a SeaORM-backed
//! implementation. The pipeline depends only on the traits, which keeps matching,
//! planning and scheduling testable with in-memory fakes.

pub mod disaster;
pub mod lease;
pub mod location;
pub mod notification;
pub mod user;
pub mod watermark;

pub use disaster::{DisasterRepository, DisasterStore, DisasterUpsert};
pub use lease::{LeaseRepository, LeaseStore};
pub use location::{LocationDirectory, LocationRepository};
pub use notification::{NotificationRepository, NotificationStore};
pub use user::{UserDirectory, UserRepository};
pub use watermark::{PipelineStateRepository, WatermarkStore};
