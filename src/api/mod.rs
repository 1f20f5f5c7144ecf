//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (federation)
//! - Quote stamps
//! - Job introspection
//! - Well-known discovery
//! - Metrics (Prometheus)

mod activitypub;
mod jobs;
pub mod metrics;
mod stamps;
mod wellknown;

pub use activitypub::activitypub_router;
pub use jobs::jobs_router;
pub use metrics::metrics_router;
pub use stamps::stamps_router;
pub use wellknown::wellknown_router;
