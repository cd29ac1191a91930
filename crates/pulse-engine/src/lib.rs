//! Feedback ingestion engine: validation, room locks, per-client cooldowns,
//! rolling-window aggregation and the publish hook for real-time fan-out.

pub mod aggregator;
pub mod error;
pub mod lock_gate;
pub mod pipeline;
pub mod publisher;
pub mod rate_limit;
pub mod store;

pub use aggregator::Aggregator;
pub use error::FeedbackError;
pub use lock_gate::{LockGate, LockStatus};
pub use pipeline::{Accepted, IngestionPipeline, Submission};
pub use publisher::{NullPublisher, Publisher};
pub use rate_limit::{CooldownDecision, RateLimiter};
pub use store::{EventStore, LockStore};
