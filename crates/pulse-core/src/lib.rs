//! Shared domain types for RoomPulse: ids, feedback categories, aggregate
//! snapshots, the clock abstraction and layered settings.

pub mod aggregate;
pub mod clock;
pub mod feedback;
pub mod ids;
pub mod settings;

pub use aggregate::{AggregateSnapshot, CategoryAggregate, ValueCounts};
pub use clock::{Clock, ManualClock, SystemClock};
pub use feedback::{Category, FeedbackEvent, RoomType, StoredEvent};
pub use ids::{ConnectionId, EventId, RoomId};
pub use settings::{PulseSettings, SettingsError};
