use async_trait::async_trait;

use pulse_core::{AggregateSnapshot, RoomId};

/// Outbound side of the pipeline: hands fresh snapshots to whoever
/// subscribed to the room.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver to current subscribers; returns how many received it.
    /// Delivery is best-effort and never fails the caller.
    async fn publish(&self, room_id: &RoomId, snapshot: &AggregateSnapshot) -> usize;
}

/// Publisher for headless use (CLI tools, tests) where nobody listens.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, _room_id: &RoomId, _snapshot: &AggregateSnapshot) -> usize {
        0
    }
}
