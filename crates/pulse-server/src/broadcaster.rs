use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pulse_core::{AggregateSnapshot, ConnectionId, RoomId};
use pulse_engine::Publisher;

use crate::wire::ServerMessage;

const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// One open socket. Messages go through a bounded queue drained by the
/// connection's writer task.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CLIENT_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

enum Delivery {
    Sent,
    Dropped,
    Gone,
}

/// Room-scoped fan-out of aggregate snapshots.
///
/// Owns the connection table and the room subscriptions, nothing else. A
/// connection may sit in any number of rooms; leaving the socket removes it
/// from all of them.
pub struct Broadcaster {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    max_send_queue: usize,
}

impl Broadcaster {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new connection and return its id and outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections
            .insert(id.clone(), Arc::new(Connection::new(id.clone(), tx)));
        (id, rx)
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Add the connection to the room. Returns false for unknown connections;
    /// subscribing twice is a no-op.
    pub fn subscribe(&self, id: &ConnectionId, room_id: &RoomId) -> bool {
        if !self.connections.contains_key(id) {
            return false;
        }
        let added = self
            .rooms
            .entry(room_id.clone())
            .or_default()
            .insert(id.clone());
        if added {
            debug!(connection_id = %id, room_id = %room_id, "subscribed");
        }
        true
    }

    /// Remove the connection from one room only.
    pub fn leave(&self, id: &ConnectionId, room_id: &RoomId) {
        let now_empty = match self.rooms.get_mut(room_id) {
            Some(mut members) => {
                members.remove(id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
        }
    }

    /// Drop the connection and every subscription it holds.
    pub fn unsubscribe(&self, id: &ConnectionId) {
        if let Some((_, conn)) = self.connections.remove(id) {
            conn.mark_disconnected();
        }
        for mut members in self.rooms.iter_mut() {
            members.remove(id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
    }

    pub fn subscribers(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |members| members.len())
    }

    /// Queue a message for one connection. A full queue drops the message.
    pub fn send_to(&self, id: &ConnectionId, message: String) -> bool {
        matches!(self.deliver(id, message), Delivery::Sent)
    }

    fn deliver(&self, id: &ConnectionId, message: String) -> Delivery {
        let Some(conn) = self.connection(id) else {
            return Delivery::Gone;
        };
        match conn.tx.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(
                    connection_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                Delivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Send a raw message to every subscriber of the room. Connections that
    /// are already gone are removed; that is not an error.
    pub fn publish_raw(&self, room_id: &RoomId, message: &str) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        for id in self.subscribers(room_id) {
            match self.deliver(&id, message.to_string()) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Gone => gone.push(id),
            }
        }

        for id in gone {
            debug!(connection_id = %id, room_id = %room_id, "dropping closed subscriber");
            self.unsubscribe(&id);
        }
        delivered
    }

    /// Remove connections that stopped answering pings.
    pub fn cleanup_dead_connections(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_alive() || !entry.value().is_connected())
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unsubscribe(id);
            info!(connection_id = %id, "cleaned up dead connection");
        }
        dead.len()
    }
}

#[async_trait]
impl Publisher for Broadcaster {
    async fn publish(&self, room_id: &RoomId, snapshot: &AggregateSnapshot) -> usize {
        match (ServerMessage::Aggregate { payload: snapshot }).to_json() {
            Ok(json) => self.publish_raw(room_id, &json),
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "failed to encode aggregate");
                0
            }
        }
    }
}

/// Periodically sweep connections that missed their heartbeats.
pub fn start_cleanup_task(
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = broadcaster.cleanup_dead_connections();
            if removed > 0 {
                info!(removed, "dead connection cleanup");
            }
        }
    })
}
