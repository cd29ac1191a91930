//! JSON messages exchanged over the `/ws` socket.

use serde::{Deserialize, Serialize};

use pulse_core::{AggregateSnapshot, ConnectionId, RoomId};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage<'a> {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: &'a ConnectionId,
    },
    Joined {
        #[serde(rename = "roomId")]
        room_id: &'a RoomId,
    },
    Left {
        #[serde(rename = "roomId")]
        room_id: &'a RoomId,
    },
    Aggregate {
        payload: &'a AggregateSnapshot,
    },
    Error {
        message: String,
    },
}

impl ServerMessage<'_> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
