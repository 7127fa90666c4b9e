//! Exchanging operations and presence with peers.
//!
//! A [`Session`] runs over any [`Transport`]. Two strategies exist:
//! [`BroadcastTransport`] delivers directly to peers sharing a
//! [`BroadcastHub`], [`RelayTransport`] talks to a relay server over a
//! WebSocket.

mod broadcast;
mod relay;
mod session;
mod transport;

pub use broadcast::{BroadcastHub, BroadcastTransport};
pub use relay::RelayTransport;
pub use session::Session;
pub use transport::{Transport, TransportKind};

use crate::crdt::{Operation, VersionVector};
use crate::document::ClientId;
use crate::presence::PresenceRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message exchanged between peers of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WireMessage {
    /// One operation.
    Op(Operation),
    /// A participant's presence.
    Presence(PresenceRecord),
    /// A participant left the room.
    Leave { participant_id: ClientId },
    /// What a participant has applied. Peers answer with the operations it
    /// lacks.
    Sync {
        participant_id: ClientId,
        version: VersionVector,
    },
    /// Answer to a sync request.
    Ops {
        participant_id: ClientId,
        ops: Vec<Operation>,
    },
}

impl WireMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Messages sent to the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayRequest {
    /// Join a room
    Join { room: String, participant_id: ClientId },
    /// Leave current room
    Leave,
    /// Forward a message to the rest of the room
    Publish { message: WireMessage },
}

/// Messages received from the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RelayEvent {
    /// Confirm room join with the room's operation log
    Joined {
        room: String,
        peer_count: usize,
        #[serde(default)]
        ops: Vec<Operation>,
    },
    PeerJoined { participant_id: ClientId },
    PeerLeft { participant_id: ClientId },
    /// A message from another participant
    Message { from: ClientId, message: WireMessage },
    Error { message: String },
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// `synced` once the initial document state has been reconciled.
    Connected { synced: bool },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, ConnectionState::Connected { synced: true })
    }
}

/// What a session reports to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    PresenceUpdated(PresenceRecord),
    PresenceRemoved(ClientId),
    Error { message: String },
}

/// What a transport reports to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport can now send.
    Connected,
    /// The relay accepted the join and sent the room's log.
    Joined { peer_count: usize, ops: Vec<Operation> },
    PeerJoined(ClientId),
    PeerLeft(ClientId),
    Message(WireMessage),
    /// A non-fatal error reported by the other end.
    Error(String),
    Disconnected { error: Option<String> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Serialization(e.to_string())
    }
}
