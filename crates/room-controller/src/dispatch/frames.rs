//! Signaling wire frames.
//!
//! Client to server:
//!
//! ```json
//! { "event": "produce", "payload": { ... }, "ack": 7 }
//! ```
//!
//! Server to client, either an acknowledgement (exactly one of `data` and
//! `errors`) or a pushed event:
//!
//! ```json
//! { "type": "ack", "ack": 7, "data": { "producerId": "..." } }
//! { "type": "ack", "ack": 7, "errors": [{ "code": "CONFLICT", "message": "..." }] }
//! { "type": "event", "event": "peerJoined", "payload": { ... } }
//! ```

use crate::engine::{ConsumerId, MediaKind, ProducerId};
use crate::errors::ErrorDetail;
use crate::session::{AppKind, RoomId, Visibility};

use chrono::{DateTime, Utc};
use common::types::IdentityId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Inbound frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub ack: Option<u64>,
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Ack(AckFrame),
    Event(ServerEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AckFrame {
    pub ack: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorDetail>>,
}

impl AckFrame {
    #[must_use]
    pub fn ok(ack: u64, data: Value) -> Self {
        Self {
            ack,
            data: Some(data),
            errors: None,
        }
    }

    #[must_use]
    pub fn err(ack: u64, errors: Vec<ErrorDetail>) -> Self {
        Self {
            ack,
            data: None,
            errors: Some(errors),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_none()
    }
}

/// Public fields of a peer plus the producers it currently publishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: IdentityId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub muted: bool,
    pub speaking: bool,
    pub producers: Vec<ProducerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: ProducerId,
    pub app_kind: AppKind,
    pub kind: MediaKind,
}

/// Identity fields safe to broadcast outside a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicIdentity {
    pub id: IdentityId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub visibility: Visibility,
    pub peer_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub peer_id: IdentityId,
    pub name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Why a channel was told to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaveReason {
    /// A newer channel of the same identity joined the room.
    Replaced,
    /// The room controller is shutting down.
    Shutdown,
}

/// Events pushed to a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    NewProducer {
        producer_id: ProducerId,
        peer_id: IdentityId,
        app_kind: AppKind,
        kind: MediaKind,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerClosed {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
    },
    #[serde(rename_all = "camelCase")]
    ProducerClosed {
        producer_id: ProducerId,
        peer_id: IdentityId,
    },
    PeerJoined(PeerSummary),
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: IdentityId },
    #[serde(rename_all = "camelCase")]
    PeerJoinedRoom { room_id: RoomId, peer: PublicIdentity },
    RoomCreated(RoomSummary),
    #[serde(rename_all = "camelCase")]
    RoomDeleted { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    MuteChanged { peer_id: IdentityId, muted: bool },
    #[serde(rename_all = "camelCase")]
    ActiveSpeakerChanged { peer_id: IdentityId, speaking: bool },
    NewMessage(ChatMessage),
    #[serde(rename_all = "camelCase")]
    Leave { room_id: RoomId, reason: LeaveReason },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
        errors: Vec<ErrorDetail>,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewProducer { .. } => "newProducer",
            ServerEvent::ConsumerClosed { .. } => "consumerClosed",
            ServerEvent::ProducerClosed { .. } => "producerClosed",
            ServerEvent::PeerJoined(_) => "peerJoined",
            ServerEvent::PeerLeft { .. } => "peerLeft",
            ServerEvent::PeerJoinedRoom { .. } => "peerJoinedRoom",
            ServerEvent::RoomCreated(_) => "roomCreated",
            ServerEvent::RoomDeleted { .. } => "roomDeleted",
            ServerEvent::MuteChanged { .. } => "muteChanged",
            ServerEvent::ActiveSpeakerChanged { .. } => "activeSpeakerChanged",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::Leave { .. } => "leave",
            ServerEvent::Error { .. } => "error",
        }
    }
}
