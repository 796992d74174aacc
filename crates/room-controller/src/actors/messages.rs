//! Message types for actor communication.
//!
//! Request/reply messages carry a `oneshot` sender. Notices to connection
//! actors are fire-and-forget.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::dispatch::frames::{ChatMessage, ClientFrame, LeaveReason, PeerSummary, RoomSummary, ServerEvent};
use crate::engine::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportParameters,
};
use crate::errors::RcError;
use crate::session::{AppKind, ProducerSlotKind, RoomId, TransportDirection, Visibility};

use common::types::{ChannelId, Identity, IdentityId};
use serde::Serialize;
use tokio::sync::oneshot;

/// Who is asking: the identity and the channel it is speaking through.
///
/// Room operations other than `Join` only succeed for the live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity_id: IdentityId,
    pub channel_id: ChannelId,
}

/// A channel asking to become (or replace) the live channel of its identity.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub identity: Identity,
    pub channel_id: ChannelId,
    pub connection: ConnectionActorHandle,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// The identity was already in the room; an older channel was evicted
    /// (or the same channel re-joined).
    pub reconnected: bool,
    /// Everyone else in the room.
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaveOutcome {
    /// The peer was removed (its last channel left).
    pub removed: bool,
    /// The room has no peers left and refuses new joins.
    pub room_emptied: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeReply {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerState {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerState {
    pub producer_id: ProducerId,
    pub app_kind: AppKind,
    pub paused: bool,
}

/// Snapshot of one peer, for tests and diagnostics.
#[derive(Debug, Clone)]
pub struct PeerState {
    pub identity_id: IdentityId,
    pub live_channel: Option<ChannelId>,
    pub channel_count: usize,
    pub evictions: usize,
    pub muted: bool,
    pub speaking: bool,
    pub has_send_transport: bool,
    pub has_recv_transport: bool,
    pub producers: Vec<ProducerState>,
    pub consumers: Vec<ConsumerState>,
}

/// Snapshot of a room, for tests and diagnostics.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub peers: Vec<PeerState>,
    pub chat_messages: usize,
    pub closing: bool,
}

impl RoomState {
    #[must_use]
    pub fn peer(&self, identity_id: &str) -> Option<&PeerState> {
        self.peers.iter().find(|p| p.identity_id.as_str() == identity_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create a room and join its creator in one step.
    CreateRoom {
        room_id: RoomId,
        name: String,
        visibility: Visibility,
        creator: JoinRequest,
        respond_to: oneshot::Sender<Result<(RoomActorHandle, JoinOutcome), RcError>>,
    },

    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RcError>>,
    },

    ListRooms {
        visibility: Visibility,
        respond_to: oneshot::Sender<Vec<RoomSummary>>,
    },

    /// Delete the room if it has no peers. Replies whether it was deleted.
    ReleaseRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Delete unconditionally. The caller has already evacuated peers.
    DeleteRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and cancel every room actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<JoinOutcome, RcError>>,
    },

    /// The channel leaves (explicit `leave` or socket closed).
    Leave {
        caller: Caller,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    GetPeers {
        caller: Caller,
        respond_to: oneshot::Sender<Result<Vec<PeerSummary>, RcError>>,
    },

    GetCapabilities {
        caller: Caller,
        respond_to: oneshot::Sender<Result<RtpCapabilities, RcError>>,
    },

    CreateTransport {
        caller: Caller,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportParameters, RcError>>,
    },

    ConnectTransport {
        caller: Caller,
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    Produce {
        caller: Caller,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_kind: AppKind,
        respond_to: oneshot::Sender<Result<ProducerId, RcError>>,
    },

    Consume {
        caller: Caller,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        respond_to: oneshot::Sender<Result<ConsumeReply, RcError>>,
    },

    ConsumerReady {
        caller: Caller,
        consumer_id: ConsumerId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    CloseProducer {
        caller: Caller,
        slot: ProducerSlotKind,
        respond_to: oneshot::Sender<Result<Vec<ProducerId>, RcError>>,
    },

    SetProducerPaused {
        caller: Caller,
        slot: ProducerSlotKind,
        paused: bool,
        respond_to: oneshot::Sender<Result<bool, RcError>>,
    },

    CloseConsumer {
        caller: Caller,
        consumer_id: ConsumerId,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    ToggleMute {
        caller: Caller,
        respond_to: oneshot::Sender<Result<bool, RcError>>,
    },

    SetSpeaking {
        caller: Caller,
        speaking: bool,
        respond_to: oneshot::Sender<Result<(), RcError>>,
    },

    SendMessage {
        caller: Caller,
        text: String,
        respond_to: oneshot::Sender<Result<Vec<ChatMessage>, RcError>>,
    },

    GetMessages {
        caller: Caller,
        respond_to: oneshot::Sender<Result<Vec<ChatMessage>, RcError>>,
    },

    /// Registry asks whether the room is empty; an empty room stops
    /// accepting joins from this point on.
    SealIfEmpty {
        respond_to: oneshot::Sender<bool>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// A frame read from the socket.
    Inbound { frame: ClientFrame },

    /// Push an event to the client.
    Notify { event: ServerEvent },

    /// The room dropped this channel.
    Evicted { room_id: RoomId, reason: LeaveReason },

    Close { reason: String },

    Ping { respond_to: oneshot::Sender<()> },
}
