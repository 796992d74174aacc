//! Signaling event handlers.
//!
//! One handler per inbound event. Handlers translate payloads into registry
//! and room calls; all state lives in the actors.

use super::context::ChannelContext;
use super::frames::{ChatMessage, PeerSummary, RoomSummary};
use super::schema::{FieldRule, Schema, SchemaError};
use super::{AckMode, Dispatcher, EventHandler};
use crate::actors::messages::ConsumeReply;
use crate::engine::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportParameters,
};
use crate::errors::RcError;
use crate::session::{AppKind, ProducerSlotKind, RoomId, TransportDirection, Visibility};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const VISIBILITIES: &[&str] = &["public", "private"];
const DIRECTIONS: &[&str] = &["send", "recv"];
const MEDIA_KINDS: &[&str] = &["audio", "video"];
const APP_KINDS: &[&str] = &["audio", "screenShare-video", "screenShare-audio"];
const SLOTS: &[&str] = &["audio", "screenShare"];
const PAUSABLE_SLOTS: &[&str] = &["audio"];
const DTLS_ROLES: &[&str] = &["auto", "client", "server"];
const SPEAKER_STATES: &[&str] = &["add", "remove"];

/// Longest chat message accepted, in characters.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 2000;

const MAX_ID_CHARS: usize = 128;

/// Build the dispatcher with every signaling event registered.
///
/// # Errors
///
/// A `SchemaError` means a handler definition is broken.
pub fn build_dispatcher() -> Result<Dispatcher, SchemaError> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(CreateRoom)?;
    dispatcher.register(JoinRoom)?;
    dispatcher.register(Leave)?;
    dispatcher.register(GetRoomPeers)?;
    dispatcher.register(GetAllRooms)?;
    dispatcher.register(GetCapabilities)?;
    dispatcher.register(CreateTransport)?;
    dispatcher.register(ConnectTransport)?;
    dispatcher.register(Produce)?;
    dispatcher.register(Consume)?;
    dispatcher.register(ConsumerReady)?;
    dispatcher.register(CloseProducer)?;
    dispatcher.register(PauseProducer)?;
    dispatcher.register(ResumeProducer)?;
    dispatcher.register(CloseConsumer)?;
    dispatcher.register(MuteToggle)?;
    dispatcher.register(ActiveSpeaker)?;
    dispatcher.register(SendMessage)?;
    dispatcher.register(GetMessages)?;
    Ok(dispatcher)
}

fn room_id_from(raw: &str, path: &str) -> Result<RoomId, RcError> {
    RoomId::normalize(raw).ok_or_else(|| {
        RcError::invalid(
            path,
            "pattern",
            "must be 1-64 letters, digits, spaces, '_' or '-'",
        )
    })
}

fn id_rule() -> FieldRule {
    FieldRule::String {
        min: 1,
        max: MAX_ID_CHARS,
    }
}

// ----------------------------------------------------------------------------
// Rooms
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRoomPayload {
    pub name: String,
    pub visibility: Visibility,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEntered {
    pub success: bool,
    pub room_id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnected: Option<bool>,
    pub peers: Vec<PeerSummary>,
}

pub struct CreateRoom;

#[async_trait]
impl EventHandler for CreateRoom {
    type Payload = CreateRoomPayload;
    type Reply = RoomEntered;
    const NAME: &'static str = "createRoom";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(
            Schema::object()
                .required("name", FieldRule::String { min: 1, max: 64 })
                .required("visibility", FieldRule::OneOf(VISIBILITIES)),
        )
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: CreateRoomPayload,
    ) -> Result<RoomEntered, RcError> {
        let room_id = room_id_from(&payload.name, "payload.name")?;
        let request = ctx.join_request()?;

        let (room, outcome) = ctx
            .registry()
            .create_room(
                room_id.clone(),
                payload.name.trim().to_string(),
                payload.visibility,
                request,
            )
            .await?;

        // The new room is joined before the old one is left
        ctx.leave_room().await;
        ctx.enter_room(room);

        info!(
            target: "rc.dispatch",
            channel_id = %ctx.channel_id(),
            room_id = %room_id,
            visibility = payload.visibility.as_str(),
            "Room created by channel"
        );

        Ok(RoomEntered {
            success: true,
            room_id,
            reconnected: None,
            peers: outcome.peers,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: String,
}

pub struct JoinRoom;

#[async_trait]
impl EventHandler for JoinRoom {
    type Payload = JoinRoomPayload;
    type Reply = RoomEntered;
    const NAME: &'static str = "joinRoom";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("roomId", FieldRule::String { min: 1, max: 64 }))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: JoinRoomPayload,
    ) -> Result<RoomEntered, RcError> {
        let room_id = room_id_from(&payload.room_id, "payload.roomId")?;
        let request = ctx.join_request()?;

        let room = match ctx.current_room() {
            Ok(current) if current.room_id() == &room_id => current,
            _ => ctx.registry().get_room(room_id.clone()).await?,
        };
        let outcome = room.join(request).await?;

        if ctx.room_id() != Some(&room_id) {
            ctx.leave_room().await;
            ctx.enter_room(room);
        }

        Ok(RoomEntered {
            success: true,
            room_id,
            reconnected: Some(outcome.reconnected),
            peers: outcome.peers,
        })
    }
}

pub struct Leave;

#[async_trait]
impl EventHandler for Leave {
    type Payload = Value;
    type Reply = ();
    const NAME: &'static str = "leave";
    const ACK: AckMode = AckMode::NoAck;

    async fn handle(&self, ctx: &mut ChannelContext, _payload: Value) -> Result<(), RcError> {
        ctx.leave_room().await;
        Ok(())
    }
}

pub struct GetRoomPeers;

#[async_trait]
impl EventHandler for GetRoomPeers {
    type Payload = Value;
    type Reply = Vec<PeerSummary>;
    const NAME: &'static str = "getRoomPeers";
    const ACK: AckMode = AckMode::WithAck;

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        _payload: Value,
    ) -> Result<Vec<PeerSummary>, RcError> {
        ctx.current_room()?.get_peers(ctx.caller()?).await
    }
}

/// Public rooms only. Needs no identity.
pub struct GetAllRooms;

#[async_trait]
impl EventHandler for GetAllRooms {
    type Payload = Value;
    type Reply = Vec<RoomSummary>;
    const NAME: &'static str = "getAllRooms";
    const ACK: AckMode = AckMode::WithAck;
    const REQUIRES_IDENTITY: bool = false;

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        _payload: Value,
    ) -> Result<Vec<RoomSummary>, RcError> {
        ctx.registry().list_rooms(Visibility::Public).await
    }
}

pub struct GetCapabilities;

#[async_trait]
impl EventHandler for GetCapabilities {
    type Payload = Value;
    type Reply = RtpCapabilities;
    const NAME: &'static str = "getCapabilities";
    const ACK: AckMode = AckMode::WithAck;

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        _payload: Value,
    ) -> Result<RtpCapabilities, RcError> {
        ctx.current_room()?.get_capabilities(ctx.caller()?).await
    }
}

// ----------------------------------------------------------------------------
// Transports
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateTransportPayload {
    pub direction: TransportDirection,
}

pub struct CreateTransport;

#[async_trait]
impl EventHandler for CreateTransport {
    type Payload = CreateTransportPayload;
    type Reply = TransportParameters;
    const NAME: &'static str = "createTransport";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("direction", FieldRule::OneOf(DIRECTIONS)))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: CreateTransportPayload,
    ) -> Result<TransportParameters, RcError> {
        ctx.current_room()?
            .create_transport(ctx.caller()?, payload.direction)
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportPayload {
    pub direction: TransportDirection,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Serialize)]
pub struct Connected {
    pub connected: bool,
}

pub struct ConnectTransport;

#[async_trait]
impl EventHandler for ConnectTransport {
    type Payload = ConnectTransportPayload;
    type Reply = Connected;
    const NAME: &'static str = "connectTransport";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(
            Schema::object()
                .required("direction", FieldRule::OneOf(DIRECTIONS))
                .required(
                    "dtlsParameters",
                    FieldRule::Object(Some(
                        Schema::object()
                            .optional("role", FieldRule::OneOf(DTLS_ROLES))
                            .required("fingerprints", FieldRule::Array { min_items: 1 }),
                    )),
                ),
        )
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: ConnectTransportPayload,
    ) -> Result<Connected, RcError> {
        ctx.current_room()?
            .connect_transport(ctx.caller()?, payload.direction, payload.dtls_parameters)
            .await?;
        Ok(Connected { connected: true })
    }
}

// ----------------------------------------------------------------------------
// Producers and consumers
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducePayload {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub app_kind: AppKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Produced {
    pub producer_id: ProducerId,
}

pub struct Produce;

#[async_trait]
impl EventHandler for Produce {
    type Payload = ProducePayload;
    type Reply = Produced;
    const NAME: &'static str = "produce";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(
            Schema::object()
                .required("kind", FieldRule::OneOf(MEDIA_KINDS))
                .required(
                    "rtpParameters",
                    FieldRule::Object(Some(
                        Schema::object().required("codecs", FieldRule::Array { min_items: 1 }),
                    )),
                )
                .required("appKind", FieldRule::OneOf(APP_KINDS)),
        )
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: ProducePayload,
    ) -> Result<Produced, RcError> {
        let producer_id = ctx
            .current_room()?
            .produce(
                ctx.caller()?,
                payload.kind,
                payload.rtp_parameters,
                payload.app_kind,
            )
            .await?;
        Ok(Produced { producer_id })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumePayload {
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
}

pub struct Consume;

#[async_trait]
impl EventHandler for Consume {
    type Payload = ConsumePayload;
    type Reply = ConsumeReply;
    const NAME: &'static str = "consume";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(
            Schema::object()
                .required("producerId", id_rule())
                .required(
                    "rtpCapabilities",
                    FieldRule::Object(Some(
                        Schema::object().required("codecs", FieldRule::Array { min_items: 1 }),
                    )),
                ),
        )
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: ConsumePayload,
    ) -> Result<ConsumeReply, RcError> {
        ctx.current_room()?
            .consume(ctx.caller()?, payload.producer_id, payload.rtp_capabilities)
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerPayload {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Serialize)]
pub struct Resumed {
    pub resumed: bool,
}

pub struct ConsumerReady;

#[async_trait]
impl EventHandler for ConsumerReady {
    type Payload = ConsumerPayload;
    type Reply = Resumed;
    const NAME: &'static str = "consumerReady";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("consumerId", id_rule()))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: ConsumerPayload,
    ) -> Result<Resumed, RcError> {
        ctx.current_room()?
            .consumer_ready(ctx.caller()?, payload.consumer_id)
            .await?;
        Ok(Resumed { resumed: true })
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotPayload {
    pub kind: ProducerSlotKind,
}

#[derive(Debug, Serialize)]
pub struct ProducersClosed {
    pub closed: Vec<ProducerId>,
}

pub struct CloseProducer;

#[async_trait]
impl EventHandler for CloseProducer {
    type Payload = SlotPayload;
    type Reply = ProducersClosed;
    const NAME: &'static str = "closeProducer";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("kind", FieldRule::OneOf(SLOTS)))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: SlotPayload,
    ) -> Result<ProducersClosed, RcError> {
        let closed = ctx
            .current_room()?
            .close_producer(ctx.caller()?, payload.kind)
            .await?;
        Ok(ProducersClosed { closed })
    }
}

#[derive(Debug, Serialize)]
pub struct Paused {
    pub paused: bool,
}

async fn set_paused(
    ctx: &ChannelContext,
    slot: ProducerSlotKind,
    paused: bool,
) -> Result<Paused, RcError> {
    let paused = ctx
        .current_room()?
        .set_producer_paused(ctx.caller()?, slot, paused)
        .await?;
    Ok(Paused { paused })
}

pub struct PauseProducer;

#[async_trait]
impl EventHandler for PauseProducer {
    type Payload = SlotPayload;
    type Reply = Paused;
    const NAME: &'static str = "pauseProducer";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("kind", FieldRule::OneOf(PAUSABLE_SLOTS)))
    }

    async fn handle(&self, ctx: &mut ChannelContext, payload: SlotPayload) -> Result<Paused, RcError> {
        set_paused(ctx, payload.kind, true).await
    }
}

pub struct ResumeProducer;

#[async_trait]
impl EventHandler for ResumeProducer {
    type Payload = SlotPayload;
    type Reply = Paused;
    const NAME: &'static str = "resumeProducer";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("kind", FieldRule::OneOf(PAUSABLE_SLOTS)))
    }

    async fn handle(&self, ctx: &mut ChannelContext, payload: SlotPayload) -> Result<Paused, RcError> {
        set_paused(ctx, payload.kind, false).await
    }
}

#[derive(Debug, Serialize)]
pub struct ConsumerClosed {
    pub closed: bool,
}

pub struct CloseConsumer;

#[async_trait]
impl EventHandler for CloseConsumer {
    type Payload = ConsumerPayload;
    type Reply = ConsumerClosed;
    const NAME: &'static str = "closeConsumer";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("consumerId", id_rule()))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: ConsumerPayload,
    ) -> Result<ConsumerClosed, RcError> {
        ctx.current_room()?
            .close_consumer(ctx.caller()?, payload.consumer_id)
            .await?;
        Ok(ConsumerClosed { closed: true })
    }
}

// ----------------------------------------------------------------------------
// Presence and chat
// ----------------------------------------------------------------------------

pub struct MuteToggle;

#[async_trait]
impl EventHandler for MuteToggle {
    type Payload = Value;
    type Reply = ();
    const NAME: &'static str = "muteToggle";
    const ACK: AckMode = AckMode::NoAck;

    async fn handle(&self, ctx: &mut ChannelContext, _payload: Value) -> Result<(), RcError> {
        ctx.current_room()?.toggle_mute(ctx.caller()?).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerState {
    Add,
    Remove,
}

#[derive(Debug, Deserialize)]
pub struct ActiveSpeakerPayload {
    pub state: SpeakerState,
}

pub struct ActiveSpeaker;

#[async_trait]
impl EventHandler for ActiveSpeaker {
    type Payload = ActiveSpeakerPayload;
    type Reply = ();
    const NAME: &'static str = "activeSpeaker";
    const ACK: AckMode = AckMode::NoAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required("state", FieldRule::OneOf(SPEAKER_STATES)))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: ActiveSpeakerPayload,
    ) -> Result<(), RcError> {
        ctx.current_room()?
            .set_speaking(ctx.caller()?, payload.state == SpeakerState::Add)
            .await
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub text: String,
}

pub struct SendMessage;

#[async_trait]
impl EventHandler for SendMessage {
    type Payload = SendMessagePayload;
    type Reply = Vec<ChatMessage>;
    const NAME: &'static str = "sendMessage";
    const ACK: AckMode = AckMode::WithAck;

    fn schema() -> Option<Schema> {
        Some(Schema::object().required(
            "text",
            FieldRule::String {
                min: 1,
                max: MAX_CHAT_MESSAGE_CHARS,
            },
        ))
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: SendMessagePayload,
    ) -> Result<Vec<ChatMessage>, RcError> {
        ctx.current_room()?
            .send_message(ctx.caller()?, payload.text)
            .await
    }
}

pub struct GetMessages;

#[async_trait]
impl EventHandler for GetMessages {
    type Payload = Value;
    type Reply = Vec<ChatMessage>;
    const NAME: &'static str = "getMessages";
    const ACK: AckMode = AckMode::WithAck;

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        _payload: Value,
    ) -> Result<Vec<ChatMessage>, RcError> {
        ctx.current_room()?.get_messages(ctx.caller()?).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActorHandle;
    use crate::actors::metrics::ActorMetrics;
    use crate::actors::registry::{RegistrySettings, RoomRegistryActorHandle};
    use crate::actors::room::RoomSettings;
    use crate::dispatch::frames::{AckFrame, ClientFrame, ServerFrame};
    use crate::engine::{simulated, TransportListenConfig};
    use crate::errors::ErrorCode;
    use common::types::{ChannelId, Identity};
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn registry() -> RoomRegistryActorHandle {
        RoomRegistryActorHandle::new(
            Arc::new(simulated::spawn_pool(1).unwrap()),
            RegistrySettings {
                max_rooms: 10,
                room: RoomSettings {
                    max_peers: 10,
                    chat_history_limit: 10,
                    listen: TransportListenConfig {
                        listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                        announced_ip: None,
                        port_min: 40_000,
                        port_max: 40_100,
                    },
                },
            },
            ActorMetrics::new(),
        )
    }

    fn context(registry: &RoomRegistryActorHandle, id: &str) -> ChannelContext {
        let channel_id = ChannelId::new();
        let (connection, _inbox) = ConnectionActorHandle::detached(channel_id);
        ChannelContext::new(
            channel_id,
            Some(Identity::new(id, id, None)),
            registry.clone(),
            connection,
        )
    }

    async fn call(
        dispatcher: &Dispatcher,
        ctx: &mut ChannelContext,
        event: &str,
        payload: Value,
    ) -> AckFrame {
        let frame = ClientFrame {
            event: event.to_string(),
            payload: Some(payload),
            ack: Some(1),
        };
        match dispatcher.dispatch(ctx, frame).await {
            Some(ServerFrame::Ack(ack)) => ack,
            other => panic!("expected ack, got {other:?}"),
        }
    }

    fn first_error(ack: AckFrame) -> (ErrorCode, Option<String>) {
        let errors = ack.errors.expect("expected errors");
        (errors[0].code, errors[0].path.clone())
    }

    #[test]
    fn test_all_events_registered() {
        let dispatcher = build_dispatcher().unwrap();
        assert_eq!(dispatcher.events().len(), 19);
        assert_eq!(dispatcher.ack_mode("leave"), Some(AckMode::NoAck));
        assert_eq!(dispatcher.ack_mode("muteToggle"), Some(AckMode::NoAck));
        assert_eq!(dispatcher.ack_mode("activeSpeaker"), Some(AckMode::NoAck));
        assert_eq!(dispatcher.ack_mode("produce"), Some(AckMode::WithAck));
    }

    #[tokio::test]
    async fn test_create_room_rejects_bad_name_and_visibility() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut ctx = context(&registry, "alice");

        let ack = call(
            &dispatcher,
            &mut ctx,
            "createRoom",
            json!({"name": "a/b", "visibility": "public"}),
        )
        .await;
        assert_eq!(
            first_error(ack),
            (ErrorCode::ValidationError, Some("payload.name".to_string()))
        );

        let ack = call(
            &dispatcher,
            &mut ctx,
            "createRoom",
            json!({"name": "ok", "visibility": "secret"}),
        )
        .await;
        assert_eq!(
            first_error(ack),
            (ErrorCode::ValidationError, Some("payload.visibility".to_string()))
        );
        assert!(ctx.room_id().is_none());
    }

    #[tokio::test]
    async fn test_create_then_join_from_second_identity() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut alice = context(&registry, "alice");
        let mut bob = context(&registry, "bob");

        let ack = call(
            &dispatcher,
            &mut alice,
            "createRoom",
            json!({"name": "Demo", "visibility": "private"}),
        )
        .await;
        let data = ack.data.unwrap();
        assert_eq!(data["success"], json!(true));
        assert_eq!(data["roomId"], json!("demo"));
        assert_eq!(data["peers"], json!([]));

        let ack = call(&dispatcher, &mut bob, "joinRoom", json!({"roomId": "DEMO"})).await;
        let data = ack.data.unwrap();
        assert_eq!(data["reconnected"], json!(false));
        assert_eq!(data["peers"][0]["id"], json!("alice"));
        assert_eq!(bob.room_id().unwrap().as_str(), "demo");
    }

    #[tokio::test]
    async fn test_join_missing_room_is_not_found() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut ctx = context(&registry, "alice");

        let ack = call(&dispatcher, &mut ctx, "joinRoom", json!({"roomId": "ghost"})).await;
        assert_eq!(first_error(ack).0, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_room_events_require_a_room() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut ctx = context(&registry, "alice");

        let ack = call(&dispatcher, &mut ctx, "getRoomPeers", json!({})).await;
        assert_eq!(first_error(ack).0, ErrorCode::NotFound);

        let ack = call(
            &dispatcher,
            &mut ctx,
            "createTransport",
            json!({"direction": "sideways"}),
        )
        .await;
        assert_eq!(
            first_error(ack),
            (ErrorCode::ValidationError, Some("payload.direction".to_string()))
        );
    }

    #[tokio::test]
    async fn test_chat_text_bounds() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut ctx = context(&registry, "alice");
        call(
            &dispatcher,
            &mut ctx,
            "createRoom",
            json!({"name": "chat", "visibility": "private"}),
        )
        .await;

        let ack = call(&dispatcher, &mut ctx, "sendMessage", json!({"text": ""})).await;
        assert_eq!(first_error(ack).1.as_deref(), Some("payload.text"));

        let long = "x".repeat(MAX_CHAT_MESSAGE_CHARS + 1);
        let ack = call(&dispatcher, &mut ctx, "sendMessage", json!({"text": long})).await;
        assert_eq!(first_error(ack).1.as_deref(), Some("payload.text"));

        let ack = call(&dispatcher, &mut ctx, "sendMessage", json!({"text": "hello"})).await;
        assert_eq!(ack.data.unwrap()[0]["text"], json!("hello"));
    }

    #[tokio::test]
    async fn test_get_all_rooms_lists_public_only() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut alice = context(&registry, "alice");
        let mut bob = context(&registry, "bob");
        call(
            &dispatcher,
            &mut alice,
            "createRoom",
            json!({"name": "open", "visibility": "public"}),
        )
        .await;
        call(
            &dispatcher,
            &mut bob,
            "createRoom",
            json!({"name": "closed", "visibility": "private"}),
        )
        .await;

        let ack = call(&dispatcher, &mut alice, "getAllRooms", json!({})).await;
        let rooms = ack.data.unwrap();
        assert_eq!(rooms.as_array().unwrap().len(), 1);
        assert_eq!(rooms[0]["id"], json!("open"));
        assert_eq!(rooms[0]["peerCount"], json!(1));
    }

    #[tokio::test]
    async fn test_switching_rooms_leaves_the_first() {
        let dispatcher = build_dispatcher().unwrap();
        let registry = registry();
        let mut alice = context(&registry, "alice");
        let mut bob = context(&registry, "bob");

        call(
            &dispatcher,
            &mut alice,
            "createRoom",
            json!({"name": "first", "visibility": "private"}),
        )
        .await;
        call(
            &dispatcher,
            &mut bob,
            "createRoom",
            json!({"name": "second", "visibility": "private"}),
        )
        .await;

        let ack = call(&dispatcher, &mut alice, "joinRoom", json!({"roomId": "second"})).await;
        assert!(ack.is_ok());

        // "first" lost its only peer and was released
        let result = registry.get_room(RoomId::normalize("first").unwrap()).await;
        assert!(matches!(result, Err(RcError::RoomNotFound(_))));
    }
}
