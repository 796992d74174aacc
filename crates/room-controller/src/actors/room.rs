//! `RoomActor` - one actor per room, owning every peer in it.
//!
//! The actor serialises all in-room mutation: joins and reconnects, transport
//! and producer/consumer lifecycle, mute and speaker flags, chat. Engine calls
//! are awaited inside the actor, so no other message for the same room runs
//! until they complete.
//!
//! Notices to connections use `try_send` and never block. A room must not wait
//! on a connection, because that connection may itself be waiting on the room.
//!
//! # Cascade close
//!
//! Whenever producers close (explicit `closeProducer`, a send transport being
//! replaced, or their owner leaving), every consumer in the room fed by one
//! of them is closed at the engine and removed, and its owner's live channel
//! receives `consumerClosed`. Running the sweep twice closes nothing the
//! second time.

use super::connection::ConnectionActorHandle;
use super::messages::{
    Caller, ConsumeReply, ConsumerState, JoinOutcome, JoinRequest, LeaveOutcome, PeerState,
    ProducerState, RoomMessage, RoomState,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::dispatch::frames::{
    ChatMessage, LeaveReason, PeerSummary, PublicIdentity, RoomSummary, ServerEvent,
};
use crate::engine::{
    ConsumerId, DtlsParameters, EngineError, MediaConsumer, MediaKind, MediaProducer,
    MediaRouter, MediaTransport, ProducerId, RtpCapabilities, RtpParameters,
    TransportListenConfig, TransportParameters,
};
use crate::errors::RcError;
use crate::observability::metrics as prom;
use crate::session::{
    AppKind, Attach, Detach, Peer, ProducerSlotKind, RoomId, TransportDirection, Visibility,
};

use chrono::{DateTime, Utc};
use common::types::IdentityId;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const ROOM_CHANNEL_BUFFER: usize = 500;

/// Limits and engine settings applied to every room.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub max_peers: usize,
    pub chat_history_limit: usize,
    pub listen: TransportListenConfig,
}

/// Immutable description of a room.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub name: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
}

/// Handle to a `RoomActor`.
///
/// A room whose actor has stopped answers every request with
/// `RcError::RoomNotFound`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    info: Arc<RoomInfo>,
    peer_count: Arc<AtomicUsize>,
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.info.room_id
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.info.visibility
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.info.created_at
    }

    /// Peers currently in the room, as last published by the actor.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.info.room_id.clone(),
            name: self.info.name.clone(),
            visibility: self.info.visibility,
            peer_count: self.peer_count(),
            created_at: self.info.created_at,
        }
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RcError::RoomNotFound(self.info.room_id.to_string()))?;

        rx.await
            .map_err(|_| RcError::RoomNotFound(self.info.room_id.to_string()))
    }

    pub async fn join(&self, request: JoinRequest) -> Result<JoinOutcome, RcError> {
        self.ask(|respond_to| RoomMessage::Join {
            request,
            respond_to,
        })
        .await?
    }

    /// Detach the caller's channel. A room that is gone counts as left.
    pub async fn leave(&self, caller: Caller) -> LeaveOutcome {
        self.ask(|respond_to| RoomMessage::Leave { caller, respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn get_peers(&self, caller: Caller) -> Result<Vec<PeerSummary>, RcError> {
        self.ask(|respond_to| RoomMessage::GetPeers { caller, respond_to })
            .await?
    }

    pub async fn get_capabilities(&self, caller: Caller) -> Result<RtpCapabilities, RcError> {
        self.ask(|respond_to| RoomMessage::GetCapabilities { caller, respond_to })
            .await?
    }

    pub async fn create_transport(
        &self,
        caller: Caller,
        direction: TransportDirection,
    ) -> Result<TransportParameters, RcError> {
        self.ask(|respond_to| RoomMessage::CreateTransport {
            caller,
            direction,
            respond_to,
        })
        .await?
    }

    pub async fn connect_transport(
        &self,
        caller: Caller,
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RcError> {
        self.ask(|respond_to| RoomMessage::ConnectTransport {
            caller,
            direction,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn produce(
        &self,
        caller: Caller,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_kind: AppKind,
    ) -> Result<ProducerId, RcError> {
        self.ask(|respond_to| RoomMessage::Produce {
            caller,
            kind,
            rtp_parameters,
            app_kind,
            respond_to,
        })
        .await?
    }

    pub async fn consume(
        &self,
        caller: Caller,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumeReply, RcError> {
        self.ask(|respond_to| RoomMessage::Consume {
            caller,
            producer_id,
            rtp_capabilities,
            respond_to,
        })
        .await?
    }

    pub async fn consumer_ready(
        &self,
        caller: Caller,
        consumer_id: ConsumerId,
    ) -> Result<(), RcError> {
        self.ask(|respond_to| RoomMessage::ConsumerReady {
            caller,
            consumer_id,
            respond_to,
        })
        .await?
    }

    pub async fn close_producer(
        &self,
        caller: Caller,
        slot: ProducerSlotKind,
    ) -> Result<Vec<ProducerId>, RcError> {
        self.ask(|respond_to| RoomMessage::CloseProducer {
            caller,
            slot,
            respond_to,
        })
        .await?
    }

    /// Pause or resume a producer. Returns the resulting paused state.
    pub async fn set_producer_paused(
        &self,
        caller: Caller,
        slot: ProducerSlotKind,
        paused: bool,
    ) -> Result<bool, RcError> {
        self.ask(|respond_to| RoomMessage::SetProducerPaused {
            caller,
            slot,
            paused,
            respond_to,
        })
        .await?
    }

    pub async fn close_consumer(
        &self,
        caller: Caller,
        consumer_id: ConsumerId,
    ) -> Result<(), RcError> {
        self.ask(|respond_to| RoomMessage::CloseConsumer {
            caller,
            consumer_id,
            respond_to,
        })
        .await?
    }

    /// Flip the caller's mute flag. Returns the new value.
    pub async fn toggle_mute(&self, caller: Caller) -> Result<bool, RcError> {
        self.ask(|respond_to| RoomMessage::ToggleMute { caller, respond_to })
            .await?
    }

    pub async fn set_speaking(&self, caller: Caller, speaking: bool) -> Result<(), RcError> {
        self.ask(|respond_to| RoomMessage::SetSpeaking {
            caller,
            speaking,
            respond_to,
        })
        .await?
    }

    /// Post a chat message. Returns the room's history including it.
    pub async fn send_message(
        &self,
        caller: Caller,
        text: String,
    ) -> Result<Vec<ChatMessage>, RcError> {
        self.ask(|respond_to| RoomMessage::SendMessage {
            caller,
            text,
            respond_to,
        })
        .await?
    }

    pub async fn get_messages(&self, caller: Caller) -> Result<Vec<ChatMessage>, RcError> {
        self.ask(|respond_to| RoomMessage::GetMessages { caller, respond_to })
            .await?
    }

    /// Seal the room if it has no peers. A sealed room rejects joins.
    pub async fn seal_if_empty(&self) -> Result<bool, RcError> {
        self.ask(|respond_to| RoomMessage::SealIfEmpty { respond_to })
            .await
    }

    pub async fn get_state(&self) -> Result<RoomState, RcError> {
        self.ask(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

pub struct RoomActor {
    info: Arc<RoomInfo>,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    router: Arc<dyn MediaRouter>,
    settings: RoomSettings,
    peers: HashMap<IdentityId, Peer<ConnectionActorHandle>>,
    chat: VecDeque<ChatMessage>,
    lobby: broadcast::Sender<ServerEvent>,
    peer_count: Arc<AtomicUsize>,
    /// Set once the room was found empty by the registry. No joins after.
    closing: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a room actor around an already created router.
    ///
    /// `lobby` carries process-wide notices for public rooms.
    pub fn spawn(
        info: RoomInfo,
        router: Arc<dyn MediaRouter>,
        settings: RoomSettings,
        lobby: broadcast::Sender<ServerEvent>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let info = Arc::new(info);
        let peer_count = Arc::new(AtomicUsize::new(0));

        let actor = Self {
            info: Arc::clone(&info),
            receiver,
            cancel_token: cancel_token.clone(),
            router,
            settings,
            peers: HashMap::new(),
            chat: VecDeque::new(),
            lobby,
            peer_count: Arc::clone(&peer_count),
            closing: false,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, info.room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            info,
            peer_count,
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.info.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            visibility = self.info.visibility.as_str(),
            router_id = %self.router.id(),
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.room",
                        room_id = %self.info.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "rc.actor.room",
                                room_id = %self.info.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;

        info!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.join(request));
            }
            RoomMessage::Leave { caller, respond_to } => {
                let _ = respond_to.send(self.leave(&caller).await);
            }
            RoomMessage::GetPeers { caller, respond_to } => {
                let result = self
                    .live_peer(&caller)
                    .map(|_| self.peer_summaries(Some(&caller.identity_id)));
                let _ = respond_to.send(result);
            }
            RoomMessage::GetCapabilities { caller, respond_to } => {
                let result = self
                    .live_peer(&caller)
                    .map(|_| self.router.rtp_capabilities());
                let _ = respond_to.send(result);
            }
            RoomMessage::CreateTransport {
                caller,
                direction,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_transport(&caller, direction).await);
            }
            RoomMessage::ConnectTransport {
                caller,
                direction,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .connect_transport(&caller, direction, dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Produce {
                caller,
                kind,
                rtp_parameters,
                app_kind,
                respond_to,
            } => {
                let result = self
                    .produce(&caller, kind, rtp_parameters, app_kind)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Consume {
                caller,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .consume(&caller, producer_id, &rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomMessage::ConsumerReady {
                caller,
                consumer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.consumer_ready(&caller, &consumer_id).await);
            }
            RoomMessage::CloseProducer {
                caller,
                slot,
                respond_to,
            } => {
                let _ = respond_to.send(self.close_producer(&caller, slot).await);
            }
            RoomMessage::SetProducerPaused {
                caller,
                slot,
                paused,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_producer_paused(&caller, slot, paused).await);
            }
            RoomMessage::CloseConsumer {
                caller,
                consumer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.close_consumer(&caller, &consumer_id).await);
            }
            RoomMessage::ToggleMute { caller, respond_to } => {
                let _ = respond_to.send(self.toggle_mute(&caller));
            }
            RoomMessage::SetSpeaking {
                caller,
                speaking,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_speaking(&caller, speaking));
            }
            RoomMessage::SendMessage {
                caller,
                text,
                respond_to,
            } => {
                let _ = respond_to.send(self.send_message(&caller, text));
            }
            RoomMessage::GetMessages { caller, respond_to } => {
                let result = self
                    .live_peer(&caller)
                    .map(|_| self.chat.iter().cloned().collect());
                let _ = respond_to.send(result);
            }
            RoomMessage::SealIfEmpty { respond_to } => {
                if self.peers.is_empty() {
                    self.closing = true;
                }
                let _ = respond_to.send(self.closing);
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Peer session
    // ------------------------------------------------------------------------

    fn join(&mut self, request: JoinRequest) -> Result<JoinOutcome, RcError> {
        if self.closing {
            return Err(RcError::RoomNotFound(self.info.room_id.to_string()));
        }

        let JoinRequest {
            identity,
            channel_id,
            connection,
        } = request;
        let identity_id = identity.id.clone();

        if let Some(peer) = self.peers.get_mut(&identity_id) {
            peer.identity = identity;
            let reconnected = match peer.channels.attach(channel_id, connection) {
                Attach::Replaced(eviction) => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.info.room_id,
                        identity_id = %identity_id,
                        evicted_channel = %eviction.channel_id,
                        channel_id = %channel_id,
                        "Channel replaced by reconnect"
                    );
                    prom::record_reconnect_eviction();
                    if eviction
                        .handle
                        .evict(self.info.room_id.clone(), LeaveReason::Replaced)
                        .is_err()
                    {
                        prom::record_message_dropped(ActorType::Connection.as_str());
                    }
                    true
                }
                Attach::Unchanged | Attach::Fresh => false,
            };

            return Ok(JoinOutcome {
                reconnected,
                peers: self.peer_summaries(Some(&identity_id)),
            });
        }

        if self.peers.len() >= self.settings.max_peers {
            return Err(RcError::CapacityExceeded(format!(
                "room holds at most {} peers",
                self.settings.max_peers
            )));
        }

        let public = PublicIdentity {
            id: identity.id.clone(),
            name: identity.name.clone(),
            image: identity.image.clone(),
        };
        let mut peer = Peer::new(identity);
        peer.channels.attach(channel_id, connection);
        let summary = peer.summary();

        self.peers.insert(identity_id.clone(), peer);
        self.metrics.peer_added();
        self.sync_peer_count();

        info!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            identity_id = %identity_id,
            channel_id = %channel_id,
            peers = self.peers.len(),
            "Peer joined"
        );

        self.broadcast(Some(&identity_id), &ServerEvent::PeerJoined(summary));
        if self.info.visibility.is_public() {
            // No subscribers is fine
            let _ = self.lobby.send(ServerEvent::PeerJoinedRoom {
                room_id: self.info.room_id.clone(),
                peer: public,
            });
        }

        Ok(JoinOutcome {
            reconnected: false,
            peers: self.peer_summaries(Some(&identity_id)),
        })
    }

    async fn leave(&mut self, caller: &Caller) -> LeaveOutcome {
        let Some(peer) = self.peers.get_mut(&caller.identity_id) else {
            return LeaveOutcome::default();
        };

        match peer.channels.detach(caller.channel_id) {
            Detach::Stale => {
                debug!(
                    target: "rc.actor.room",
                    room_id = %self.info.room_id,
                    identity_id = %caller.identity_id,
                    channel_id = %caller.channel_id,
                    "Leave from stale channel ignored"
                );
                LeaveOutcome::default()
            }
            Detach::Removed { now_empty: false } => LeaveOutcome::default(),
            Detach::Removed { now_empty: true } => {
                self.teardown_peer(&caller.identity_id).await;
                LeaveOutcome {
                    removed: true,
                    room_emptied: self.peers.is_empty(),
                }
            }
        }
    }

    /// Remove a peer whose last channel left, releasing its media.
    async fn teardown_peer(&mut self, identity_id: &IdentityId) {
        let Some(mut peer) = self.peers.remove(identity_id) else {
            return;
        };
        self.metrics.peers_removed(1);
        self.sync_peer_count();

        let producers = peer.producers.take_all();
        let closed: Vec<ProducerId> = producers.iter().map(|p| p.id().clone()).collect();
        for producer in &producers {
            producer.close().await;
        }
        for (_, consumer) in peer.consumers.drain() {
            consumer.close().await;
        }
        for transport in peer.take_transports() {
            transport.close().await;
        }

        let cascaded = self.cascade_close(&closed).await;

        info!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            identity_id = %identity_id,
            producers_closed = closed.len(),
            consumers_cascaded = cascaded,
            peers = self.peers.len(),
            "Peer left"
        );

        self.broadcast(
            None,
            &ServerEvent::PeerLeft {
                peer_id: identity_id.clone(),
            },
        );
    }

    fn toggle_mute(&mut self, caller: &Caller) -> Result<bool, RcError> {
        let peer = self.live_peer_mut(caller)?;
        peer.muted = !peer.muted;
        let muted = peer.muted;

        self.broadcast(
            None,
            &ServerEvent::MuteChanged {
                peer_id: caller.identity_id.clone(),
                muted,
            },
        );
        Ok(muted)
    }

    fn set_speaking(&mut self, caller: &Caller, speaking: bool) -> Result<(), RcError> {
        let peer = self.live_peer_mut(caller)?;
        if peer.speaking == speaking {
            return Ok(());
        }
        peer.speaking = speaking;

        self.broadcast(
            None,
            &ServerEvent::ActiveSpeakerChanged {
                peer_id: caller.identity_id.clone(),
                speaking,
            },
        );
        Ok(())
    }

    fn send_message(&mut self, caller: &Caller, text: String) -> Result<Vec<ChatMessage>, RcError> {
        let peer = self.live_peer(caller)?;
        let message = ChatMessage {
            id: Uuid::new_v4(),
            peer_id: caller.identity_id.clone(),
            name: peer.identity.name.clone(),
            text,
            sent_at: Utc::now(),
        };

        self.chat.push_back(message.clone());
        while self.chat.len() > self.settings.chat_history_limit {
            self.chat.pop_front();
        }

        self.broadcast(Some(&caller.identity_id), &ServerEvent::NewMessage(message));
        Ok(self.chat.iter().cloned().collect())
    }

    // ------------------------------------------------------------------------
    // Transports
    // ------------------------------------------------------------------------

    async fn create_transport(
        &mut self,
        caller: &Caller,
        direction: TransportDirection,
    ) -> Result<TransportParameters, RcError> {
        self.live_peer(caller)?;

        let transport = self
            .router
            .create_webrtc_transport(&self.settings.listen)
            .await?;
        let parameters = transport.parameters();

        let peer = match self.live_peer_mut(caller) {
            Ok(peer) => peer,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };

        let Some(previous) = peer.set_transport(direction, transport) else {
            debug!(
                target: "rc.actor.room",
                room_id = %self.info.room_id,
                identity_id = %caller.identity_id,
                direction = direction.as_str(),
                transport_id = %parameters.id,
                "Transport created"
            );
            return Ok(parameters);
        };

        // Replacing a transport closes everything that ran over it
        match direction {
            TransportDirection::Send => {
                let producers = peer.producers.take_all();
                self.close_producers(&caller.identity_id, &producers).await;
            }
            TransportDirection::Recv => {
                let consumers: Vec<Arc<dyn MediaConsumer>> =
                    peer.consumers.drain().map(|(_, c)| c).collect();
                for consumer in consumers {
                    consumer.close().await;
                }
            }
        }
        previous.close().await;

        info!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            identity_id = %caller.identity_id,
            direction = direction.as_str(),
            old_transport_id = %previous.id(),
            transport_id = %parameters.id,
            "Transport replaced"
        );
        Ok(parameters)
    }

    async fn connect_transport(
        &self,
        caller: &Caller,
        direction: TransportDirection,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RcError> {
        let transport = self.transport_of(caller, direction)?;
        transport.connect(dtls_parameters).await?;
        Ok(())
    }

    fn transport_of(
        &self,
        caller: &Caller,
        direction: TransportDirection,
    ) -> Result<Arc<dyn MediaTransport>, RcError> {
        self.live_peer(caller)?
            .transport(direction)
            .cloned()
            .ok_or_else(|| RcError::TransportNotFound(direction.as_str().to_string()))
    }

    // ------------------------------------------------------------------------
    // Producers and consumers
    // ------------------------------------------------------------------------

    async fn produce(
        &mut self,
        caller: &Caller,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_kind: AppKind,
    ) -> Result<ProducerId, RcError> {
        let expected = app_kind.expected_kind();
        if kind != expected {
            return Err(RcError::invalid(
                "payload.kind",
                "enum",
                format!(
                    "must be '{}' for appKind '{}'",
                    expected.as_str(),
                    app_kind.as_str()
                ),
            ));
        }

        self.live_peer(caller)?.producers.check_vacant(app_kind)?;
        let transport = self.transport_of(caller, TransportDirection::Send)?;

        let producer = transport.produce(kind, rtp_parameters).await?;

        let installed = self
            .live_peer_mut(caller)
            .and_then(|peer| peer.producers.install(app_kind, Arc::clone(&producer)));
        if let Err(e) = installed {
            producer.close().await;
            return Err(e);
        }

        let producer_id = producer.id().clone();
        info!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            identity_id = %caller.identity_id,
            producer_id = %producer_id,
            app_kind = app_kind.as_str(),
            "Producer created"
        );

        self.broadcast(
            Some(&caller.identity_id),
            &ServerEvent::NewProducer {
                producer_id: producer_id.clone(),
                peer_id: caller.identity_id.clone(),
                app_kind,
                kind,
            },
        );
        Ok(producer_id)
    }

    async fn consume(
        &mut self,
        caller: &Caller,
        producer_id: ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumeReply, RcError> {
        let transport = self.transport_of(caller, TransportDirection::Recv)?;

        if !self
            .peers
            .values()
            .any(|p| p.producers.find(&producer_id).is_some())
        {
            return Err(RcError::ProducerNotFound(producer_id.to_string()));
        }
        if !self.router.can_consume(&producer_id, rtp_capabilities) {
            return Err(EngineError::CannotConsume(producer_id).into());
        }

        let consumer = transport
            .consume(&producer_id, rtp_capabilities, true)
            .await?;

        // The source may have closed while the engine was busy
        let source_alive = self
            .peers
            .values()
            .any(|p| p.producers.find(&producer_id).is_some());
        let peer = match self.live_peer_mut(caller) {
            Ok(peer) if source_alive => peer,
            Ok(_) => {
                consumer.close().await;
                return Err(RcError::ProducerNotFound(producer_id.to_string()));
            }
            Err(e) => {
                consumer.close().await;
                return Err(e);
            }
        };
        peer.consumers
            .insert(consumer.id().clone(), Arc::clone(&consumer));

        debug!(
            target: "rc.actor.room",
            room_id = %self.info.room_id,
            identity_id = %caller.identity_id,
            consumer_id = %consumer.id(),
            producer_id = %producer_id,
            "Consumer created paused"
        );

        Ok(ConsumeReply {
            consumer_id: consumer.id().clone(),
            producer_id,
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        })
    }

    async fn consumer_ready(
        &self,
        caller: &Caller,
        consumer_id: &ConsumerId,
    ) -> Result<(), RcError> {
        let consumer = self
            .live_peer(caller)?
            .consumers
            .get(consumer_id)
            .cloned()
            .ok_or_else(|| RcError::ConsumerNotFound(consumer_id.to_string()))?;
        consumer.resume().await?;
        Ok(())
    }

    async fn close_producer(
        &mut self,
        caller: &Caller,
        slot: ProducerSlotKind,
    ) -> Result<Vec<ProducerId>, RcError> {
        let producers = self.live_peer_mut(caller)?.producers.take(slot);
        Ok(self.close_producers(&caller.identity_id, &producers).await)
    }

    /// Close producers already removed from their slots, announce it and
    /// sweep dependent consumers.
    async fn close_producers(
        &mut self,
        owner: &IdentityId,
        producers: &[Arc<dyn MediaProducer>],
    ) -> Vec<ProducerId> {
        let closed: Vec<ProducerId> = producers.iter().map(|p| p.id().clone()).collect();
        for producer in producers {
            producer.close().await;
        }
        for producer_id in &closed {
            self.broadcast(
                Some(owner),
                &ServerEvent::ProducerClosed {
                    producer_id: producer_id.clone(),
                    peer_id: owner.clone(),
                },
            );
        }
        self.cascade_close(&closed).await;
        closed
    }

    async fn set_producer_paused(
        &self,
        caller: &Caller,
        slot: ProducerSlotKind,
        paused: bool,
    ) -> Result<bool, RcError> {
        if slot != ProducerSlotKind::Audio {
            return Err(RcError::invalid("payload.kind", "enum", "must be one of: audio"));
        }
        let producer = self
            .live_peer(caller)?
            .producers
            .audio()
            .cloned()
            .ok_or_else(|| RcError::ProducerNotFound(slot.as_str().to_string()))?;

        if paused {
            producer.pause().await?;
        } else {
            producer.resume().await?;
        }
        Ok(producer.is_paused())
    }

    async fn close_consumer(
        &mut self,
        caller: &Caller,
        consumer_id: &ConsumerId,
    ) -> Result<(), RcError> {
        let consumer = self
            .live_peer_mut(caller)?
            .consumers
            .remove(consumer_id)
            .ok_or_else(|| RcError::ConsumerNotFound(consumer_id.to_string()))?;
        consumer.close().await;
        Ok(())
    }

    /// Close every consumer in the room fed by one of `closed`. Returns how
    /// many were closed.
    async fn cascade_close(&mut self, closed: &[ProducerId]) -> usize {
        if closed.is_empty() {
            return 0;
        }

        let mut doomed: Vec<(Option<ConnectionActorHandle>, Arc<dyn MediaConsumer>)> = Vec::new();
        for peer in self.peers.values_mut() {
            let consumers = peer.take_consumers_of(closed);
            if consumers.is_empty() {
                continue;
            }
            let live = peer.channels.live().cloned();
            doomed.extend(consumers.into_iter().map(|c| (live.clone(), c)));
        }

        let count = doomed.len();
        for (live, consumer) in doomed {
            consumer.close().await;
            if let Some(connection) = live {
                self.deliver(
                    &connection,
                    ServerEvent::ConsumerClosed {
                        consumer_id: consumer.id().clone(),
                        producer_id: consumer.producer_id().clone(),
                    },
                );
            }
        }

        if count > 0 {
            prom::record_cascade_closed(count);
            debug!(
                target: "rc.actor.room",
                room_id = %self.info.room_id,
                producers = closed.len(),
                consumers = count,
                "Cascade closed consumers"
            );
        }
        count
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn live_peer(&self, caller: &Caller) -> Result<&Peer<ConnectionActorHandle>, RcError> {
        self.peers
            .get(&caller.identity_id)
            .filter(|p| p.channels.is_live(caller.channel_id))
            .ok_or_else(|| RcError::PeerNotFound(caller.identity_id.to_string()))
    }

    fn live_peer_mut(
        &mut self,
        caller: &Caller,
    ) -> Result<&mut Peer<ConnectionActorHandle>, RcError> {
        self.peers
            .get_mut(&caller.identity_id)
            .filter(|p| p.channels.is_live(caller.channel_id))
            .ok_or_else(|| RcError::PeerNotFound(caller.identity_id.to_string()))
    }

    fn peer_summaries(&self, except: Option<&IdentityId>) -> Vec<PeerSummary> {
        self.peers
            .iter()
            .filter(|(id, _)| Some(*id) != except)
            .map(|(_, p)| p.summary())
            .collect()
    }

    /// Send `event` to the live channel of every peer except `except`.
    fn broadcast(&self, except: Option<&IdentityId>, event: &ServerEvent) {
        for (id, peer) in &self.peers {
            if Some(id) == except {
                continue;
            }
            if let Some(connection) = peer.channels.live() {
                self.deliver(connection, event.clone());
            }
        }
    }

    fn deliver(&self, connection: &ConnectionActorHandle, event: ServerEvent) {
        let name = event.name();
        if connection.notify(event).is_err() {
            prom::record_message_dropped(ActorType::Connection.as_str());
            warn!(
                target: "rc.actor.room",
                room_id = %self.info.room_id,
                channel_id = %connection.channel_id(),
                event = name,
                "Notice dropped, connection mailbox full or closed"
            );
        }
    }

    fn sync_peer_count(&self) {
        self.peer_count.store(self.peers.len(), Ordering::Relaxed);
    }

    fn state(&self) -> RoomState {
        let peers = self
            .peers
            .values()
            .map(|p| PeerState {
                identity_id: p.identity.id.clone(),
                live_channel: p.channels.live_channel(),
                channel_count: p.channels.len(),
                evictions: p.channels.evictions(),
                muted: p.muted,
                speaking: p.speaking,
                has_send_transport: p.transport(TransportDirection::Send).is_some(),
                has_recv_transport: p.transport(TransportDirection::Recv).is_some(),
                producers: p
                    .producers
                    .iter()
                    .into_iter()
                    .map(|(app_kind, producer)| ProducerState {
                        producer_id: producer.id().clone(),
                        app_kind,
                        paused: producer.is_paused(),
                    })
                    .collect(),
                consumers: p
                    .consumers
                    .values()
                    .map(|c| ConsumerState {
                        consumer_id: c.id().clone(),
                        producer_id: c.producer_id().clone(),
                        paused: c.is_paused(),
                    })
                    .collect(),
            })
            .collect();

        RoomState {
            room_id: self.info.room_id.clone(),
            peers,
            chat_messages: self.chat.len(),
            closing: self.closing,
        }
    }

    /// Evict every live channel and release all engine objects.
    async fn shutdown(&mut self) {
        self.closing = true;
        let peers: Vec<Peer<ConnectionActorHandle>> =
            self.peers.drain().map(|(_, p)| p).collect();
        let count = peers.len();

        for mut peer in peers {
            if let Some((_, connection)) = peer.channels.clear() {
                if connection
                    .evict(self.info.room_id.clone(), LeaveReason::Shutdown)
                    .is_err()
                {
                    prom::record_message_dropped(ActorType::Connection.as_str());
                }
            }
            for producer in peer.producers.take_all() {
                producer.close().await;
            }
            for (_, consumer) in peer.consumers.drain() {
                consumer.close().await;
            }
            for transport in peer.take_transports() {
                transport.close().await;
            }
        }

        self.router.close().await;
        self.metrics.peers_removed(count);
        self.sync_peer_count();

        if count > 0 {
            info!(
                target: "rc.actor.room",
                room_id = %self.info.room_id,
                peers = count,
                "Room shut down with peers present"
            );
        }
    }
}
