//! `ConnectionActor` - one actor per signaling channel.
//!
//! Each `ConnectionActor`:
//! - Owns the channel's `ChannelContext` (identity, current room)
//! - Runs inbound frames through the `Dispatcher`, one at a time
//! - Forwards room notices and lobby notices to the socket writer
//! - Leaves its room when it stops
//!
//! # Lifecycle
//!
//! 1. Spawned by the WebSocket transport after the upgrade
//! 2. Runs until the socket closes, the writer goes away, or its token is
//!    cancelled
//! 3. On exit the channel leaves its room; an emptied room is released

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::RoomRegistryActorHandle;
use crate::dispatch::context::ChannelContext;
use crate::dispatch::frames::{ClientFrame, LeaveReason, ServerEvent, ServerFrame};
use crate::dispatch::Dispatcher;
use crate::errors::RcError;
use crate::session::RoomId;

use common::types::{ChannelId, Identity};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    channel_id: ChannelId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Queue a frame read from the socket. Waits for mailbox space.
    pub async fn inbound(&self, frame: ClientFrame) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Inbound { frame })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Push an event to the client without waiting.
    ///
    /// Fails when the mailbox is full or the actor is gone; the notice is lost.
    pub fn notify(&self, event: ServerEvent) -> Result<(), RcError> {
        self.sender
            .try_send(ConnectionMessage::Notify { event })
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    /// Tell the channel it no longer belongs to `room_id`.
    pub fn evict(&self, room_id: RoomId, reason: LeaveReason) -> Result<(), RcError> {
        self.sender
            .try_send(ConnectionMessage::Evicted { room_id, reason })
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn close(&self, reason: String) -> Result<(), RcError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn ping(&self) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionMessage::Ping { respond_to: tx })
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A handle with no actor behind it; the caller reads the mailbox.
    #[cfg(test)]
    pub(crate) fn detached(channel_id: ChannelId) -> (Self, mpsc::Receiver<ConnectionMessage>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        (
            Self {
                sender,
                cancel_token: CancellationToken::new(),
                channel_id,
            },
            receiver,
        )
    }
}

pub struct ConnectionActor {
    ctx: ChannelContext,
    dispatcher: Arc<Dispatcher>,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Frames for the socket writer.
    outbound: mpsc::Sender<ServerFrame>,
    /// Process-wide notices. `None` once the registry is gone.
    lobby: Option<broadcast::Receiver<ServerEvent>>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a connection actor for a freshly opened channel.
    ///
    /// `identity` is `None` for channels that presented no token.
    pub fn spawn(
        channel_id: ChannelId,
        identity: Option<Identity>,
        registry: RoomRegistryActorHandle,
        dispatcher: Arc<Dispatcher>,
        outbound: mpsc::Sender<ServerFrame>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        let handle = ConnectionActorHandle {
            sender,
            cancel_token: cancel_token.clone(),
            channel_id,
        };

        let lobby = Some(registry.subscribe_lobby());
        let actor = Self {
            ctx: ChannelContext::new(channel_id, identity, registry, handle.clone()),
            dispatcher,
            receiver,
            outbound,
            lobby,
            cancel_token,
            mailbox: MailboxMonitor::new(ActorType::Connection, channel_id.to_string()),
            metrics,
        };

        actor.metrics.connection_created();
        let task_handle = tokio::spawn(actor.run());

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "rc.actor.connection",
        fields(
            channel_id = %self.ctx.channel_id(),
            identity_id = self.ctx.identity_id().map(tracing::field::display)
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "rc.actor.connection",
            channel_id = %self.ctx.channel_id(),
            authenticated = self.ctx.is_authenticated(),
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rc.actor.connection",
                        channel_id = %self.ctx.channel_id(),
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                notice = recv_lobby(&mut self.lobby) => {
                    match notice {
                        Ok(event) => {
                            if !self.push(ServerFrame::Event(event)).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                target: "rc.actor.connection",
                                channel_id = %self.ctx.channel_id(),
                                skipped,
                                "Lobby notices skipped"
                            );
                            self.mailbox.record_drop();
                        }
                        Err(RecvError::Closed) => {
                            self.lobby = None;
                        }
                    }
                }
            }
        }

        self.ctx.leave_room().await;
        self.metrics.connection_closed();

        info!(
            target: "rc.actor.connection",
            channel_id = %self.ctx.channel_id(),
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Inbound { frame } => {
                match self.dispatcher.dispatch(&mut self.ctx, frame).await {
                    Some(reply) => !self.push(reply).await,
                    None => false,
                }
            }

            ConnectionMessage::Notify { event } => !self.push(ServerFrame::Event(event)).await,

            ConnectionMessage::Evicted { room_id, reason } => {
                if !self.ctx.forget_room(&room_id) {
                    debug!(
                        target: "rc.actor.connection",
                        channel_id = %self.ctx.channel_id(),
                        room_id = %room_id,
                        "Eviction for a room this channel already left"
                    );
                    return false;
                }

                info!(
                    target: "rc.actor.connection",
                    channel_id = %self.ctx.channel_id(),
                    room_id = %room_id,
                    reason = ?reason,
                    "Channel evicted from room"
                );
                !self
                    .push(ServerFrame::Event(ServerEvent::Leave { room_id, reason }))
                    .await
            }

            ConnectionMessage::Close { reason } => {
                debug!(
                    target: "rc.actor.connection",
                    channel_id = %self.ctx.channel_id(),
                    reason = %reason,
                    "Closing connection"
                );
                true
            }

            ConnectionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }

    /// Hand a frame to the socket writer. False once the writer is gone.
    async fn push(&self, frame: ServerFrame) -> bool {
        if self.outbound.send(frame).await.is_err() {
            debug!(
                target: "rc.actor.connection",
                channel_id = %self.ctx.channel_id(),
                "Socket writer gone"
            );
            return false;
        }
        true
    }
}

async fn recv_lobby(
    lobby: &mut Option<broadcast::Receiver<ServerEvent>>,
) -> Result<ServerEvent, RecvError> {
    match lobby {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
