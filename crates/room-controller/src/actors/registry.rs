//! `RoomRegistryActor` - singleton owner of every room actor.
//!
//! - Creates rooms: acquires an engine worker, creates the router, spawns the
//!   `RoomActor` under a child token and joins the creator
//! - Lists and looks up rooms
//! - Deletes rooms once their last peer is gone
//! - Watches room tasks for unexpected exits (panic detection via `JoinHandle`)
//! - Publishes process-wide notices (`roomCreated`, `roomDeleted`,
//!   `peerJoinedRoom`) on the lobby broadcast channel for public rooms
//!
//! # Graceful Shutdown
//!
//! 1. Stop accepting rooms
//! 2. Cancel the root token (every room evicts its channels and closes its router)
//! 3. Wait for room tasks to finish

use super::messages::{JoinOutcome, JoinRequest, RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomInfo, RoomSettings};
use crate::dispatch::frames::{RoomSummary, ServerEvent};
use crate::engine::pool::EnginePool;
use crate::engine::router_media_codecs;
use crate::errors::RcError;
use crate::session::{RoomId, Visibility};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Capacity of the lobby broadcast. Slow receivers skip what they missed.
const LOBBY_BUFFER: usize = 256;

const ROOM_REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub max_rooms: usize,
    pub room: RoomSettings,
}

/// Handle to the `RoomRegistryActor`.
#[derive(Clone, Debug)]
pub struct RoomRegistryActorHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    lobby: broadcast::Sender<ServerEvent>,
}

impl RoomRegistryActorHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(pool: Arc<EnginePool>, settings: RegistrySettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let (lobby, _) = broadcast::channel(LOBBY_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor {
            receiver,
            cancel_token: cancel_token.clone(),
            pool,
            settings,
            rooms: HashMap::new(),
            accepting_new: true,
            lobby: lobby.clone(),
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
            metrics,
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            lobby,
        }
    }

    /// Receive process-wide notices from now on.
    #[must_use]
    pub fn subscribe_lobby(&self) -> broadcast::Receiver<ServerEvent> {
        self.lobby.subscribe()
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| RcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RcError::Internal(format!("response receive failed: {e}")))
    }

    /// Create a room and join `creator` as its first peer.
    pub async fn create_room(
        &self,
        room_id: RoomId,
        name: String,
        visibility: Visibility,
        creator: JoinRequest,
    ) -> Result<(RoomActorHandle, JoinOutcome), RcError> {
        self.ask(|respond_to| RegistryMessage::CreateRoom {
            room_id,
            name,
            visibility,
            creator,
            respond_to,
        })
        .await?
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomActorHandle, RcError> {
        self.ask(|respond_to| RegistryMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Summaries of every room with `visibility`, oldest first.
    pub async fn list_rooms(&self, visibility: Visibility) -> Result<Vec<RoomSummary>, RcError> {
        self.ask(|respond_to| RegistryMessage::ListRooms {
            visibility,
            respond_to,
        })
        .await
    }

    /// Delete the room if it has no peers left. Returns whether it was deleted.
    pub async fn release_room(&self, room_id: RoomId) -> Result<bool, RcError> {
        self.ask(|respond_to| RegistryMessage::ReleaseRoom {
            room_id,
            respond_to,
        })
        .await
    }

    /// Delete a room regardless of its peers. They are evicted.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), RcError> {
        self.ask(|respond_to| RegistryMessage::DeleteRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, RcError> {
        self.ask(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting rooms, shut every room down and wait for them.
    pub async fn shutdown(&self) -> Result<(), RcError> {
        self.ask(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
}

pub struct RoomRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token; every room runs under a child of it.
    cancel_token: CancellationToken,
    pool: Arc<EnginePool>,
    settings: RegistrySettings,
    rooms: HashMap<RoomId, ManagedRoom>,
    accepting_new: bool,
    lobby: broadcast::Sender<ServerEvent>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    #[instrument(skip_all, name = "rc.actor.registry", fields(workers = self.pool.len()))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.registry",
            workers = self.pool.len(),
            max_rooms = self.settings.max_rooms,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
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
                        None => {
                            info!(
                                target: "rc.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::CreateRoom {
                room_id,
                name,
                visibility,
                creator,
                respond_to,
            } => {
                let result = self.create_room(room_id, name, visibility, creator).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self
                    .rooms
                    .get(&room_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or_else(|| RcError::RoomNotFound(room_id.to_string()));
                let _ = respond_to.send(result);
            }

            RegistryMessage::ListRooms {
                visibility,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_rooms(visibility));
            }

            RegistryMessage::ReleaseRoom {
                room_id,
                respond_to,
            } => {
                let released = self.release_room(&room_id).await;
                let _ = respond_to.send(released);
            }

            RegistryMessage::DeleteRoom {
                room_id,
                respond_to,
            } => {
                let result = match self.rooms.remove(&room_id) {
                    Some(managed) => {
                        self.finish_removal(&room_id, managed);
                        Ok(())
                    }
                    None => Err(RcError::RoomNotFound(room_id.to_string())),
                };
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    room_count: self.rooms.len(),
                    is_draining: !self.accepting_new,
                    mailbox_depth: self.mailbox.current_depth(),
                });
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.graceful_shutdown().await;
                let _ = respond_to.send(Ok(()));
                return true;
            }
        }
        false
    }

    async fn create_room(
        &mut self,
        room_id: RoomId,
        name: String,
        visibility: Visibility,
        creator: JoinRequest,
    ) -> Result<(RoomActorHandle, JoinOutcome), RcError> {
        if !self.accepting_new {
            return Err(RcError::Draining);
        }
        if self.rooms.contains_key(&room_id) {
            return Err(RcError::Conflict("Room already exists".to_string()));
        }
        if self.rooms.len() >= self.settings.max_rooms {
            return Err(RcError::CapacityExceeded(format!(
                "at most {} rooms",
                self.settings.max_rooms
            )));
        }

        let worker = self.pool.acquire()?;
        let router = worker.create_router(&router_media_codecs()).await?;

        let (handle, task_handle) = RoomActor::spawn(
            RoomInfo {
                room_id: room_id.clone(),
                name,
                visibility,
                created_at: Utc::now(),
            },
            router,
            self.settings.room.clone(),
            self.lobby.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        let outcome = match handle.join(creator).await {
            Ok(outcome) => outcome,
            Err(e) => {
                handle.cancel();
                return Err(e);
            }
        };

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
            },
        );
        self.metrics.room_created();

        info!(
            target: "rc.actor.registry",
            room_id = %room_id,
            visibility = visibility.as_str(),
            worker = worker.index(),
            total_rooms = self.rooms.len(),
            "Room created"
        );

        if visibility.is_public() {
            let _ = self.lobby.send(ServerEvent::RoomCreated(handle.summary()));
        }

        Ok((handle, outcome))
    }

    fn list_rooms(&self, visibility: Visibility) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .values()
            .filter(|managed| managed.handle.visibility() == visibility)
            .map(|managed| managed.handle.summary())
            .collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rooms
    }

    async fn release_room(&mut self, room_id: &RoomId) -> bool {
        let Some(managed) = self.rooms.get(room_id) else {
            return false;
        };

        match managed.handle.seal_if_empty().await {
            Ok(false) => return false,
            Ok(true) => {}
            Err(_) => {
                debug!(
                    target: "rc.actor.registry",
                    room_id = %room_id,
                    "Room actor unreachable, removing"
                );
            }
        }

        if let Some(managed) = self.rooms.remove(room_id) {
            self.finish_removal(room_id, managed);
        }
        true
    }

    /// Cancel a room already taken out of the map and wait for it in the
    /// background.
    fn finish_removal(&mut self, room_id: &RoomId, managed: ManagedRoom) {
        let ManagedRoom {
            handle,
            task_handle,
        } = managed;
        handle.cancel();

        let room_id_owned = room_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_REMOVAL_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.registry",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.registry",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.room_removed();

        info!(
            target: "rc.actor.registry",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room removed"
        );

        if handle.visibility().is_public() {
            let _ = self.lobby.send(ServerEvent::RoomDeleted {
                room_id: room_id.clone(),
            });
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.registry",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rc.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(target: "rc.actor.registry", "Graceful shutdown complete");
    }

    /// Drop rooms whose task ended without being removed.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            warn!(
                target: "rc.actor.registry",
                room_id = %room_id,
                "Room actor task finished unexpectedly"
            );

            if let Err(join_error) = managed.task_handle.await {
                if join_error.is_panic() {
                    error!(
                        target: "rc.actor.registry",
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Room);
                }
            }

            self.metrics.room_removed();
            if managed.handle.visibility().is_public() {
                let _ = self.lobby.send(ServerEvent::RoomDeleted { room_id });
            }
        }
    }
}
