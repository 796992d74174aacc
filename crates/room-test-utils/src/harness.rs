//! Channel harness for signaling tests.
//!
//! [`TestRig`] runs a real registry, dispatcher and engine pool (simulated
//! engine). [`TestChannel`] stands in for one WebSocket: it spawns a real
//! `ConnectionActor` and reads the frames the actor would write to the
//! socket.
//!
//! # Example
//! ```rust,ignore
//! let rig = TestRig::new();
//! let mut alice = rig.connect_as("alice");
//! let mut bob = rig.connect_as("bob");
//!
//! alice.request_ok("createRoom", create_room_payload("demo", "private")).await;
//! bob.request_ok("joinRoom", json!({"roomId": "demo"})).await;
//!
//! let joined = alice.expect_event("peerJoined").await;
//! assert_eq!(joined["id"], "bob");
//! ```

use crate::fixtures::identity;
use common::types::{ChannelId, Identity};
use room_controller::actors::{
    ActorMetrics, ConnectionActor, ConnectionActorHandle, RegistrySettings,
    RoomRegistryActorHandle, RoomSettings,
};
use room_controller::dispatch::frames::{AckFrame, ClientFrame, ServerFrame};
use room_controller::dispatch::handlers::build_dispatcher;
use room_controller::dispatch::Dispatcher;
use room_controller::engine::{simulated, EnginePool, TransportListenConfig};
use room_controller::errors::ErrorDetail;
use serde_json::Value;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long any single expectation waits before failing the test.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Settings small enough to hit limits in tests.
#[must_use]
pub fn test_settings() -> RegistrySettings {
    RegistrySettings {
        max_rooms: 16,
        room: RoomSettings {
            max_peers: 8,
            chat_history_limit: 20,
            listen: TransportListenConfig {
                listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                announced_ip: None,
                port_min: 40_000,
                port_max: 40_999,
            },
        },
    }
}

/// A running Room Controller without sockets.
pub struct TestRig {
    pub registry: RoomRegistryActorHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<ActorMetrics>,
    pub pool: Arc<EnginePool>,
    shutdown: CancellationToken,
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRig {
    /// Two engine workers and [`test_settings`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    /// # Panics
    ///
    /// Panics if the pool or dispatcher cannot be built.
    #[must_use]
    pub fn with_settings(settings: RegistrySettings) -> Self {
        let pool = Arc::new(simulated::spawn_pool(2).expect("simulated pool"));
        Self::with_pool(pool, settings)
    }

    /// Use a pool built by the test, e.g. from `spawn_pool_with_handles`.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher cannot be built.
    #[must_use]
    pub fn with_pool(pool: Arc<EnginePool>, settings: RegistrySettings) -> Self {
        let metrics = ActorMetrics::new();
        let registry =
            RoomRegistryActorHandle::new(Arc::clone(&pool), settings, Arc::clone(&metrics));
        let shutdown = registry.child_token();
        Self {
            registry,
            dispatcher: Arc::new(build_dispatcher().expect("dispatcher")),
            metrics,
            pool,
            shutdown,
        }
    }

    /// Open a channel with the given identity (`None` for anonymous).
    #[must_use]
    pub fn connect(&self, identity: Option<Identity>) -> TestChannel {
        let channel_id = ChannelId::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (handle, task) = ConnectionActor::spawn(
            channel_id,
            identity,
            self.registry.clone(),
            Arc::clone(&self.dispatcher),
            outbound_tx,
            self.shutdown.child_token(),
            Arc::clone(&self.metrics),
        );

        TestChannel {
            handle,
            task: Some(task),
            outbound: outbound_rx,
            next_ack: 1,
            pending: VecDeque::new(),
        }
    }

    /// Open a channel authenticated as `id`.
    #[must_use]
    pub fn connect_as(&self, id: &str) -> TestChannel {
        self.connect(Some(identity(id)))
    }

    /// Stop the registry and every channel.
    pub async fn shutdown(&self) {
        let _ = self.registry.shutdown().await;
        self.shutdown.cancel();
    }
}

/// An event received by a [`TestChannel`], as wire JSON.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub name: String,
    pub payload: Value,
}

impl std::ops::Index<&str> for ReceivedEvent {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        &self.payload[key]
    }
}

/// One simulated client socket.
pub struct TestChannel {
    handle: ConnectionActorHandle,
    task: Option<JoinHandle<()>>,
    outbound: mpsc::Receiver<ServerFrame>,
    next_ack: u64,
    /// Events read while waiting for something else.
    pending: VecDeque<ReceivedEvent>,
}

impl TestChannel {
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.handle.channel_id()
    }

    /// Send `event` with an ack id and wait for its ack.
    ///
    /// # Panics
    ///
    /// Panics if no ack arrives within [`EXPECT_TIMEOUT`].
    pub async fn request(&mut self, event: &str, payload: Value) -> AckFrame {
        let ack = self.next_ack;
        self.next_ack += 1;

        self.send(ClientFrame {
            event: event.to_string(),
            payload: Some(payload),
            ack: Some(ack),
        })
        .await;

        loop {
            match self.next_frame().await {
                ServerFrame::Ack(frame) if frame.ack == ack => return frame,
                ServerFrame::Ack(frame) => panic!("unexpected ack {frame:?} while waiting for {ack}"),
                ServerFrame::Event(_) => {}
            }
        }
    }

    /// Like [`request`](Self::request), asserting success; returns `data`.
    pub async fn request_ok(&mut self, event: &str, payload: Value) -> Value {
        let frame = self.request(event, payload).await;
        assert!(frame.is_ok(), "{event} failed: {:?}", frame.errors);
        frame.data.unwrap_or(Value::Null)
    }

    /// Like [`request`](Self::request), asserting failure; returns the first
    /// error.
    pub async fn request_err(&mut self, event: &str, payload: Value) -> ErrorDetail {
        let frame = self.request(event, payload).await;
        frame
            .errors
            .and_then(|errors| errors.into_iter().next())
            .unwrap_or_else(|| panic!("{event} unexpectedly succeeded"))
    }

    /// Send `event` without an ack id.
    pub async fn emit(&mut self, event: &str, payload: Value) {
        self.send(ClientFrame {
            event: event.to_string(),
            payload: Some(payload),
            ack: None,
        })
        .await;
    }

    /// Send a raw frame.
    ///
    /// # Panics
    ///
    /// Panics if the connection actor is gone.
    pub async fn send(&mut self, frame: ClientFrame) {
        self.handle
            .inbound(frame)
            .await
            .expect("connection actor should accept frames");
    }

    /// Wait for the next `name` event, keeping others for later calls.
    ///
    /// # Panics
    ///
    /// Panics if it does not arrive within [`EXPECT_TIMEOUT`].
    pub async fn expect_event(&mut self, name: &str) -> ReceivedEvent {
        if let Some(index) = self.pending.iter().position(|e| e.name == name) {
            if let Some(event) = self.pending.remove(index) {
                return event;
            }
        }

        let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.outbound.recv())
                .await
                .unwrap_or_else(|_| {
                    panic!(
                        "timed out waiting for '{name}'; pending: {:?}",
                        self.pending.iter().map(|e| &e.name).collect::<Vec<_>>()
                    )
                })
                .unwrap_or_else(|| panic!("channel closed while waiting for '{name}'"));

            self.buffer(frame);
            if self.pending.back().is_some_and(|e| e.name == name) {
                if let Some(event) = self.pending.pop_back() {
                    return event;
                }
            }
        }
    }

    /// Assert that no `name` event arrives within `within`.
    pub async fn expect_no_event(&mut self, name: &str, within: Duration) {
        assert!(
            !self.pending.iter().any(|e| e.name == name),
            "unexpected '{name}' already received"
        );

        let deadline = tokio::time::Instant::now() + within;
        while let Ok(Some(_)) = tokio::time::timeout_at(deadline, self.recv_into_pending()).await {
            assert!(
                self.pending.back().map_or(true, |e| e.name != name),
                "unexpected '{name}' event"
            );
        }
    }

    /// Every event received so far and not yet consumed, oldest first.
    pub fn drain_events(&mut self) -> Vec<ReceivedEvent> {
        while let Ok(frame) = self.outbound.try_recv() {
            self.buffer(frame);
        }
        self.pending.drain(..).collect()
    }

    /// Close the channel the way a dropped socket does and wait for the
    /// actor to finish leaving its room.
    pub async fn disconnect(mut self) {
        if self.handle.close("test disconnect".to_string()).await.is_err() {
            self.handle.cancel();
        }
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(EXPECT_TIMEOUT, task).await;
        }
    }

    /// Whether the connection actor has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    async fn next_frame(&mut self) -> ServerFrame {
        let frame = tokio::time::timeout(EXPECT_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection actor closed its outbound channel");
        if let ServerFrame::Event(_) = &frame {
            self.buffer(frame.clone());
        }
        frame
    }

    async fn recv_into_pending(&mut self) -> Option<()> {
        let frame = self.outbound.recv().await?;
        self.buffer(frame);
        Some(())
    }

    fn buffer(&mut self, frame: ServerFrame) {
        if let ServerFrame::Event(event) = frame {
            let name = event.name().to_string();
            let wire = serde_json::to_value(ServerFrame::Event(event)).expect("event serialises");
            self.pending.push_back(ReceivedEvent {
                name,
                payload: wire.get("payload").cloned().unwrap_or(Value::Null),
            });
        }
    }
}
