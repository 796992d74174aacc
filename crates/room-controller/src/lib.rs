//! Room Controller Library
//!
//! Session orchestration for multi-party audio/video rooms on top of a
//! selective forwarding media engine. The Room Controller is responsible for:
//!
//! - Room lifecycle: creation, visibility, capacity, removal when empty
//! - Peer sessions with reconnection (one live channel per identity per room)
//! - Producer/consumer lifecycle with cascade close
//! - Distributing rooms across a fixed pool of media engine workers
//! - Schema-validated signaling events with acknowledgement envelopes
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! ├── lobby broadcast (public room notices to every channel)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room, bound to one engine router)
//! ConnectionActor (one per WebSocket)
//! └── ChannelContext + Dispatcher
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and connection actors
//! - [`config`] - Service configuration from environment
//! - [`dispatch`] - Event handlers, schemas and wire frames
//! - [`engine`] - Media engine seam and the engine pool
//! - [`errors`] - Error types with stable wire codes
//! - [`observability`] - Health probes and Prometheus metrics
//! - [`session`] - Room and peer session model, reconnection stack
//! - [`transport`] - WebSocket signaling endpoint

pub mod actors;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod session;
pub mod transport;
