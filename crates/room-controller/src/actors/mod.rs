//! Actor hierarchy of the Room Controller.
//!
//! ```text
//! RoomRegistryActor (singleton)
//! ├── owns the lobby broadcast (public room notices)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns peers, transports, producers, consumers, chat
//!         └── notifies ConnectionActors by try_send only
//! ConnectionActor (one per signaling channel)
//! └── owns the ChannelContext and runs the dispatcher
//! ```
//!
//! # Call direction
//!
//! Connections await rooms and the registry; the registry awaits rooms.
//! Rooms never await either of them, so no request cycle can form.
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor`, room lifecycle and capacity
//! - [`room`] - `RoomActor`, all per-room session state
//! - [`connection`] - `ConnectionActor` per signaling channel
//! - [`messages`] - Message and reply types
//! - [`metrics`] - Mailbox monitoring and actor counters

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{RegistrySettings, RoomRegistryActor, RoomRegistryActorHandle};
pub use room::{RoomActor, RoomActorHandle, RoomInfo, RoomSettings};
