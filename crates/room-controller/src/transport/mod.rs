//! Client-facing signaling transport.
//!
//! - [`auth`] - Identity token resolution for new channels
//! - [`ws`] - WebSocket endpoint and per-socket reader/writer tasks

pub mod auth;
pub mod ws;

pub use auth::{IdentityResolver, JwtIdentityResolver};
pub use ws::{signaling_router, SignalingState};
