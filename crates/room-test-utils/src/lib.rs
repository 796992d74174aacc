//! # Room Test Utilities
//!
//! Shared test utilities for the Room Controller.
//!
//! This crate provides:
//! - `fixtures` - Identities, signed tokens, RTP parameters and signaling payloads
//! - `harness` - `TestRig` (registry + dispatcher + simulated engine) and
//!   `TestChannel`, a socket stand-in driving a real `ConnectionActor`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let rig = TestRig::new();
//!     let mut alice = rig.connect_as("alice");
//!
//!     let data = alice
//!         .request_ok("createRoom", create_room_payload("demo", "public"))
//!         .await;
//!     assert_eq!(data["roomId"], "demo");
//! }
//! ```

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
