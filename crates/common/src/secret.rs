//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps sensitive
//! values the same way. `SecretString` and `SecretBox<T>` redact themselves in
//! `Debug`, so a struct deriving `Debug` stays safe to log, and their contents
//! are zeroized on drop.
//!
//! In the Room Controller this covers:
//! - the identity-token signing secret (`RC_AUTH_SECRET`)
//! - raw bearer tokens taken off the WebSocket upgrade request
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let secret = SecretString::from("signing-key");
//! assert!(!format!("{secret:?}").contains("signing-key"));
//! assert_eq!(secret.expose_secret(), "signing-key");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
