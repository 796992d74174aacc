//! Common data types shared by Room Controller components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of an authenticated user, as issued by the auth provider.
///
/// Opaque to the Room Controller: it is only compared and echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique identifier for one bidirectional client channel (one socket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    /// Create a new random channel ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The identity attached to a channel: `{id, name, image}`.
///
/// This is everything the Room Controller consumes from the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: Option<String>) -> Self {
        Self {
            id: IdentityId(id.into()),
            name: name.into(),
            image,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids_are_unique() {
        assert_ne!(ChannelId::new(), ChannelId::new());
    }

    #[test]
    fn test_identity_serializes_without_missing_image() {
        let identity = Identity::new("user-1", "Alice", None);
        let json = serde_json::to_value(&identity).unwrap();

        assert_eq!(json["id"], "user-1");
        assert_eq!(json["name"], "Alice");
        assert!(json.get("image").is_none());
    }

    #[test]
    fn test_identity_id_is_transparent() {
        let id: IdentityId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, IdentityId::from("abc"));
        assert_eq!(id.to_string(), "abc");
    }
}
