//! Room and peer session state.
//!
//! Plain data owned by a single room actor. Nothing here spawns tasks or
//! talks to channels; the actor drives these types and turns their outcomes
//! into notices.

pub mod channel_stack;
pub mod peer;

pub use channel_stack::{Attach, ChannelStack, Detach, Eviction};
pub use peer::{Peer, ProducerSlots};

use crate::engine::MediaKind;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest room name accepted, in characters.
pub const MAX_ROOM_NAME_CHARS: usize = 64;

/// Normalised room identifier.
///
/// Derived from the display name: trimmed, lower-cased, spaces replaced by
/// `-`. Two names that normalise to the same id refer to the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Normalise a user-supplied room name or id.
    ///
    /// Returns `None` when the trimmed input is empty, longer than
    /// [`MAX_ROOM_NAME_CHARS`], or contains anything other than ASCII
    /// letters, digits, space, `_` and `-`.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len == 0 || len > MAX_ROOM_NAME_CHARS {
            return None;
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        {
            return None;
        }

        let id = trimmed
            .chars()
            .map(|c| if c == ' ' { '-' } else { c.to_ascii_lowercase() })
            .collect();
        Some(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether room lifecycle notices go to every connected channel or only to
/// room members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    #[must_use]
    pub const fn is_public(&self) -> bool {
        matches!(self, Visibility::Public)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl TransportDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransportDirection::Send => "send",
            TransportDirection::Recv => "recv",
        }
    }
}

/// What a producer is used for. Decides which slot it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppKind {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "screenShare-video")]
    ScreenShareVideo,
    #[serde(rename = "screenShare-audio")]
    ScreenShareAudio,
}

impl AppKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AppKind::Audio => "audio",
            AppKind::ScreenShareVideo => "screenShare-video",
            AppKind::ScreenShareAudio => "screenShare-audio",
        }
    }

    /// Media kind a producer with this app kind must carry.
    #[must_use]
    pub const fn expected_kind(&self) -> MediaKind {
        match self {
            AppKind::Audio | AppKind::ScreenShareAudio => MediaKind::Audio,
            AppKind::ScreenShareVideo => MediaKind::Video,
        }
    }

    #[must_use]
    pub const fn slot(&self) -> ProducerSlotKind {
        match self {
            AppKind::Audio => ProducerSlotKind::Audio,
            AppKind::ScreenShareVideo | AppKind::ScreenShareAudio => ProducerSlotKind::ScreenShare,
        }
    }
}

/// Slot addressed by `closeProducer`. Closing the screen-share slot closes
/// both its video and audio producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProducerSlotKind {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "screenShare")]
    ScreenShare,
}

impl ProducerSlotKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProducerSlotKind::Audio => "audio",
            ProducerSlotKind::ScreenShare => "screenShare",
        }
    }
}
