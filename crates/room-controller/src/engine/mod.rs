//! Media engine collaborator surface.
//!
//! The Room Controller never touches RTP, ICE or DTLS. It drives an external
//! media engine through the narrow async traits below and keeps only handles
//! (`Arc<dyn ...>`) to the objects the engine owns:
//!
//! ```text
//! MediaWorker ── create_router ──▶ MediaRouter ── create_webrtc_transport ──▶ MediaTransport
//!                                                                               ├── produce ──▶ MediaProducer
//!                                                                               └── consume ──▶ MediaConsumer
//! ```
//!
//! Closing is idempotent at every level and cascades downwards (router →
//! transports → producers/consumers).
//!
//! [`simulated`] provides an in-process implementation that does the
//! bookkeeping (ids, codec matching, pause state, close propagation) without
//! moving media.

pub mod pool;
pub mod simulated;

pub use pool::EnginePool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

macro_rules! engine_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

engine_id!(RouterId);
engine_id!(TransportId);
engine_id!(ProducerId);
engine_id!(ConsumerId);

/// Errors reported by the media engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The worker process died. Fatal for the whole Room Controller.
    #[error("Engine worker {worker} died")]
    WorkerDied { worker: usize },

    #[error("Router is closed")]
    RouterClosed,

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Producer is closed")]
    ProducerClosed,

    #[error("Consumer is closed")]
    ConsumerClosed,

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// `canConsume` refused the capabilities for this producer.
    #[error("Cannot consume producer {0}")]
    CannotConsume(ProducerId),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

impl EngineError {
    /// Client-safe description.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            EngineError::WorkerDied { .. } => "Media engine is unavailable".to_string(),
            EngineError::RouterClosed | EngineError::TransportClosed => {
                "Media transport is closed".to_string()
            }
            EngineError::ProducerClosed => "Producer is closed".to_string(),
            EngineError::ConsumerClosed => "Consumer is closed".to_string(),
            EngineError::UnsupportedCodec(mime) => format!("Unsupported codec: {mime}"),
            EngineError::CannotConsume(_) => {
                "Cannot consume this producer with the given RTP capabilities".to_string()
            }
            EngineError::InvalidParameters(msg) => format!("Invalid media parameters: {msg}"),
        }
    }
}

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Whether a mime type such as `audio/opus` belongs to this kind.
    #[must_use]
    pub fn matches_mime(&self, mime_type: &str) -> bool {
        mime_type
            .split('/')
            .next()
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(self.as_str()))
    }
}

/// A codec the router (or a client) supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<Value>,
}

impl RtpCodecCapability {
    /// Same mime type (case-insensitive), clock rate and channel count.
    #[must_use]
    pub fn matches(&self, mime_type: &str, clock_rate: u32, channels: Option<u8>) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime_type)
            && self.clock_rate == clock_rate
            && (self.kind == MediaKind::Video || self.channels.unwrap_or(1) == channels.unwrap_or(1))
    }
}

/// RTP capabilities of a router or a receiving client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
}

/// A negotiated codec inside [`RtpParameters`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<Value>,
}

/// RTP send/receive parameters. Opaque to the orchestration layer beyond the
/// codec list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<Value>,
    #[serde(default)]
    pub encodings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtcp: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtlsParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub fingerprints: Vec<DtlsFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "type")]
    pub candidate_type: String,
}

/// Everything a client needs to set up its side of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Where transports listen and what address they announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportListenConfig {
    pub listen_ip: IpAddr,
    pub announced_ip: Option<String>,
    pub port_min: u16,
    pub port_max: u16,
}

/// Codec set every router is created with: Opus 48 kHz stereo, VP8 and H264.
#[must_use]
pub fn router_media_codecs() -> Vec<RtpCodecCapability> {
    let mut h264_params = Map::new();
    h264_params.insert("packetization-mode".to_string(), Value::from(1));
    h264_params.insert("profile-level-id".to_string(), Value::from("42e01f"));
    h264_params.insert("level-asymmetry-allowed".to_string(), Value::from(1));

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48_000,
            channels: Some(2),
            preferred_payload_type: Some(100),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90_000,
            channels: None,
            preferred_payload_type: Some(101),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            clock_rate: 90_000,
            channels: None,
            preferred_payload_type: Some(102),
            parameters: h264_params,
            rtcp_feedback: Vec::new(),
        },
    ]
}

/// One media engine worker (one per CPU core).
#[async_trait]
pub trait MediaWorker: Send + Sync + fmt::Debug {
    /// Index of this worker in the pool.
    fn index(&self) -> usize;

    fn is_alive(&self) -> bool;

    async fn create_router(
        &self,
        codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn MediaRouter>, EngineError>;
}

/// A router: the media scope of one room.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> &RouterId;

    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether a receiver with `caps` can consume `producer_id`.
    fn can_consume(&self, producer_id: &ProducerId, caps: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListenConfig,
    ) -> Result<Arc<dyn MediaTransport>, EngineError>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &TransportId;

    fn parameters(&self) -> TransportParameters;

    async fn connect(&self, dtls: DtlsParameters) -> Result<(), EngineError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn MediaProducer>, EngineError>;

    async fn consume(
        &self,
        producer_id: &ProducerId,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn MediaConsumer>, EngineError>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaProducer: Send + Sync {
    fn id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn is_paused(&self) -> bool;

    async fn pause(&self) -> Result<(), EngineError>;

    async fn resume(&self) -> Result<(), EngineError>;

    async fn close(&self);
}

#[async_trait]
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> &ConsumerId;

    fn producer_id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn is_paused(&self) -> bool;

    async fn resume(&self) -> Result<(), EngineError>;

    async fn close(&self);
}
