//! Pre-configured test data fixtures for Room Controller testing.
//!
//! Provides builders and test data for:
//! - Identities and signed identity tokens
//! - RTP parameters and capabilities the simulated engine accepts
//! - Ready-made signaling payloads (`produce`, `consume`, `connectTransport`)

use common::jwt::IdentityClaims;
use common::types::Identity;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use room_controller::engine::{
    router_media_codecs, DtlsFingerprint, DtlsParameters, MediaKind, RtpCapabilities,
    RtpCodecParameters, RtpParameters,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Secret used by every signed fixture token (32+ bytes).
pub const TEST_AUTH_SECRET: &str = "room-test-utils-secret-0123456789abcdef";

/// Identity whose display name is derived from the id.
#[must_use]
pub fn identity(id: &str) -> Identity {
    Identity::new(id, format!("{id} (test)"), None)
}

/// Identity with a random id.
#[must_use]
pub fn random_identity() -> Identity {
    identity(&format!("user-{}", Uuid::new_v4()))
}

/// Sign an HS256 identity token for `identity` valid for `ttl_secs`.
///
/// A negative `ttl_secs` yields an already-expired token.
///
/// # Panics
///
/// Panics if encoding fails.
#[must_use]
pub fn sign_identity_token(identity: &Identity, secret: &str, ttl_secs: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = IdentityClaims {
        sub: identity.id.as_str().to_string(),
        name: identity.name.clone(),
        picture: identity.image.clone(),
        exp: now + ttl_secs,
        iat: now,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("identity token should encode")
}

// ============================================================================
// RTP
// ============================================================================

/// Opus 48 kHz stereo send parameters.
#[must_use]
pub fn opus_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type: 100,
            clock_rate: 48_000,
            channels: Some(2),
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        }],
        encodings: vec![json!({"ssrc": 1111})],
        ..RtpParameters::default()
    }
}

/// VP8 send parameters.
#[must_use]
pub fn vp8_rtp_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("1".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: "video/VP8".to_string(),
            payload_type: 101,
            clock_rate: 90_000,
            channels: None,
            parameters: Map::new(),
            rtcp_feedback: Vec::new(),
        }],
        encodings: vec![json!({"ssrc": 2222})],
        ..RtpParameters::default()
    }
}

/// A receiver that supports every codec the routers offer.
#[must_use]
pub fn full_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: router_media_codecs(),
        header_extensions: Vec::new(),
    }
}

/// A receiver that can only decode audio.
#[must_use]
pub fn audio_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: router_media_codecs()
            .into_iter()
            .filter(|codec| codec.kind == MediaKind::Audio)
            .collect(),
        header_extensions: Vec::new(),
    }
}

#[must_use]
pub fn client_dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: Some("client".to_string()),
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89".to_string(),
        }],
    }
}

// ============================================================================
// Signaling payloads
// ============================================================================

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).expect("fixture should serialise")
}

#[must_use]
pub fn create_room_payload(name: &str, visibility: &str) -> Value {
    json!({"name": name, "visibility": visibility})
}

#[must_use]
pub fn connect_transport_payload(direction: &str) -> Value {
    json!({"direction": direction, "dtlsParameters": to_json(&client_dtls_parameters())})
}

/// `produce` payload for the microphone.
#[must_use]
pub fn produce_audio_payload() -> Value {
    json!({
        "kind": "audio",
        "rtpParameters": to_json(&opus_rtp_parameters()),
        "appKind": "audio",
    })
}

/// `produce` payload for the video half of a screen share.
#[must_use]
pub fn produce_screen_video_payload() -> Value {
    json!({
        "kind": "video",
        "rtpParameters": to_json(&vp8_rtp_parameters()),
        "appKind": "screenShare-video",
    })
}

/// `produce` payload for the audio half of a screen share.
#[must_use]
pub fn produce_screen_audio_payload() -> Value {
    json!({
        "kind": "audio",
        "rtpParameters": to_json(&opus_rtp_parameters()),
        "appKind": "screenShare-audio",
    })
}

#[must_use]
pub fn consume_payload(producer_id: &str, capabilities: &RtpCapabilities) -> Value {
    json!({"producerId": producer_id, "rtpCapabilities": to_json(capabilities)})
}
