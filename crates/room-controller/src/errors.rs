//! Room Controller error types.
//!
//! Every failure the dispatch boundary can report maps to one stable
//! [`ErrorCode`]. Internal details are logged server-side but never exposed to
//! clients: [`RcError::client_message`] is the only text that goes on the wire.

use crate::dispatch::schema::FieldViolation;
use crate::engine::EngineError;

use serde::Serialize;
use thiserror::Error;

/// Stable wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Conflict,
    Unauthorized,
    EngineError,
    ProtocolViolation,
    UnexpectedError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::EngineError => "ENGINE_ERROR",
            ErrorCode::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorCode::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }
}

/// One entry of the `errors` array in an ack or `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Room Controller error type.
///
/// Maps to wire codes:
/// - `Validation`: `VALIDATION_ERROR`
/// - `*NotFound`, `NotInRoom`, `UnknownEvent`: `NOT_FOUND`
/// - `Conflict`, `CapacityExceeded`, `Draining`: `CONFLICT`
/// - `Unauthorized`: `UNAUTHORIZED`
/// - `Engine`: `ENGINE_ERROR`
/// - `ProtocolViolation`: `PROTOCOL_VIOLATION`
/// - `Internal`: `UNEXPECTED_ERROR`
#[derive(Debug, Error)]
pub enum RcError {
    /// Payload failed schema validation.
    #[error("Validation failed: {} violation(s)", .0.len())]
    Validation(Vec<FieldViolation>),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// The channel has not joined a room.
    #[error("Channel is not in a room")]
    NotInRoom,

    /// No handler is registered under this event name.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// State conflict (duplicate room, occupied producer slot, ...).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The registry is shutting down.
    #[error("Room Controller is draining")]
    Draining,

    /// The channel carries no identity.
    #[error("Unauthorized")]
    Unauthorized,

    /// The media engine rejected or failed an operation.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// The client broke the envelope contract (e.g. missing ack id).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Anything else. Details stay in the logs.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Shorthand for a single-field validation failure.
    #[must_use]
    pub fn invalid(path: impl Into<String>, rule: &'static str, message: impl Into<String>) -> Self {
        RcError::Validation(vec![FieldViolation {
            path: path.into(),
            rule,
            message: message.into(),
        }])
    }

    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RcError::Validation(_) => ErrorCode::ValidationError,
            RcError::RoomNotFound(_)
            | RcError::PeerNotFound(_)
            | RcError::TransportNotFound(_)
            | RcError::ProducerNotFound(_)
            | RcError::ConsumerNotFound(_)
            | RcError::NotInRoom
            | RcError::UnknownEvent(_) => ErrorCode::NotFound,
            RcError::Conflict(_) | RcError::CapacityExceeded(_) | RcError::Draining => {
                ErrorCode::Conflict
            }
            RcError::Unauthorized => ErrorCode::Unauthorized,
            RcError::Engine(_) => ErrorCode::EngineError,
            RcError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            RcError::Internal(_) => ErrorCode::UnexpectedError,
        }
    }

    /// Whether this error indicates a bug or infrastructure fault rather than
    /// a client mistake.
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        matches!(self, RcError::Internal(_))
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Validation(_) => "Payload validation failed".to_string(),
            RcError::RoomNotFound(_) => "Room not found".to_string(),
            RcError::PeerNotFound(_) => "Peer is not active in this room".to_string(),
            RcError::TransportNotFound(_) => "Transport not found".to_string(),
            RcError::ProducerNotFound(_) => "Producer not found".to_string(),
            RcError::ConsumerNotFound(_) => "Consumer not found".to_string(),
            RcError::NotInRoom => "Join a room first".to_string(),
            RcError::UnknownEvent(name) => format!("Unknown event '{name}'"),
            RcError::CapacityExceeded(_) => "Capacity exceeded, please try again later".to_string(),
            RcError::Draining => "Server is shutting down, please reconnect".to_string(),
            RcError::Unauthorized => "Authentication required".to_string(),
            RcError::Engine(e) => e.client_message(),
            RcError::Conflict(msg) | RcError::ProtocolViolation(msg) => msg.clone(),
            RcError::Internal(_) => "An unexpected error occurred".to_string(),
        }
    }

    /// Render the error as the `errors` array sent to clients.
    ///
    /// Validation failures produce one entry per violated field.
    #[must_use]
    pub fn to_details(&self) -> Vec<ErrorDetail> {
        match self {
            RcError::Validation(violations) if !violations.is_empty() => violations
                .iter()
                .map(|v| ErrorDetail {
                    code: ErrorCode::ValidationError,
                    message: v.message.clone(),
                    path: Some(v.path.clone()),
                })
                .collect(),
            other => vec![ErrorDetail {
                code: other.error_code(),
                message: other.client_message(),
                path: None,
            }],
        }
    }
}
