//! Identity token validation.
//!
//! Clients present an HS256 JWT issued by the external auth provider when they
//! open a signaling channel. The Room Controller only needs `{id, name, image}`
//! from it, which map to the `sub`, `name` and `picture` claims.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted; `exp` and `sub` are required
//! - `iat` more than the clock skew in the future is rejected
//! - Every failure renders the same generic message
//! - `sub` is redacted in the Debug output of [`IdentityClaims`]

use crate::secret::{ExposeSecret, SecretString};
use crate::types::Identity;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed token size in bytes (8KB).
///
/// Identity tokens are a few hundred bytes. Anything larger is rejected before
/// base64 decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `exp` and `iat` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound on the configurable clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while validating an identity token.
///
/// Messages are intentionally identical; the variant is logged at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityTokenError {
    #[error("The identity token is invalid or expired")]
    TokenTooLarge,

    #[error("The identity token is invalid or expired")]
    MalformedToken,

    #[error("The identity token is invalid or expired")]
    InvalidSignature,

    #[error("The identity token is invalid or expired")]
    Expired,

    #[error("The identity token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by an identity token.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject (user identifier) - redacted in Debug output.
    pub sub: String,

    /// Display name. Falls back to `sub` when empty.
    #[serde(default)]
    pub name: String,

    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default)]
    pub iat: i64,
}

impl fmt::Debug for IdentityClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityClaims")
            .field("sub", &"[REDACTED]")
            .field("name", &self.name)
            .field("picture", &self.picture)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl IdentityClaims {
    /// Convert validated claims into the identity attached to a channel.
    #[must_use]
    pub fn into_identity(self) -> Identity {
        let name = if self.name.trim().is_empty() {
            self.sub.clone()
        } else {
            self.name
        };
        Identity::new(self.sub, name, self.picture)
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Validates HS256 identity tokens against a shared secret.
pub struct IdentityTokenValidator {
    key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl fmt::Debug for IdentityTokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityTokenValidator")
            .field("key", &"[REDACTED]")
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl IdentityTokenValidator {
    /// Create a validator. `clock_skew` is clamped to [`MAX_CLOCK_SKEW`].
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let clock_skew = clock_skew.min(MAX_CLOCK_SKEW);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = clock_skew.as_secs();
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
            clock_skew,
        }
    }

    /// Validate a token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityTokenError`] when the token is oversized, malformed,
    /// badly signed, expired, or issued in the future.
    pub fn validate(&self, token: &str) -> Result<IdentityClaims, IdentityTokenError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "common.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(IdentityTokenError::TokenTooLarge);
        }

        let data = decode::<IdentityClaims>(token, &self.key, &self.validation).map_err(|e| {
            let err = match e.kind() {
                ErrorKind::ExpiredSignature => IdentityTokenError::Expired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    IdentityTokenError::InvalidSignature
                }
                _ => IdentityTokenError::MalformedToken,
            };
            tracing::debug!(target: "common.jwt", error = %e, ?err, "Token rejected");
            err
        })?;

        if data.claims.sub.is_empty() {
            tracing::debug!(target: "common.jwt", "Token rejected: empty subject");
            return Err(IdentityTokenError::MalformedToken);
        }

        validate_iat(data.claims.iat, self.clock_skew)?;

        Ok(data.claims)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Strip the `Bearer ` prefix from an `Authorization` header value.
#[must_use]
pub fn extract_bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `IdentityTokenError::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), IdentityTokenError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), IdentityTokenError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(IdentityTokenError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
