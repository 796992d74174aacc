//! Channel identity resolution.
//!
//! A channel may present an identity token as the `token` query parameter or
//! as `Authorization: Bearer <token>`. The query parameter wins when both are
//! present because browsers cannot set headers on a WebSocket upgrade.
//!
//! No token means an unauthenticated channel. A token that fails validation is
//! rejected before the upgrade.

use common::jwt::{extract_bearer_token, IdentityTokenError, IdentityTokenValidator};
use common::secret::SecretString;
use common::types::Identity;

use axum::http::{header, HeaderMap};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Turns a presented token into an identity.
pub trait IdentityResolver: Send + Sync + fmt::Debug + 'static {
    /// # Errors
    ///
    /// Any [`IdentityTokenError`] means the token must be rejected.
    fn resolve(&self, token: &str) -> Result<Identity, IdentityTokenError>;
}

/// Resolves HS256 identity tokens signed with the shared auth secret.
#[derive(Debug)]
pub struct JwtIdentityResolver {
    validator: IdentityTokenValidator,
}

impl JwtIdentityResolver {
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        Self {
            validator: IdentityTokenValidator::new(secret, clock_skew),
        }
    }
}

impl IdentityResolver for JwtIdentityResolver {
    fn resolve(&self, token: &str) -> Result<Identity, IdentityTokenError> {
        self.validator
            .validate(token)
            .map(common::jwt::IdentityClaims::into_identity)
    }
}

/// Pick the token a client presented, if any.
#[must_use]
pub fn presented_token<'a>(query_token: Option<&'a str>, headers: &'a HeaderMap) -> Option<&'a str> {
    if let Some(token) = query_token.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(token);
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
}

/// Resolve the identity for an upgrade request.
///
/// # Errors
///
/// Returns the validation error when a token is present but invalid.
pub fn resolve_channel_identity(
    resolver: &dyn IdentityResolver,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<Option<Identity>, IdentityTokenError> {
    match presented_token(query_token, headers) {
        Some(token) => resolver.resolve(token).map(Some),
        None => {
            debug!(target: "rc.transport.auth", "No identity token presented");
            Ok(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    /// Accepts exactly one token.
    #[derive(Debug)]
    struct FixedResolver;

    impl IdentityResolver for FixedResolver {
        fn resolve(&self, token: &str) -> Result<Identity, IdentityTokenError> {
            if token == "good" {
                Ok(Identity::new("user-1", "Alice", None))
            } else {
                Err(IdentityTokenError::InvalidSignature)
            }
        }
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_no_token_is_anonymous() {
        let identity = resolve_channel_identity(&FixedResolver, None, &HeaderMap::new()).unwrap();
        assert!(identity.is_none());
    }

    #[test]
    fn test_blank_query_token_is_ignored() {
        let identity =
            resolve_channel_identity(&FixedResolver, Some("  "), &HeaderMap::new()).unwrap();
        assert!(identity.is_none());
    }

    #[test]
    fn test_query_token_wins_over_header() {
        let headers = bearer("bad");
        let identity = resolve_channel_identity(&FixedResolver, Some("good"), &headers).unwrap();
        assert_eq!(identity.unwrap().id.as_str(), "user-1");
    }

    #[test]
    fn test_bearer_header_is_used() {
        let identity = resolve_channel_identity(&FixedResolver, None, &bearer("good")).unwrap();
        assert_eq!(identity.unwrap().name, "Alice");
    }

    #[test]
    fn test_invalid_token_is_an_error() {
        let result = resolve_channel_identity(&FixedResolver, Some("bad"), &HeaderMap::new());
        assert_eq!(result.unwrap_err(), IdentityTokenError::InvalidSignature);
    }
}
