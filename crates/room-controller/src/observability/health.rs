//! Liveness and readiness endpoints.
//!
//! - `GET /health`: 200 while the process is up and the engine pool is intact
//! - `GET /ready`: 200 once the signaling listener is bound, 503 before that,
//!   during shutdown, and after an engine worker died
//!
//! `/metrics` is merged into the same router by `main`.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
    engine_failed: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Not ready, engine healthy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            engine_failed: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// An engine worker died; the process is about to exit.
    pub fn set_engine_failed(&self) {
        self.engine_failed.store(true, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.engine_failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_live() && self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize)]
struct ProbeBody {
    status: &'static str,
}

pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ProbeBody>) {
    if state.is_live() {
        (StatusCode::OK, Json(ProbeBody { status: "alive" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeBody {
                status: "engine_failed",
            }),
        )
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ProbeBody>) {
    if state.is_ready() {
        (StatusCode::OK, Json(ProbeBody { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProbeBody {
                status: "not_ready",
            }),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_status(state: Arc<HealthState>, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        health_router(state)
            .oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_transitions() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready());

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[test]
    fn test_engine_failure_overrides_ready() {
        let state = HealthState::new();
        state.set_ready();

        state.set_engine_failed();
        assert!(!state.is_live());
        assert!(!state.is_ready());

        // Readiness cannot come back once the engine is gone
        state.set_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let state = Arc::new(HealthState::new());
        assert_eq!(get_status(Arc::clone(&state), "/health").await, StatusCode::OK);

        state.set_engine_failed();
        assert_eq!(
            get_status(state, "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_readiness_endpoint() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            get_status(Arc::clone(&state), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(get_status(state, "/ready").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let state = Arc::new(HealthState::new());
        assert_eq!(get_status(state, "/unknown").await, StatusCode::NOT_FOUND);
    }
}
