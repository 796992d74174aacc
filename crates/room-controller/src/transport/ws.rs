//! WebSocket signaling endpoint.
//!
//! `GET /ws` upgrades to a WebSocket carrying JSON text frames. Each socket
//! gets one [`ConnectionActor`]; this module only moves frames:
//!
//! - the reader task decodes text frames and hands them to the actor
//! - the writer task serialises whatever the actor pushes
//!
//! Frames that are not valid JSON, or binary frames, are answered with an
//! `error` event carrying `PROTOCOL_VIOLATION`. The socket stays open.

use super::auth::{resolve_channel_identity, IdentityResolver};
use crate::actors::connection::{ConnectionActor, ConnectionActorHandle};
use crate::actors::metrics::ActorMetrics;
use crate::actors::registry::RoomRegistryActorHandle;
use crate::dispatch::frames::{ClientFrame, ServerEvent, ServerFrame};
use crate::dispatch::Dispatcher;
use crate::errors::RcError;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::types::{ChannelId, Identity};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, debug_span, info, instrument, warn, Span};

/// Frames queued for one socket writer.
pub const OUTBOUND_BUFFER: usize = 256;

/// Shared state of the signaling router.
#[derive(Clone)]
pub struct SignalingState {
    pub registry: RoomRegistryActorHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub identity: Arc<dyn IdentityResolver>,
    pub metrics: Arc<ActorMetrics>,
    /// Parent of every connection actor's token.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Routes for the signaling server. Upgrade requests are traced by
/// `tower_http`.
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span without the query string, which may carry an identity token.
fn request_span(request: &Request) -> Span {
    debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

async fn ws_handler(
    State(state): State<SignalingState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let identity =
        match resolve_channel_identity(state.identity.as_ref(), params.token.as_deref(), &headers) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(target: "rc.transport.ws", error = ?e, "Rejected identity token");
                return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
            }
        };

    let Some(upgrade) = upgrade else {
        return (StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required").into_response();
    };

    upgrade.on_upgrade(move |socket| serve_channel(socket, state, identity))
}

/// Run one signaling channel until either side closes it.
#[instrument(skip_all, name = "rc.transport.channel")]
async fn serve_channel(socket: WebSocket, state: SignalingState, identity: Option<Identity>) {
    let channel_id = ChannelId::new();
    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let cancel_token = state.shutdown.child_token();

    info!(
        target: "rc.transport.ws",
        channel_id = %channel_id,
        authenticated = identity.is_some(),
        "Signaling channel opened"
    );

    let (handle, actor_task) = ConnectionActor::spawn(
        channel_id,
        identity,
        state.registry.clone(),
        Arc::clone(&state.dispatcher),
        outbound_tx.clone(),
        cancel_token.clone(),
        Arc::clone(&state.metrics),
    );

    let writer = tokio::spawn(write_frames(sink, outbound_rx, channel_id));

    read_frames(stream, &handle, &outbound_tx, &cancel_token).await;

    // Queued inbound frames are still processed before the actor leaves its room
    if handle.close("socket closed".to_string()).await.is_err() {
        handle.cancel();
    }
    if let Err(e) = actor_task.await {
        warn!(target: "rc.transport.ws", channel_id = %channel_id, error = %e, "Connection actor task failed");
    }

    drop(outbound_tx);
    let _ = writer.await;

    info!(target: "rc.transport.ws", channel_id = %channel_id, "Signaling channel closed");
}

async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    handle: &ConnectionActorHandle,
    outbound: &mpsc::Sender<ServerFrame>,
    cancel_token: &CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = cancel_token.cancelled() => return,
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                Ok(frame) => {
                    if handle.inbound(frame).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    if outbound.send(protocol_error(&e)).await.is_err() {
                        return;
                    }
                }
            },
            Some(Ok(Message::Binary(_))) => {
                let e = RcError::ProtocolViolation("binary frames are not supported".to_string());
                if outbound.send(protocol_error(&e)).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            // Ping/pong are answered by the WebSocket layer
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(
                    target: "rc.transport.ws",
                    channel_id = %handle.channel_id(),
                    error = %e,
                    "Socket read failed"
                );
                return;
            }
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerFrame>,
    channel_id: ChannelId,
) {
    while let Some(frame) = outbound.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "rc.transport.ws",
                    channel_id = %channel_id,
                    error = %e,
                    "Failed to serialise outbound frame"
                );
                continue;
            }
        };

        if sink.send(Message::Text(text)).await.is_err() {
            debug!(target: "rc.transport.ws", channel_id = %channel_id, "Socket write failed");
            break;
        }
    }

    let _ = sink.close().await;
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// `RcError::ProtocolViolation` if the text is not a client frame.
pub fn decode_frame(text: &str) -> Result<ClientFrame, RcError> {
    serde_json::from_str(text)
        .map_err(|e| RcError::ProtocolViolation(format!("malformed frame: {e}")))
}

fn protocol_error(err: &RcError) -> ServerFrame {
    ServerFrame::Event(ServerEvent::Error {
        event: None,
        errors: err.to_details(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::registry::RegistrySettings;
    use crate::actors::room::RoomSettings;
    use crate::dispatch::handlers::build_dispatcher;
    use crate::engine::{simulated, TransportListenConfig};
    use crate::errors::ErrorCode;
    use crate::transport::auth::JwtIdentityResolver;
    use axum::body::Body;
    use axum::http::Request;
    use common::jwt::IdentityClaims;
    use common::secret::SecretString;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    const TEST_SECRET: &str = "ws-test-secret-0123456789abcdefghij";

    fn signed_token(sub: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = IdentityClaims {
            sub: sub.to_string(),
            name: "Test User".to_string(),
            picture: None,
            exp: now + 600,
            iat: now,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn state() -> SignalingState {
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryActorHandle::new(
            Arc::new(simulated::spawn_pool(1).unwrap()),
            RegistrySettings {
                max_rooms: 4,
                room: RoomSettings {
                    max_peers: 4,
                    chat_history_limit: 10,
                    listen: TransportListenConfig {
                        listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                        announced_ip: None,
                        port_min: 40_000,
                        port_max: 40_010,
                    },
                },
            },
            Arc::clone(&metrics),
        );
        SignalingState {
            registry,
            dispatcher: Arc::new(build_dispatcher().unwrap()),
            identity: Arc::new(JwtIdentityResolver::new(
                &SecretString::from(TEST_SECRET),
                Duration::from_secs(60),
            )),
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected_before_upgrade() {
        let app = signaling_router(state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws?token=not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_bearer_header_is_rejected() {
        let app = signaling_router(state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_plain_http_without_token_needs_upgrade() {
        let app = signaling_router(state());

        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn test_valid_token_passes_to_the_upgrade_check() {
        let app = signaling_router(state());
        let uri = format!("/ws?token={}", signed_token("alice"));

        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Accepted identity, but a plain GET cannot be upgraded
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn test_request_trace_omits_the_token() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let token = signed_token("alice");
        let app = signaling_router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/ws?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);

        let output = logs.contents();
        assert!(output.contains("path=/ws"), "request was not traced: {output}");
        assert!(!output.contains(&token));
        assert!(!output.contains("token="));
    }

    #[test]
    fn test_decode_frame() {
        let frame = decode_frame(r#"{"event":"getAllRooms","ack":1}"#).unwrap();
        assert_eq!(frame.event, "getAllRooms");

        let err = decode_frame("{not json").unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ProtocolViolation);

        let err = decode_frame(r#"{"payload":{}}"#).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ProtocolViolation);
    }

    #[test]
    fn test_protocol_error_is_an_unattributed_error_event() {
        let frame = protocol_error(&RcError::ProtocolViolation("x".to_string()));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "error");
        assert!(json["payload"].get("event").is_none());
        assert_eq!(json["payload"]["errors"][0]["code"], "PROTOCOL_VIOLATION");
    }
}
