//! Named-event dispatch with schema validation and ack envelopes.
//!
//! Every inbound event is routed to an [`EventHandler`] registered under its
//! name. Registration fixes, per event:
//!
//! - the [`AckMode`]: `WithAck` events must carry an `ack` id and are answered
//!   with an ack frame; `NoAck` events ignore any `ack` id and report failures
//!   on the `error` event
//! - whether the channel must carry an identity
//! - the payload schema, compiled once
//!
//! Checks run in order: unknown event, ack presence, identity, payload shape,
//! schema. The handler is only invoked when all pass. Errors become the wire
//! envelope here and nowhere else.

pub mod context;
pub mod frames;
pub mod handlers;
pub mod schema;

use crate::errors::{ErrorCode, RcError};
use crate::observability::metrics as prom;
use context::ChannelContext;
use frames::{AckFrame, ClientFrame, ServerEvent, ServerFrame};
use schema::{CompiledSchema, Schema, SchemaError};

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, info_span, Instrument};

/// Whether an event is answered with an ack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    NoAck,
    WithAck,
}

/// A handler for one inbound event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Payload: DeserializeOwned + Send;
    type Reply: Serialize + Send;

    const NAME: &'static str;
    const ACK: AckMode;
    const REQUIRES_IDENTITY: bool = true;

    fn schema() -> Option<Schema> {
        None
    }

    async fn handle(
        &self,
        ctx: &mut ChannelContext,
        payload: Self::Payload,
    ) -> Result<Self::Reply, RcError>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn call(&self, ctx: &mut ChannelContext, payload: Value) -> Result<Value, RcError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: EventHandler> ErasedHandler for Typed<H> {
    async fn call(&self, ctx: &mut ChannelContext, payload: Value) -> Result<Value, RcError> {
        let payload: H::Payload = serde_json::from_value(payload)
            .map_err(|e| RcError::invalid("payload", "type", e.to_string()))?;
        let reply = self.0.handle(ctx, payload).await?;
        serde_json::to_value(reply)
            .map_err(|e| RcError::Internal(format!("reply serialization failed: {e}")))
    }
}

struct Route {
    ack: AckMode,
    requires_identity: bool,
    schema: Option<CompiledSchema>,
    handler: Box<dyn ErasedHandler>,
}

/// Routing table from event name to handler.
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<&'static str, Route>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.events())
            .finish()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `H::NAME`, compiling its schema.
    ///
    /// # Errors
    ///
    /// `SchemaError::DuplicateEvent` if the name is taken, or any error from
    /// compiling the schema.
    pub fn register<H: EventHandler>(&mut self, handler: H) -> Result<(), SchemaError> {
        if self.routes.contains_key(H::NAME) {
            return Err(SchemaError::DuplicateEvent(H::NAME.to_string()));
        }
        let schema = H::schema().map(Schema::compile).transpose()?;

        self.routes.insert(
            H::NAME,
            Route {
                ack: H::ACK,
                requires_identity: H::REQUIRES_IDENTITY,
                schema,
                handler: Box::new(Typed(handler)),
            },
        );
        Ok(())
    }

    /// Registered event names, sorted.
    #[must_use]
    pub fn events(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.routes.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn ack_mode(&self, event: &str) -> Option<AckMode> {
        self.routes.get(event).map(|route| route.ack)
    }

    /// Run one inbound frame. Returns the frame to send back, if any.
    pub async fn dispatch(&self, ctx: &mut ChannelContext, frame: ClientFrame) -> Option<ServerFrame> {
        let started = Instant::now();
        let ClientFrame {
            event,
            payload,
            ack,
        } = frame;

        let Some((&name, route)) = self.routes.get_key_value(event.as_str()) else {
            debug!(
                target: "rc.dispatch",
                channel_id = %ctx.channel_id(),
                event_len = event.len(),
                "Unknown event"
            );
            let err = RcError::UnknownEvent(event.clone());
            prom::record_event("unknown", outcome_label(Some(&err)), started.elapsed());
            return Some(failure(ack, &event, &err));
        };

        let ack = match (route.ack, ack) {
            (AckMode::WithAck, None) => {
                let err = RcError::ProtocolViolation(format!("Event '{name}' requires an ack id"));
                prom::record_event(name, outcome_label(Some(&err)), started.elapsed());
                return Some(failure(None, name, &err));
            }
            (AckMode::WithAck, Some(id)) => Some(id),
            (AckMode::NoAck, _) => None,
        };

        let result = run_route(route, name, ctx, payload).await;
        prom::record_event(name, outcome_label(result.as_ref().err()), started.elapsed());

        match (ack, result) {
            (Some(id), Ok(data)) => Some(ServerFrame::Ack(AckFrame::ok(id, data))),
            (None, Ok(_)) => None,
            (ack, Err(e)) => Some(failure(ack, name, &e)),
        }
    }
}

async fn run_route(
    route: &Route,
    name: &'static str,
    ctx: &mut ChannelContext,
    payload: Option<Value>,
) -> Result<Value, RcError> {
    if route.requires_identity && !ctx.is_authenticated() {
        return Err(RcError::Unauthorized);
    }

    let payload = payload.unwrap_or_else(|| Value::Object(Map::new()));
    if !payload.is_object() {
        return Err(RcError::invalid("payload", "type", "must be an object"));
    }
    if let Some(schema) = &route.schema {
        let violations = schema.validate(&payload, "payload");
        if !violations.is_empty() {
            return Err(RcError::Validation(violations));
        }
    }

    let span = info_span!(
        "rc.dispatch.event",
        event = name,
        channel_id = %ctx.channel_id(),
        identity_id = ctx.identity_id().map(tracing::field::display)
    );

    let outcome = AssertUnwindSafe(route.handler.call(ctx, payload))
        .catch_unwind()
        .instrument(span)
        .await;

    match outcome {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(e)) => {
            if e.is_unexpected() {
                error!(target: "rc.dispatch", event = name, error = %e, "Handler failed");
            } else {
                debug!(target: "rc.dispatch", event = name, error = %e, "Handler rejected event");
            }
            Err(e)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(target: "rc.dispatch", event = name, panic = %message, "Handler panicked");
            Err(RcError::Internal(format!("handler panicked: {message}")))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn outcome_label(error: Option<&RcError>) -> &'static str {
    match error.map(RcError::error_code) {
        None => "ok",
        Some(ErrorCode::ValidationError) => "validation_error",
        Some(ErrorCode::NotFound) => "not_found",
        Some(ErrorCode::Conflict) => "conflict",
        Some(ErrorCode::Unauthorized) => "unauthorized",
        Some(ErrorCode::EngineError) => "engine_error",
        Some(ErrorCode::ProtocolViolation) => "protocol_violation",
        Some(ErrorCode::UnexpectedError) => "unexpected_error",
    }
}

/// Ack frame carrying the error when there is an ack id, otherwise an
/// `error` event.
fn failure(ack: Option<u64>, event: &str, err: &RcError) -> ServerFrame {
    match ack {
        Some(id) => ServerFrame::Ack(AckFrame::err(id, err.to_details())),
        None => ServerFrame::Event(ServerEvent::Error {
            event: Some(event.to_string()),
            errors: err.to_details(),
        }),
    }
}
