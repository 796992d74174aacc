//! Health probes and Prometheus metrics.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Identity ids may appear in spans and logs; display names, tokens and chat
//! text never do.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `rc_rooms_active` | Gauge | none |
//! | `rc_peers_active` | Gauge | none |
//! | `rc_connections_active` | Gauge | none |
//! | `rc_events_total` | Counter | `event`, `outcome` |
//! | `rc_event_latency_seconds` | Histogram | `event` |
//! | `rc_cascade_consumers_closed_total` | Counter | none |
//! | `rc_reconnect_evictions_total` | Counter | none |
//! | `rc_actor_panics_total` | Counter | `actor_type` |
//! | `rc_messages_dropped_total` | Counter | `actor_type` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
