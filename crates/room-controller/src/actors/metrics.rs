//! Mailbox monitoring and actor-system counters.
//!
//! Each actor owns a [`MailboxMonitor`]. Depth thresholds per actor type:
//!
//! | Actor      | Elevated | Backlogged |
//! |------------|----------|------------|
//! | Registry   | > 100    | > 500      |
//! | Room       | > 100    | > 500      |
//! | Connection | > 50     | > 200      |
//!
//! [`ActorMetrics`] keeps the live counts in atomics and mirrors every change
//! into the `rc_*_active` gauges.

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depths at which a mailbox is worth a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    pub elevated: usize,
    pub backlogged: usize,
}

const ROOM_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    elevated: 100,
    backlogged: 500,
};

const CONNECTION_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    elevated: 50,
    backlogged: 200,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RoomRegistryActor` (singleton).
    Registry,
    /// `RoomActor` (one per room).
    Room,
    /// `ConnectionActor` (one per signaling channel).
    Connection,
}

impl ActorType {
    /// Label value for `actor_type`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn mailbox_thresholds(&self) -> MailboxThresholds {
        match self {
            ActorType::Registry | ActorType::Room => ROOM_THRESHOLDS,
            ActorType::Connection => CONNECTION_THRESHOLDS,
        }
    }
}

/// Queue depth and throughput of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    owner: String,
    thresholds: MailboxThresholds,
    depth: AtomicUsize,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, owner: impl Into<String>) -> Self {
        Self {
            actor_type,
            owner: owner.into(),
            thresholds: actor_type.mailbox_thresholds(),
            depth: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        if depth > self.thresholds.backlogged {
            warn!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                limit = self.thresholds.backlogged,
                "Mailbox backlogged"
            );
        } else if depth == self.thresholds.elevated + 1 {
            debug!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                "Mailbox depth elevated"
            );
        }
    }

    pub fn record_dequeue(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// A notice for this actor could not be delivered (mailbox full or closed).
    pub fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_message_dropped(self.actor_type.as_str());
        warn!(
            target: "rc.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            owner = %self.owner,
            dropped,
            "Message dropped"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_backlogged(&self) -> bool {
        self.current_depth() > self.thresholds.backlogged
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Process-wide actor counters, shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_rooms: AtomicUsize,
    active_peers: AtomicUsize,
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
    total_messages_processed: AtomicU64,
}

fn decrement(counter: &AtomicUsize, by: usize) -> usize {
    let previous = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(by))
        })
        .unwrap_or_default();
    previous.saturating_sub(by)
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let n = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(n);
    }

    pub fn room_removed(&self) {
        prom::set_rooms_active(decrement(&self.active_rooms, 1));
    }

    pub fn peer_added(&self) {
        let n = self.active_peers.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_peers_active(n);
    }

    pub fn peers_removed(&self, count: usize) {
        if count > 0 {
            prom::set_peers_active(decrement(&self.active_peers, count));
        }
    }

    pub fn connection_created(&self) {
        let n = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_connections_active(n);
    }

    pub fn connection_closed(&self) {
        prom::set_connections_active(decrement(&self.active_connections, 1));
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "rc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.active_peers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.total_messages_processed.load(Ordering::Relaxed)
    }
}
