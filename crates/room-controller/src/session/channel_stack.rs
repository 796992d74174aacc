//! Per-identity channel stack.
//!
//! An identity may hold exactly one live signaling channel per room. A new
//! channel for the same identity replaces the previous one: the old top is
//! popped and handed back to the caller as an [`Eviction`] so it can be told
//! to leave. Media state stays with the identity, not the channel.
//!
//! ```text
//! Absent ──attach──▶ Active ──attach(other)──▶ Active (+ Eviction)
//!                      │
//!                      └──detach(top)──▶ Absent
//! ```

use common::types::ChannelId;

/// A channel displaced by a newer channel of the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction<H> {
    pub channel_id: ChannelId,
    pub handle: H,
}

/// Outcome of [`ChannelStack::attach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attach<H> {
    /// The stack was empty; this is a new participant.
    Fresh,
    /// The channel is already the live one.
    Unchanged,
    /// The channel replaced the previous live channel.
    Replaced(Eviction<H>),
}

/// Outcome of [`ChannelStack::detach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// The channel is not the live one (already evicted or never attached).
    Stale,
    /// The live channel was removed.
    Removed { now_empty: bool },
}

/// Channels used by one identity in one room, newest on top.
///
/// Only the top entry is live. Displaced entries are evicted on the spot, so
/// the stack never holds more than one entry; `evictions` keeps the count.
#[derive(Debug)]
pub struct ChannelStack<H> {
    entries: Vec<(ChannelId, H)>,
    evictions: usize,
}

impl<H> Default for ChannelStack<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            evictions: 0,
        }
    }
}

impl<H> ChannelStack<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, channel_id: ChannelId, handle: H) -> Attach<H> {
        if self.is_live(channel_id) {
            return Attach::Unchanged;
        }

        self.entries.push((channel_id, handle));
        if self.entries.len() == 1 {
            return Attach::Fresh;
        }

        let (evicted_id, evicted_handle) = self.entries.remove(0);
        self.evictions += 1;
        Attach::Replaced(Eviction {
            channel_id: evicted_id,
            handle: evicted_handle,
        })
    }

    pub fn detach(&mut self, channel_id: ChannelId) -> Detach {
        if !self.is_live(channel_id) {
            return Detach::Stale;
        }
        self.entries.pop();
        Detach::Removed {
            now_empty: self.entries.is_empty(),
        }
    }

    /// Remove every channel, returning the live one if any.
    pub fn clear(&mut self) -> Option<(ChannelId, H)> {
        let live = self.entries.pop();
        self.entries.clear();
        live
    }

    #[must_use]
    pub fn is_live(&self, channel_id: ChannelId) -> bool {
        self.entries.last().is_some_and(|(id, _)| *id == channel_id)
    }

    #[must_use]
    pub fn live(&self) -> Option<&H> {
        self.entries.last().map(|(_, h)| h)
    }

    #[must_use]
    pub fn live_channel(&self) -> Option<ChannelId> {
        self.entries.last().map(|(id, _)| *id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn evictions(&self) -> usize {
        self.evictions
    }
}
