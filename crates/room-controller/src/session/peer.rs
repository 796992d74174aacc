//! One identity's presence in one room.

use super::{AppKind, ChannelStack, ProducerSlotKind, TransportDirection};
use crate::dispatch::frames::{PeerSummary, ProducerSummary};
use crate::engine::{ConsumerId, MediaConsumer, MediaProducer, MediaTransport, ProducerId};
use crate::errors::RcError;

use common::types::Identity;
use std::collections::HashMap;
use std::sync::Arc;

struct ScreenShare {
    video: Arc<dyn MediaProducer>,
    audio: Option<Arc<dyn MediaProducer>>,
}

/// Producer slots of a peer.
///
/// At most one audio producer and at most one screen-share pair. The
/// screen-share audio producer can only exist next to a screen-share video
/// producer. Occupied slots are never overwritten.
#[derive(Default)]
pub struct ProducerSlots {
    audio: Option<Arc<dyn MediaProducer>>,
    screen_share: Option<ScreenShare>,
}

impl ProducerSlots {
    /// Check that a producer of `app_kind` could be installed.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Conflict` if the slot is occupied, or if screen-share
    /// audio is requested without an active screen-share video.
    pub fn check_vacant(&self, app_kind: AppKind) -> Result<(), RcError> {
        match app_kind {
            AppKind::Audio if self.audio.is_some() => Err(RcError::Conflict(
                "Audio producer already exists".to_string(),
            )),
            AppKind::ScreenShareVideo if self.screen_share.is_some() => Err(RcError::Conflict(
                "Screen share is already active".to_string(),
            )),
            AppKind::ScreenShareAudio => match &self.screen_share {
                None => Err(RcError::Conflict(
                    "Screen share audio requires an active screen share video".to_string(),
                )),
                Some(ss) if ss.audio.is_some() => Err(RcError::Conflict(
                    "Screen share audio producer already exists".to_string(),
                )),
                Some(_) => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Store a producer in its slot.
    ///
    /// # Errors
    ///
    /// Same as [`ProducerSlots::check_vacant`]. The producer is not stored on
    /// error; the caller still owns it and must close it.
    pub fn install(
        &mut self,
        app_kind: AppKind,
        producer: Arc<dyn MediaProducer>,
    ) -> Result<(), RcError> {
        self.check_vacant(app_kind)?;
        match app_kind {
            AppKind::Audio => self.audio = Some(producer),
            AppKind::ScreenShareVideo => {
                self.screen_share = Some(ScreenShare {
                    video: producer,
                    audio: None,
                });
            }
            AppKind::ScreenShareAudio => {
                if let Some(ss) = self.screen_share.as_mut() {
                    ss.audio = Some(producer);
                }
            }
        }
        Ok(())
    }

    /// Empty a slot and return the producers it held.
    pub fn take(&mut self, slot: ProducerSlotKind) -> Vec<Arc<dyn MediaProducer>> {
        match slot {
            ProducerSlotKind::Audio => self.audio.take().into_iter().collect(),
            ProducerSlotKind::ScreenShare => self
                .screen_share
                .take()
                .map(|ss| std::iter::once(ss.video).chain(ss.audio).collect())
                .unwrap_or_default(),
        }
    }

    pub fn take_all(&mut self) -> Vec<Arc<dyn MediaProducer>> {
        let mut all = self.take(ProducerSlotKind::Audio);
        all.extend(self.take(ProducerSlotKind::ScreenShare));
        all
    }

    #[must_use]
    pub fn audio(&self) -> Option<&Arc<dyn MediaProducer>> {
        self.audio.as_ref()
    }

    /// Every occupied slot as `(app_kind, producer)`.
    #[must_use]
    pub fn iter(&self) -> Vec<(AppKind, &Arc<dyn MediaProducer>)> {
        let mut out = Vec::new();
        if let Some(audio) = &self.audio {
            out.push((AppKind::Audio, audio));
        }
        if let Some(ss) = &self.screen_share {
            out.push((AppKind::ScreenShareVideo, &ss.video));
            if let Some(audio) = &ss.audio {
                out.push((AppKind::ScreenShareAudio, audio));
            }
        }
        out
    }

    #[must_use]
    pub fn find(&self, producer_id: &ProducerId) -> Option<(AppKind, &Arc<dyn MediaProducer>)> {
        self.iter().into_iter().find(|(_, p)| p.id() == producer_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.screen_share.is_none()
    }
}

/// Peer aggregate. `H` is the handle used to reach the live channel.
pub struct Peer<H> {
    pub identity: Identity,
    pub channels: ChannelStack<H>,
    pub muted: bool,
    pub speaking: bool,
    send_transport: Option<Arc<dyn MediaTransport>>,
    recv_transport: Option<Arc<dyn MediaTransport>>,
    pub producers: ProducerSlots,
    pub consumers: HashMap<ConsumerId, Arc<dyn MediaConsumer>>,
}

impl<H> Peer<H> {
    /// A new peer: no media state, muted, no channels yet.
    #[must_use]
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            channels: ChannelStack::new(),
            muted: true,
            speaking: false,
            send_transport: None,
            recv_transport: None,
            producers: ProducerSlots::default(),
            consumers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn transport(&self, direction: TransportDirection) -> Option<&Arc<dyn MediaTransport>> {
        match direction {
            TransportDirection::Send => self.send_transport.as_ref(),
            TransportDirection::Recv => self.recv_transport.as_ref(),
        }
    }

    /// Install a transport, returning the one it replaced.
    pub fn set_transport(
        &mut self,
        direction: TransportDirection,
        transport: Arc<dyn MediaTransport>,
    ) -> Option<Arc<dyn MediaTransport>> {
        match direction {
            TransportDirection::Send => self.send_transport.replace(transport),
            TransportDirection::Recv => self.recv_transport.replace(transport),
        }
    }

    pub fn take_transports(&mut self) -> Vec<Arc<dyn MediaTransport>> {
        self.send_transport
            .take()
            .into_iter()
            .chain(self.recv_transport.take())
            .collect()
    }

    /// Remove and return every consumer fed by one of `producer_ids`.
    pub fn take_consumers_of(&mut self, producer_ids: &[ProducerId]) -> Vec<Arc<dyn MediaConsumer>> {
        let doomed: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|(_, c)| producer_ids.contains(c.producer_id()))
            .map(|(id, _)| id.clone())
            .collect();

        doomed
            .iter()
            .filter_map(|id| self.consumers.remove(id))
            .collect()
    }

    #[must_use]
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.identity.id.clone(),
            name: self.identity.name.clone(),
            image: self.identity.image.clone(),
            muted: self.muted,
            speaking: self.speaking,
            producers: self
                .producers
                .iter()
                .into_iter()
                .map(|(app_kind, p)| ProducerSummary {
                    producer_id: p.id().clone(),
                    app_kind,
                    kind: p.kind(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, MediaKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubProducer {
        id: ProducerId,
        kind: MediaKind,
        closed: AtomicBool,
    }

    #[async_trait]
    impl MediaProducer for StubProducer {
        fn id(&self) -> &ProducerId {
            &self.id
        }
        fn kind(&self) -> MediaKind {
            self.kind
        }
        fn is_paused(&self) -> bool {
            false
        }
        async fn pause(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn resume(&self) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn producer(kind: MediaKind) -> Arc<dyn MediaProducer> {
        Arc::new(StubProducer {
            id: ProducerId::generate(),
            kind,
            closed: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_second_audio_producer_conflicts() {
        let mut slots = ProducerSlots::default();
        slots.install(AppKind::Audio, producer(MediaKind::Audio)).unwrap();

        let result = slots.install(AppKind::Audio, producer(MediaKind::Audio));
        assert!(matches!(result, Err(RcError::Conflict(_))));
    }

    #[test]
    fn test_second_screen_share_video_conflicts() {
        let mut slots = ProducerSlots::default();
        slots
            .install(AppKind::ScreenShareVideo, producer(MediaKind::Video))
            .unwrap();

        assert!(matches!(
            slots.check_vacant(AppKind::ScreenShareVideo),
            Err(RcError::Conflict(_))
        ));
    }

    #[test]
    fn test_screen_share_audio_requires_video() {
        let mut slots = ProducerSlots::default();
        assert!(matches!(
            slots.install(AppKind::ScreenShareAudio, producer(MediaKind::Audio)),
            Err(RcError::Conflict(_))
        ));

        slots
            .install(AppKind::ScreenShareVideo, producer(MediaKind::Video))
            .unwrap();
        slots
            .install(AppKind::ScreenShareAudio, producer(MediaKind::Audio))
            .unwrap();
        assert!(matches!(
            slots.install(AppKind::ScreenShareAudio, producer(MediaKind::Audio)),
            Err(RcError::Conflict(_))
        ));
    }

    #[test]
    fn test_take_screen_share_returns_pair_and_clears_slot() {
        let mut slots = ProducerSlots::default();
        slots.install(AppKind::Audio, producer(MediaKind::Audio)).unwrap();
        slots
            .install(AppKind::ScreenShareVideo, producer(MediaKind::Video))
            .unwrap();
        slots
            .install(AppKind::ScreenShareAudio, producer(MediaKind::Audio))
            .unwrap();

        let taken = slots.take(ProducerSlotKind::ScreenShare);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].kind(), MediaKind::Video);
        assert!(slots.check_vacant(AppKind::ScreenShareVideo).is_ok());
        assert!(slots.audio().is_some());

        // Empty slot yields nothing
        assert!(slots.take(ProducerSlotKind::ScreenShare).is_empty());
    }

    #[test]
    fn test_find_and_take_all() {
        let mut slots = ProducerSlots::default();
        let audio = producer(MediaKind::Audio);
        let audio_id = audio.id().clone();
        slots.install(AppKind::Audio, audio).unwrap();
        slots
            .install(AppKind::ScreenShareVideo, producer(MediaKind::Video))
            .unwrap();

        let (app_kind, _) = slots.find(&audio_id).unwrap();
        assert_eq!(app_kind, AppKind::Audio);
        assert!(slots.find(&ProducerId::generate()).is_none());

        assert_eq!(slots.take_all().len(), 2);
        assert!(slots.is_empty());
    }

    #[test]
    fn test_new_peer_starts_muted_and_empty() {
        let peer: Peer<()> = Peer::new(Identity::new("u1", "Alice", None));
        assert!(peer.muted);
        assert!(!peer.speaking);
        assert!(peer.transport(TransportDirection::Send).is_none());
        assert!(peer.channels.is_empty());

        let summary = peer.summary();
        assert_eq!(summary.id.as_str(), "u1");
        assert!(summary.producers.is_empty());
    }

    #[test]
    fn test_summary_lists_producers() {
        let mut peer: Peer<()> = Peer::new(Identity::new("u1", "Alice", None));
        peer.producers
            .install(AppKind::Audio, producer(MediaKind::Audio))
            .unwrap();

        let summary = peer.summary();
        assert_eq!(summary.producers.len(), 1);
        assert_eq!(summary.producers[0].app_kind, AppKind::Audio);
        assert_eq!(summary.producers[0].kind, MediaKind::Audio);
    }
}
