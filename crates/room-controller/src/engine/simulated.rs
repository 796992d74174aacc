//! In-process media engine.
//!
//! Implements the collaborator traits with pure bookkeeping: ids, codec
//! compatibility, pause state and close propagation behave like the real
//! engine, but no sockets are opened and no media flows. The binary runs on
//! this engine by default and the test suites use it directly.
//!
//! Locks are `std::sync::Mutex` and are never held across an await. Closed
//! objects drop out of their owner's table, so a long-lived router only
//! holds what is still open.

use super::{
    ConsumerId, DtlsFingerprint, DtlsParameters, EngineError, EnginePool, IceCandidate,
    IceParameters, MediaConsumer, MediaKind, MediaProducer, MediaRouter, MediaTransport,
    MediaWorker, ProducerId, RouterId, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpParameters, TransportId, TransportListenConfig, TransportParameters,
};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Table<K, V> = Arc<Mutex<HashMap<K, Arc<V>>>>;

fn table<K, V>() -> Table<K, V> {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Remove `key` from the table behind `owner`, if the owner still exists.
fn unlink<K: std::hash::Hash + Eq, V>(owner: &Weak<Mutex<HashMap<K, Arc<V>>>>, key: &K) {
    if let Some(owner) = owner.upgrade() {
        lock(&owner).remove(key);
    }
}

/// Build a pool of `workers` simulated workers sharing one failure token.
///
/// # Errors
///
/// Returns `EngineError::InvalidParameters` if `workers` is zero.
pub fn spawn_pool(workers: usize) -> Result<EnginePool, EngineError> {
    let (pool, _) = spawn_pool_with_handles(workers)?;
    Ok(pool)
}

/// Like [`spawn_pool`], also returning the concrete workers so tests can
/// inject failures.
///
/// # Errors
///
/// Returns `EngineError::InvalidParameters` if `workers` is zero.
pub fn spawn_pool_with_handles(
    workers: usize,
) -> Result<(EnginePool, Vec<Arc<SimulatedWorker>>), EngineError> {
    let failure = CancellationToken::new();
    let concrete: Vec<Arc<SimulatedWorker>> = (0..workers)
        .map(|i| Arc::new(SimulatedWorker::new(i, failure.clone())))
        .collect();
    let handles = concrete
        .iter()
        .map(|w| Arc::clone(w) as Arc<dyn MediaWorker>)
        .collect();
    Ok((EnginePool::new(handles, failure)?, concrete))
}

// ============================================================================
// Worker
// ============================================================================

#[derive(Debug)]
pub struct SimulatedWorker {
    index: usize,
    alive: Arc<AtomicBool>,
    failure: CancellationToken,
    routers_created: AtomicUsize,
}

impl SimulatedWorker {
    #[must_use]
    pub fn new(index: usize, failure: CancellationToken) -> Self {
        Self {
            index,
            alive: Arc::new(AtomicBool::new(true)),
            failure,
            routers_created: AtomicUsize::new(0),
        }
    }

    /// Simulate the worker process dying.
    pub fn kill(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            error!(
                target: "rc.engine",
                worker = self.index,
                "Engine worker died"
            );
            self.failure.cancel();
        }
    }

    #[must_use]
    pub fn routers_created(&self) -> usize {
        self.routers_created.load(Ordering::Relaxed)
    }

    fn new_router(&self, codecs: &[RtpCodecCapability]) -> Result<SimulatedRouter, EngineError> {
        if !self.is_alive() {
            return Err(EngineError::WorkerDied { worker: self.index });
        }
        if codecs.is_empty() {
            return Err(EngineError::InvalidParameters(
                "router needs at least one codec".to_string(),
            ));
        }

        self.routers_created.fetch_add(1, Ordering::Relaxed);
        let router = SimulatedRouter {
            inner: Arc::new(RouterInner {
                id: RouterId::generate(),
                worker: self.index,
                worker_alive: Arc::clone(&self.alive),
                codecs: codecs.to_vec(),
                closed: AtomicBool::new(false),
                producers: Mutex::new(HashMap::new()),
                transports: table(),
                port_cursor: AtomicU32::new(0),
            }),
        };

        debug!(
            target: "rc.engine",
            worker = self.index,
            router_id = %router.inner.id,
            "Router created"
        );
        Ok(router)
    }
}

#[async_trait]
impl MediaWorker for SimulatedWorker {
    fn index(&self) -> usize {
        self.index
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn create_router(
        &self,
        codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn MediaRouter>, EngineError> {
        Ok(Arc::new(self.new_router(codecs)?) as Arc<dyn MediaRouter>)
    }
}

// ============================================================================
// Router
// ============================================================================

struct RouterInner {
    id: RouterId,
    worker: usize,
    worker_alive: Arc<AtomicBool>,
    codecs: Vec<RtpCodecCapability>,
    closed: AtomicBool,
    producers: Mutex<HashMap<ProducerId, Arc<SimulatedProducer>>>,
    transports: Table<TransportId, SimulatedTransport>,
    port_cursor: AtomicU32,
}

impl RouterInner {
    fn ensure_usable(&self) -> Result<(), EngineError> {
        if !self.worker_alive.load(Ordering::SeqCst) {
            return Err(EngineError::WorkerDied {
                worker: self.worker,
            });
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::RouterClosed);
        }
        Ok(())
    }

    fn supports(&self, codec: &RtpCodecParameters) -> bool {
        self.codecs
            .iter()
            .any(|c| c.matches(&codec.mime_type, codec.clock_rate, codec.channels))
    }

    fn live_producer(&self, producer_id: &ProducerId) -> Option<Arc<SimulatedProducer>> {
        lock(&self.producers)
            .get(producer_id)
            .filter(|p| !p.closed.load(Ordering::SeqCst))
            .cloned()
    }

    /// First producer codec the receiver can decode, mapped onto the
    /// receiver's preferred payload type.
    fn consumable_codec(
        producer: &SimulatedProducer,
        caps: &RtpCapabilities,
    ) -> Option<RtpCodecParameters> {
        producer.rtp_parameters.codecs.iter().find_map(|codec| {
            caps.codecs
                .iter()
                .find(|cap| cap.matches(&codec.mime_type, codec.clock_rate, codec.channels))
                .map(|cap| RtpCodecParameters {
                    payload_type: cap.preferred_payload_type.unwrap_or(codec.payload_type),
                    ..codec.clone()
                })
        })
    }

    fn next_port(&self, listen: &TransportListenConfig) -> Result<u16, EngineError> {
        if listen.port_min > listen.port_max {
            return Err(EngineError::InvalidParameters(format!(
                "port range {}-{} is empty",
                listen.port_min, listen.port_max
            )));
        }
        let span = u32::from(listen.port_max) - u32::from(listen.port_min) + 1;
        let offset = self.port_cursor.fetch_add(1, Ordering::Relaxed) % span;
        u16::try_from(u32::from(listen.port_min) + offset)
            .map_err(|e| EngineError::InvalidParameters(e.to_string()))
    }
}

pub struct SimulatedRouter {
    inner: Arc<RouterInner>,
}

impl SimulatedRouter {
    /// Transports created on this router and not yet closed.
    #[must_use]
    pub fn open_transports(&self) -> usize {
        lock(&self.inner.transports).len()
    }

    fn new_transport(
        &self,
        listen: &TransportListenConfig,
    ) -> Result<Arc<SimulatedTransport>, EngineError> {
        self.inner.ensure_usable()?;

        let port = self.inner.next_port(listen)?;
        let id = TransportId::generate();
        let ip = listen
            .announced_ip
            .clone()
            .unwrap_or_else(|| listen.listen_ip.to_string());

        let parameters = TransportParameters {
            id: id.clone(),
            ice_parameters: IceParameters {
                username_fragment: random_token(12),
                password: random_token(24),
                ice_lite: true,
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1_076_302_079,
                ip,
                port,
                protocol: "udp".to_string(),
                candidate_type: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: Some("auto".to_string()),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: random_fingerprint(),
                }],
            },
        };

        let transport = Arc::new(SimulatedTransport {
            id,
            parameters,
            router: Arc::downgrade(&self.inner),
            owner: Arc::downgrade(&self.inner.transports),
            closed: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            producers: table(),
            consumers: table(),
        });
        lock(&self.inner.transports).insert(transport.id.clone(), Arc::clone(&transport));

        debug!(
            target: "rc.engine",
            router_id = %self.inner.id,
            transport_id = %transport.id,
            port,
            "Transport created"
        );
        Ok(transport)
    }
}

#[async_trait]
impl MediaRouter for SimulatedRouter {
    fn id(&self) -> &RouterId {
        &self.inner.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities {
            codecs: self.inner.codecs.clone(),
            header_extensions: Vec::new(),
        }
    }

    fn can_consume(&self, producer_id: &ProducerId, caps: &RtpCapabilities) -> bool {
        if self.inner.ensure_usable().is_err() {
            return false;
        }
        self.inner
            .live_producer(producer_id)
            .is_some_and(|p| RouterInner::consumable_codec(&p, caps).is_some())
    }

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListenConfig,
    ) -> Result<Arc<dyn MediaTransport>, EngineError> {
        Ok(self.new_transport(listen)? as Arc<dyn MediaTransport>)
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<_> = lock(&self.inner.transports).drain().collect();
        for (_, transport) in transports {
            transport.close_now();
        }
        lock(&self.inner.producers).clear();
        debug!(target: "rc.engine", router_id = %self.inner.id, "Router closed");
    }
}

// ============================================================================
// Transport
// ============================================================================

pub struct SimulatedTransport {
    id: TransportId,
    parameters: TransportParameters,
    router: Weak<RouterInner>,
    owner: Weak<Mutex<HashMap<TransportId, Arc<SimulatedTransport>>>>,
    closed: AtomicBool,
    connected: AtomicBool,
    producers: Table<ProducerId, SimulatedProducer>,
    consumers: Table<ConsumerId, SimulatedConsumer>,
}

impl SimulatedTransport {
    fn router(&self) -> Result<Arc<RouterInner>, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::TransportClosed);
        }
        let router = self.router.upgrade().ok_or(EngineError::RouterClosed)?;
        router.ensure_usable()?;
        Ok(router)
    }

    fn close_now(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        unlink(&self.owner, &self.id);
        let producers: Vec<_> = lock(&self.producers).drain().collect();
        for (_, producer) in producers {
            producer.close_now();
        }
        let consumers: Vec<_> = lock(&self.consumers).drain().collect();
        for (_, consumer) in consumers {
            consumer.close_now();
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Producers on this transport that are still open.
    #[must_use]
    pub fn open_producers(&self) -> usize {
        lock(&self.producers).len()
    }

    /// Consumers on this transport that are still open.
    #[must_use]
    pub fn open_consumers(&self) -> usize {
        lock(&self.consumers).len()
    }
}

#[async_trait]
impl MediaTransport for SimulatedTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    fn parameters(&self) -> TransportParameters {
        self.parameters.clone()
    }

    async fn connect(&self, dtls: DtlsParameters) -> Result<(), EngineError> {
        self.router()?;
        if dtls.fingerprints.is_empty() {
            return Err(EngineError::InvalidParameters(
                "dtlsParameters.fingerprints is empty".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn MediaProducer>, EngineError> {
        let router = self.router()?;

        if rtp_parameters.codecs.is_empty() {
            return Err(EngineError::InvalidParameters(
                "rtpParameters.codecs is empty".to_string(),
            ));
        }
        for codec in &rtp_parameters.codecs {
            if !kind.matches_mime(&codec.mime_type) {
                return Err(EngineError::InvalidParameters(format!(
                    "codec {} does not match kind {}",
                    codec.mime_type,
                    kind.as_str()
                )));
            }
            if !router.supports(codec) {
                return Err(EngineError::UnsupportedCodec(codec.mime_type.clone()));
            }
        }

        let producer = Arc::new(SimulatedProducer {
            id: ProducerId::generate(),
            kind,
            rtp_parameters,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            router: Weak::clone(&self.router),
            owner: Arc::downgrade(&self.producers),
        });
        lock(&router.producers).insert(producer.id.clone(), Arc::clone(&producer));
        lock(&self.producers).insert(producer.id.clone(), Arc::clone(&producer));

        Ok(producer as Arc<dyn MediaProducer>)
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn MediaConsumer>, EngineError> {
        let router = self.router()?;

        let producer = router
            .live_producer(producer_id)
            .ok_or_else(|| EngineError::CannotConsume(producer_id.clone()))?;
        let codec = RouterInner::consumable_codec(&producer, caps)
            .ok_or_else(|| EngineError::CannotConsume(producer_id.clone()))?;

        let consumer = Arc::new(SimulatedConsumer {
            id: ConsumerId::generate(),
            producer_id: producer_id.clone(),
            kind: producer.kind,
            rtp_parameters: RtpParameters {
                mid: None,
                codecs: vec![codec],
                header_extensions: Vec::new(),
                encodings: producer.rtp_parameters.encodings.clone(),
                rtcp: producer.rtp_parameters.rtcp.clone(),
            },
            paused: AtomicBool::new(paused),
            closed: AtomicBool::new(false),
            owner: Arc::downgrade(&self.consumers),
        });
        lock(&self.consumers).insert(consumer.id.clone(), Arc::clone(&consumer));

        Ok(consumer as Arc<dyn MediaConsumer>)
    }

    async fn close(&self) {
        self.close_now();
    }
}

// ============================================================================
// Producer / Consumer
// ============================================================================

pub struct SimulatedProducer {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
    router: Weak<RouterInner>,
    owner: Weak<Mutex<HashMap<ProducerId, Arc<SimulatedProducer>>>>,
}

impl SimulatedProducer {
    fn close_now(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            lock(&router.producers).remove(&self.id);
        }
        unlink(&self.owner, &self.id);
    }
}

#[async_trait]
impl MediaProducer for SimulatedProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ProducerClosed);
        }
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ProducerClosed);
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.close_now();
    }
}

pub struct SimulatedConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
    owner: Weak<Mutex<HashMap<ConsumerId, Arc<SimulatedConsumer>>>>,
}

impl SimulatedConsumer {
    fn close_now(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            unlink(&self.owner, &self.id);
        }
    }
}

#[async_trait]
impl MediaConsumer for SimulatedConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ConsumerClosed);
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.close_now();
    }
}

fn random_token(len: usize) -> String {
    let mut token = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
    token.push_str(&URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()));
    token.chars().take(len).collect()
}

fn random_fingerprint() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::router_media_codecs;
    use std::net::{IpAddr, Ipv4Addr};

    fn listen() -> TransportListenConfig {
        TransportListenConfig {
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            announced_ip: Some("203.0.113.10".to_string()),
            port_min: 40_000,
            port_max: 40_001,
        }
    }

    fn opus_rtp() -> RtpParameters {
        RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 111,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: serde_json::Map::new(),
                rtcp_feedback: Vec::new(),
            }],
            ..RtpParameters::default()
        }
    }

    fn receiver_caps() -> RtpCapabilities {
        RtpCapabilities {
            codecs: router_media_codecs(),
            header_extensions: Vec::new(),
        }
    }

    async fn router() -> Arc<dyn MediaRouter> {
        let worker = SimulatedWorker::new(0, CancellationToken::new());
        worker.create_router(&router_media_codecs()).await.unwrap()
    }

    #[tokio::test]
    async fn test_transport_parameters_use_announced_ip_and_port_range() {
        let router = router().await;
        let a = router.create_webrtc_transport(&listen()).await.unwrap();
        let b = router.create_webrtc_transport(&listen()).await.unwrap();
        let c = router.create_webrtc_transport(&listen()).await.unwrap();

        let ports: Vec<u16> = [&a, &b, &c]
            .iter()
            .map(|t| t.parameters().ice_candidates[0].port)
            .collect();
        assert_eq!(ports, vec![40_000, 40_001, 40_000]);
        assert_eq!(a.parameters().ice_candidates[0].ip, "203.0.113.10");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.parameters().ice_parameters.username_fragment.len(), 12);
    }

    #[tokio::test]
    async fn test_produce_then_consume_starts_paused() {
        let router = router().await;
        let send = router.create_webrtc_transport(&listen()).await.unwrap();
        let recv = router.create_webrtc_transport(&listen()).await.unwrap();

        let producer = send.produce(MediaKind::Audio, opus_rtp()).await.unwrap();
        assert!(router.can_consume(producer.id(), &receiver_caps()));

        let consumer = recv
            .consume(producer.id(), &receiver_caps(), true)
            .await
            .unwrap();
        assert!(consumer.is_paused());
        assert_eq!(consumer.producer_id(), producer.id());
        assert_eq!(consumer.kind(), MediaKind::Audio);
        // Payload type mapped onto the receiver's preference
        assert_eq!(consumer.rtp_parameters().codecs[0].payload_type, 100);

        consumer.resume().await.unwrap();
        assert!(!consumer.is_paused());
    }

    #[tokio::test]
    async fn test_incompatible_capabilities_cannot_consume() {
        let router = router().await;
        let send = router.create_webrtc_transport(&listen()).await.unwrap();
        let recv = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = send.produce(MediaKind::Audio, opus_rtp()).await.unwrap();

        let video_only = RtpCapabilities {
            codecs: router_media_codecs()
                .into_iter()
                .filter(|c| c.kind == MediaKind::Video)
                .collect(),
            header_extensions: Vec::new(),
        };

        assert!(!router.can_consume(producer.id(), &video_only));
        let result = recv.consume(producer.id(), &video_only, true).await;
        assert!(matches!(result, Err(EngineError::CannotConsume(_))));
    }

    #[tokio::test]
    async fn test_produce_rejects_kind_mismatch_and_unknown_codec() {
        let router = router().await;
        let send = router.create_webrtc_transport(&listen()).await.unwrap();

        let result = send.produce(MediaKind::Video, opus_rtp()).await;
        assert!(matches!(result, Err(EngineError::InvalidParameters(_))));

        let mut g722 = opus_rtp();
        g722.codecs[0].mime_type = "audio/G722".to_string();
        g722.codecs[0].clock_rate = 8000;
        let result = send.produce(MediaKind::Audio, g722).await;
        assert!(matches!(result, Err(EngineError::UnsupportedCodec(_))));

        let result = send.produce(MediaKind::Audio, RtpParameters::default()).await;
        assert!(matches!(result, Err(EngineError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_closing_transport_closes_its_producers() {
        let router = router().await;
        let send = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = send.produce(MediaKind::Audio, opus_rtp()).await.unwrap();

        send.close().await;
        send.close().await; // idempotent

        assert!(!router.can_consume(producer.id(), &receiver_caps()));
        assert!(matches!(
            producer.pause().await,
            Err(EngineError::ProducerClosed)
        ));
        assert!(matches!(
            send.produce(MediaKind::Audio, opus_rtp()).await,
            Err(EngineError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn test_producer_pause_resume() {
        let router = router().await;
        let send = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = send.produce(MediaKind::Audio, opus_rtp()).await.unwrap();

        producer.pause().await.unwrap();
        assert!(producer.is_paused());
        producer.resume().await.unwrap();
        assert!(!producer.is_paused());

        producer.close().await;
        assert!(!router.can_consume(producer.id(), &receiver_caps()));
    }

    #[tokio::test]
    async fn test_router_close_cascades() {
        let router = router().await;
        let send = router.create_webrtc_transport(&listen()).await.unwrap();
        let recv = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = send.produce(MediaKind::Audio, opus_rtp()).await.unwrap();
        let consumer = recv
            .consume(producer.id(), &receiver_caps(), true)
            .await
            .unwrap();

        router.close().await;

        assert!(matches!(
            consumer.resume().await,
            Err(EngineError::ConsumerClosed)
        ));
        assert!(matches!(
            router.create_webrtc_transport(&listen()).await,
            Err(EngineError::RouterClosed)
        ));
    }

    #[tokio::test]
    async fn test_closed_objects_leave_their_tables() {
        let worker = SimulatedWorker::new(0, CancellationToken::new());
        let router = worker.new_router(&router_media_codecs()).unwrap();
        let send = router.new_transport(&listen()).unwrap();
        let recv = router.new_transport(&listen()).unwrap();
        let producer = send.produce(MediaKind::Audio, opus_rtp()).await.unwrap();

        for _ in 0..200 {
            let consumer = recv
                .consume(producer.id(), &receiver_caps(), true)
                .await
                .unwrap();
            consumer.close().await;
        }
        assert_eq!(recv.open_consumers(), 0);

        for _ in 0..100 {
            router.new_transport(&listen()).unwrap().close().await;
        }
        assert_eq!(router.open_transports(), 2);

        // Closing the receiving transport drops its remaining consumer too
        let consumer = recv
            .consume(producer.id(), &receiver_caps(), true)
            .await
            .unwrap();
        assert_eq!(recv.open_consumers(), 1);
        recv.close().await;
        assert_eq!(recv.open_consumers(), 0);
        assert!(matches!(
            consumer.resume().await,
            Err(EngineError::ConsumerClosed)
        ));
        assert_eq!(router.open_transports(), 1);

        producer.close().await;
        assert_eq!(send.open_producers(), 0);
        assert!(!router.can_consume(producer.id(), &receiver_caps()));
    }

    #[tokio::test]
    async fn test_dead_worker_fails_operations() {
        let failure = CancellationToken::new();
        let worker = SimulatedWorker::new(3, failure.clone());
        let router = worker.create_router(&router_media_codecs()).await.unwrap();

        worker.kill();

        assert!(failure.is_cancelled());
        assert!(matches!(
            router.create_webrtc_transport(&listen()).await,
            Err(EngineError::WorkerDied { worker: 3 })
        ));
        assert!(matches!(
            worker.create_router(&router_media_codecs()).await,
            Err(EngineError::WorkerDied { worker: 3 })
        ));
    }

    #[tokio::test]
    async fn test_spawn_pool_creates_routers_round_robin() {
        let (pool, workers) = spawn_pool_with_handles(2).unwrap();

        for _ in 0..3 {
            pool.acquire()
                .unwrap()
                .create_router(&router_media_codecs())
                .await
                .unwrap();
        }

        assert_eq!(workers[0].routers_created(), 2);
        assert_eq!(workers[1].routers_created(), 1);
    }
}
