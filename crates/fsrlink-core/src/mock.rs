//! Mock radio implementation for testing.
//!
//! This module provides an in-memory [`Radio`] and [`Peer`] so the link
//! state machine can be exercised without BLE hardware.
//!
//! # Features
//!
//! - **Failure injection**: fail the next N resolutions or connections
//! - **Latency simulation**: delay resolutions and connections to exercise
//!   timeouts and cancellation
//! - **Stream control**: push notification fragments and drop the link from
//!   the test side

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use fsrlink_types::uuids::{NUS_RX, NUS_SERVICE, NUS_TX};
use fsrlink_types::{DeviceId, SensorReading, SubscriptionTarget};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::{Peer, PeerEvent, PeerEventStream, Radio, ReadingSink, SharedPeer};

/// A mock radio that resolves identifiers to registered [`MockPeer`]s.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fsrlink_core::mock::{MockPeer, MockRadio};
/// use fsrlink_core::Radio;
/// use fsrlink_types::DeviceId;
///
/// #[tokio::main]
/// async fn main() {
///     let peer = Arc::new(MockPeer::new("AA:BB:CC:DD:EE:FF"));
///     let radio = MockRadio::new().with_peer(peer);
///
///     let id = DeviceId::new("AA:BB:CC:DD:EE:FF").unwrap();
///     assert!(radio.resolve(&id).await.is_ok());
/// }
/// ```
#[derive(Debug, Default)]
pub struct MockRadio {
    peers: RwLock<HashMap<String, Arc<MockPeer>>>,
    adapter_missing: AtomicBool,
    remaining_resolve_failures: AtomicU32,
    resolve_count: AtomicU32,
    /// Simulated resolve latency in milliseconds (0 = no delay).
    resolve_latency_ms: AtomicU64,
}

impl MockRadio {
    /// Create a radio with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer (builder form).
    #[must_use]
    pub fn with_peer(mut self, peer: Arc<MockPeer>) -> Self {
        self.peers
            .get_mut()
            .insert(peer.identifier.clone(), peer);
        self
    }

    /// Register a peer.
    pub async fn add_peer(&self, peer: Arc<MockPeer>) {
        self.peers
            .write()
            .await
            .insert(peer.identifier.clone(), peer);
    }

    /// Simulate a missing or powered-off adapter.
    pub fn set_adapter_available(&self, available: bool) {
        self.adapter_missing.store(!available, Ordering::Relaxed);
    }

    /// Make the next `count` resolutions fail with `DeviceNotFound`.
    pub fn fail_next_resolves(&self, count: u32) {
        self.remaining_resolve_failures
            .store(count, Ordering::Relaxed);
    }

    /// Delay every resolution, like a scan that takes a while.
    pub fn set_resolve_latency(&self, latency: Duration) {
        self.resolve_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of resolutions attempted so far.
    pub fn resolve_count(&self) -> u32 {
        self.resolve_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn resolve(&self, device: &DeviceId) -> Result<SharedPeer> {
        self.resolve_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.resolve_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.adapter_missing.load(Ordering::Relaxed) {
            return Err(Error::AdapterUnavailable);
        }

        if self.remaining_resolve_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_resolve_failures
                .fetch_sub(1, Ordering::Relaxed);
            return Err(Error::device_not_found(device.as_str()));
        }

        let peers = self.peers.read().await;
        match peers.get(device.as_str()) {
            Some(peer) => Ok(Arc::clone(peer) as SharedPeer),
            None => Err(Error::device_not_found(device.as_str())),
        }
    }
}

/// A mock peer exposing a configurable set of services.
///
/// By default it offers the Nordic UART service with its RX and TX
/// characteristics.
pub struct MockPeer {
    identifier: String,
    services: RwLock<HashMap<Uuid, Vec<Uuid>>>,
    connected: AtomicBool,
    subscribed: AtomicBool,
    connect_count: AtomicU32,
    disconnect_count: AtomicU32,
    remaining_connect_failures: AtomicU32,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

impl std::fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeer")
            .field("identifier", &self.identifier)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("subscribed", &self.subscribed.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockPeer {
    /// Create a peer offering the Nordic UART service.
    pub fn new(identifier: &str) -> Self {
        let mut services = HashMap::new();
        services.insert(NUS_SERVICE, vec![NUS_RX, NUS_TX]);
        Self {
            identifier: identifier.to_string(),
            services: RwLock::new(services),
            connected: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            connect_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
            remaining_connect_failures: AtomicU32::new(0),
            connect_latency_ms: AtomicU64::new(0),
            events: Mutex::new(None),
        }
    }

    /// Remove every service.
    #[must_use]
    pub fn without_services(mut self) -> Self {
        self.services.get_mut().clear();
        self
    }

    /// Offer a service with the given characteristics.
    #[must_use]
    pub fn with_service(mut self, service: Uuid, characteristics: Vec<Uuid>) -> Self {
        self.services.get_mut().insert(service, characteristics);
        self
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.remaining_connect_failures
            .store(count, Ordering::Relaxed);
    }

    /// Delay every connection attempt.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Whether notifications are enabled.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Relaxed)
    }

    /// Number of connection attempts so far.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Number of times the central released the connection.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::Relaxed)
    }

    /// Push a notification payload to the current connection.
    ///
    /// Returns `false` when no event stream is open.
    pub fn notify(&self, payload: impl Into<Bytes>) -> bool {
        let Ok(guard) = self.events.lock() else {
            return false;
        };
        guard
            .as_ref()
            .is_some_and(|tx| tx.send(PeerEvent::Notification(payload.into())).is_ok())
    }

    /// Simulate the peer dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.subscribed.store(false, Ordering::Relaxed);
        if let Some(tx) = self.take_sender() {
            let _ = tx.send(PeerEvent::Disconnected);
        }
    }

    fn take_sender(&self) -> Option<mpsc::UnboundedSender<PeerEvent>> {
        self.events.lock().ok().and_then(|mut guard| guard.take())
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn connect(&self) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.remaining_connect_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_connect_failures
                .fetch_sub(1, Ordering::Relaxed);
            return Err(Error::connection_failed(
                Some(self.identifier.clone()),
                ConnectionFailureReason::OutOfRange,
            ));
        }

        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn events(&self) -> Result<PeerEventStream> {
        self.check_connected()?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = self.events.lock() {
            *guard = Some(tx);
        }
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })))
    }

    async fn discover(&self) -> Result<()> {
        self.check_connected()
    }

    async fn enable_notifications(&self, target: &SubscriptionTarget) -> Result<()> {
        self.check_connected()?;
        let services = self.services.read().await;
        let characteristics = services.get(&target.service).ok_or(Error::ServiceNotFound {
            uuid: target.service,
        })?;
        if !characteristics.contains(&target.characteristic) {
            return Err(Error::CharacteristicNotFound {
                uuid: target.characteristic,
                service: target.service,
            });
        }
        self.subscribed.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_count.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.subscribed.store(false, Ordering::Relaxed);
        drop(self.take_sender());
        Ok(())
    }
}

/// A sink that forwards every reading into a channel.
#[derive(Debug)]
pub struct MockSink {
    tx: mpsc::UnboundedSender<SensorReading>,
}

impl MockSink {
    /// Create a sink and the receiver its readings arrive on.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<SensorReading>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ReadingSink for MockSink {
    fn deliver(&self, reading: SensorReading) {
        let _ = self.tx.send(reading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_known_and_unknown() {
        let radio = MockRadio::new().with_peer(Arc::new(MockPeer::new("A")));
        assert!(radio.resolve(&id("A")).await.is_ok());
        assert!(matches!(
            radio.resolve(&id("B")).await,
            Err(Error::DeviceNotFound(_))
        ));
        assert_eq!(radio.resolve_count(), 2);
    }

    #[tokio::test]
    async fn test_adapter_unavailable() {
        let radio = MockRadio::new().with_peer(Arc::new(MockPeer::new("A")));
        radio.set_adapter_available(false);
        assert!(matches!(
            radio.resolve(&id("A")).await,
            Err(Error::AdapterUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_transient_resolve_failures() {
        let radio = MockRadio::new().with_peer(Arc::new(MockPeer::new("A")));
        radio.fail_next_resolves(1);
        assert!(radio.resolve(&id("A")).await.is_err());
        assert!(radio.resolve(&id("A")).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_connect_failures() {
        let peer = MockPeer::new("A");
        peer.fail_next_connects(2);
        assert!(peer.connect().await.is_err());
        assert!(peer.connect().await.is_err());
        assert!(peer.connect().await.is_ok());
        assert_eq!(peer.connect_count(), 3);
        assert!(peer.is_connected());
    }

    #[tokio::test]
    async fn test_events_require_connection() {
        let peer = MockPeer::new("A");
        assert!(matches!(peer.events().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_notifications_and_drop() {
        let peer = MockPeer::new("A");
        assert!(!peer.notify(&b"FSR1:1\n"[..]));

        peer.connect().await.unwrap();
        let mut events = peer.events().await.unwrap();
        assert!(peer.notify(&b"FSR1:1\n"[..]));
        peer.drop_connection();

        assert_eq!(
            events.next().await,
            Some(PeerEvent::Notification(Bytes::from_static(b"FSR1:1\n")))
        );
        assert_eq!(events.next().await, Some(PeerEvent::Disconnected));
        assert_eq!(events.next().await, None);
        assert!(!peer.is_connected());
    }

    #[tokio::test]
    async fn test_enable_notifications_checks_target() {
        let peer = MockPeer::new("A")
            .without_services()
            .with_service(NUS_SERVICE, vec![NUS_RX]);
        peer.connect().await.unwrap();

        let missing_char = SubscriptionTarget::new(NUS_SERVICE, NUS_TX);
        assert!(matches!(
            peer.enable_notifications(&missing_char).await,
            Err(Error::CharacteristicNotFound { .. })
        ));

        let missing_service = SubscriptionTarget::new(Uuid::nil(), NUS_TX);
        assert!(matches!(
            peer.enable_notifications(&missing_service).await,
            Err(Error::ServiceNotFound { .. })
        ));
        assert!(!peer.is_subscribed());

        let ok = SubscriptionTarget::new(NUS_SERVICE, NUS_RX);
        peer.enable_notifications(&ok).await.unwrap();
        assert!(peer.is_subscribed());
    }

    #[test]
    fn test_mock_sink_forwards() {
        let (sink, mut rx) = MockSink::channel();
        let reading = SensorReading::parse_line("FSR1:5", time::OffsetDateTime::UNIX_EPOCH).unwrap();
        sink.deliver(reading.clone());
        assert_eq!(rx.try_recv().unwrap(), reading);
    }
}
