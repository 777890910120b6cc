//! Connection lifecycle of the sensor link.
//!
//! [`LinkStateMachine`] keeps one peer connected for as long as it is
//! running:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> SubscriptionActive
//!       ^             |             |                |
//!       +-------------+-------------+----------------+  (disconnect)
//! ```
//!
//! A single driver task owns the connection. It resolves the recorded
//! device, connects, discovers services, enables notifications on the
//! subscription target and then feeds every notification through a
//! [`FrameParser`] into the [`ReadingSink`]. When the link drops the driver
//! goes straight back to `Connecting`. Failed attempts, and connections that
//! drop before [`LinkOptions::stable_after`], are spaced with the configured
//! [`ReconnectOptions`] backoff; the driver never gives up on its own, only
//! [`LinkStateMachine::stop`] ends it.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fsrlink_types::{DeviceId, LinkState, ParseError, SubscriptionTarget};

use crate::error::{Error, Result};
use crate::events::{DEFAULT_EVENT_CAPACITY, EventDispatcher, EventReceiver, LinkEvent};
use crate::framing::FrameParser;
use crate::reconnect::ReconnectOptions;
use crate::traits::{PeerEvent, Radio, ReadingSink, SharedPeer};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a connection must stay up before the backoff resets.
pub const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(10);

/// Tuning for the link driver.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Upper bound for one connection attempt.
    pub connect_timeout: Duration,
    /// Upper bound for service discovery after connecting.
    pub discovery_timeout: Duration,
    /// Spacing of consecutive failed attempts.
    pub reconnect: ReconnectOptions,
    /// How long a connection must last before it clears earlier failures.
    /// Shorter connections count towards the backoff, except that the first
    /// retry after a drop is always immediate.
    pub stable_after: Duration,
    /// Capacity of the [`LinkEvent`] broadcast channel.
    pub event_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            reconnect: ReconnectOptions::default(),
            stable_after: DEFAULT_STABLE_AFTER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LinkOptions {
    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the reconnect backoff.
    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set how long a connection must last to reset the backoff.
    #[must_use]
    pub fn stable_after(mut self, duration: Duration) -> Self {
        self.stable_after = duration;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Device and target snapshot used for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkTarget {
    device: DeviceId,
    target: SubscriptionTarget,
}

/// State shared between the handle and its driver task.
struct Shared {
    state: watch::Sender<LinkState>,
    recorded: watch::Sender<Option<LinkTarget>>,
    events: EventDispatcher,
}

impl Shared {
    fn set_state(&self, state: LinkState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            let device = self.device();
            match &device {
                Some(device) => info!(%device, %state, "Link state changed"),
                None => info!(%state, "Link state changed"),
            }
            self.events.send(LinkEvent::StateChanged { device, state });
        }
    }

    fn recorded(&self) -> Option<LinkTarget> {
        self.recorded.borrow().clone()
    }

    fn device(&self) -> Option<DeviceId> {
        self.recorded.borrow().as_ref().map(|r| r.device.clone())
    }
}

struct DriverHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the wireless link.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use fsrlink_core::mock::{MockPeer, MockRadio, MockSink};
/// use fsrlink_core::{LinkOptions, LinkStateMachine};
/// use fsrlink_types::uuids::{NUS_SERVICE, NUS_TX};
/// use fsrlink_types::{DeviceId, LinkState, SubscriptionTarget};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let radio = Arc::new(MockRadio::new().with_peer(Arc::new(MockPeer::new("glove"))));
///     let (sink, _readings) = MockSink::channel();
///     let link = LinkStateMachine::new(radio, sink, LinkOptions::default());
///
///     let target = SubscriptionTarget::new(NUS_SERVICE, NUS_TX);
///     link.start(DeviceId::new("glove")?, target).await?;
///     link.watch_state()
///         .wait_for(|s| *s == LinkState::SubscriptionActive)
///         .await?;
///
///     link.stop().await;
///     assert_eq!(link.state(), LinkState::Disconnected);
///     Ok(())
/// }
/// ```
pub struct LinkStateMachine {
    radio: Arc<dyn Radio>,
    sink: Arc<dyn ReadingSink>,
    options: LinkOptions,
    shared: Arc<Shared>,
    driver: Mutex<Option<DriverHandle>>,
    /// Cancels resolutions of `start` calls still in flight; replaced on
    /// every `stop`.
    starting: std::sync::Mutex<CancellationToken>,
}

impl std::fmt::Debug for LinkStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStateMachine")
            .field("state", &self.state())
            .field("device", &self.device())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl LinkStateMachine {
    /// Create a stopped link.
    pub fn new(radio: Arc<dyn Radio>, sink: Arc<dyn ReadingSink>, options: LinkOptions) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (recorded, _) = watch::channel(None);
        let events = EventDispatcher::new(options.event_capacity);
        Self {
            radio,
            sink,
            options,
            shared: Arc::new(Shared {
                state,
                recorded,
                events,
            }),
            driver: Mutex::new(None),
            starting: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Start keeping `device` connected and subscribed to `target`.
    ///
    /// The device is resolved before this returns; if the adapter is
    /// unavailable or nothing matches the identifier the error is returned
    /// and the link stays `Disconnected`. Once started, every later
    /// failure is retried in the background.
    ///
    /// If the link is already running, the identifier and target are only
    /// recorded and take effect on the next connection attempt.
    ///
    /// The resolution does not block [`stop`](Self::stop) or
    /// [`is_active`](Self::is_active); a `stop` issued meanwhile abandons it
    /// and this returns [`Error::Cancelled`].
    #[tracing::instrument(level = "info", skip_all, fields(device = %device, target = %target))]
    pub async fn start(&self, device: DeviceId, target: SubscriptionTarget) -> Result<()> {
        let wanted = LinkTarget { device, target };
        if self.record_if_running(&*self.driver.lock().await, &wanted) {
            return Ok(());
        }

        let cancel = self.start_token().child_token();
        let resolved = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.radio.resolve(&wanted.device) => result,
        };
        let peer = resolved.map_err(|e| {
            warn!("Could not resolve device: {e}");
            e
        })?;
        debug!(peer = peer.identifier(), "Device resolved");

        let mut driver = self.driver.lock().await;
        if cancel.is_cancelled() {
            info!("Link stopped while resolving the device");
            return Err(Error::Cancelled);
        }
        if self.record_if_running(&driver, &wanted) {
            return Ok(());
        }

        self.shared.recorded.send_replace(Some(wanted));
        self.shared.set_state(LinkState::Connecting);

        let task = LinkDriver {
            shared: Arc::clone(&self.shared),
            radio: Arc::clone(&self.radio),
            sink: Arc::clone(&self.sink),
            options: self.options.clone(),
            cancel: cancel.clone(),
            parser: FrameParser::new(),
        };
        let handle = tokio::spawn(task.run(Some(peer)));
        *driver = Some(DriverHandle { cancel, handle });
        Ok(())
    }

    /// Record `wanted` for the next attempt if a driver is running.
    fn record_if_running(&self, driver: &Option<DriverHandle>, wanted: &LinkTarget) -> bool {
        if !driver.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return false;
        }
        let superseded = self.shared.recorded.send_if_modified(|current| {
            if current.as_ref() == Some(wanted) {
                false
            } else {
                *current = Some(wanted.clone());
                true
            }
        });
        if superseded {
            info!("Link already running; new device recorded for the next attempt");
        } else {
            debug!("Link already running");
        }
        true
    }

    fn start_token(&self) -> CancellationToken {
        self.starting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop the driver, release the connection and wait for it to finish.
    ///
    /// Also abandons any [`start`](Self::start) still resolving its device.
    /// The recorded device is kept; a new `start` is needed to connect again.
    pub async fn stop(&self) {
        let pending = std::mem::replace(
            &mut *self.starting.lock().unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        pending.cancel();

        let driver = self.driver.lock().await.take();
        match driver {
            Some(driver) => {
                info!("Stopping link");
                driver.cancel.cancel();
                if let Err(e) = driver.handle.await {
                    error!("Link driver task failed: {e}");
                }
            }
            None => debug!("Link not running"),
        }
        self.shared.set_state(LinkState::Disconnected);
    }

    /// Whether a driver task is running.
    pub async fn is_active(&self) -> bool {
        self.driver
            .lock()
            .await
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// Device the link connects to on its next attempt.
    pub fn device(&self) -> Option<DeviceId> {
        self.shared.device()
    }
}

impl Drop for LinkStateMachine {
    fn drop(&mut self) {
        self.start_token().cancel();
        if let Ok(guard) = self.driver.try_lock()
            && let Some(driver) = guard.as_ref()
        {
            driver.cancel.cancel();
        }
    }
}

/// How one pass through the connect loop ended.
enum Attempt {
    /// `stop` was requested.
    Cancelled,
    /// An established connection dropped after being up for `up_for`.
    Lost { up_for: Duration },
    /// The attempt never reached `Connected`.
    Failed(Error),
}

struct LinkDriver {
    shared: Arc<Shared>,
    radio: Arc<dyn Radio>,
    sink: Arc<dyn ReadingSink>,
    options: LinkOptions,
    cancel: CancellationToken,
    /// Outlives individual connections, so a line split across a
    /// reconnect is still completed.
    parser: FrameParser,
}

impl LinkDriver {
    async fn run(mut self, mut resolved: Option<SharedPeer>) {
        let mut failures: u32 = 0;

        while !self.cancel.is_cancelled() {
            let Some(LinkTarget { device, target }) = self.shared.recorded() else {
                break;
            };
            self.shared.set_state(LinkState::Connecting);

            let peer = match resolved.take() {
                Some(peer) => Ok(peer),
                None => self.resolve(&device).await,
            };
            let attempt = match peer {
                Ok(peer) => self.run_connection(peer, &device, &target).await,
                Err(Error::Cancelled) => Attempt::Cancelled,
                Err(e) => Attempt::Failed(e),
            };

            match attempt {
                Attempt::Cancelled => break,
                Attempt::Lost { up_for } if up_for >= self.options.stable_after => failures = 0,
                Attempt::Lost { up_for } => {
                    let delay = self.options.reconnect.next_delay(failures);
                    failures = failures.saturating_add(1);
                    if delay.is_zero() {
                        debug!(%device, ?up_for, "Short-lived connection; retrying once right away");
                        continue;
                    }
                    warn!(%device, attempt = failures, ?up_for, "Connection dropped soon after connecting; retrying in {delay:?}");
                    self.shared.events.send(LinkEvent::ReconnectScheduled {
                        device,
                        attempt: failures,
                        delay_ms: delay.as_millis() as u64,
                    });
                    if !self.pause(delay).await {
                        break;
                    }
                }
                Attempt::Failed(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.options.reconnect.next_delay(failures);
                    warn!(%device, attempt = failures, "Connection attempt failed: {e}; retrying in {delay:?}");
                    self.shared.events.send(LinkEvent::ConnectFailed {
                        device: device.clone(),
                        attempt: failures,
                        error: e.to_string(),
                    });
                    self.shared.events.send(LinkEvent::ReconnectScheduled {
                        device,
                        attempt: failures,
                        delay_ms: delay.as_millis() as u64,
                    });
                    if !self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        self.shared.set_state(LinkState::Disconnected);
        debug!("Link driver stopped");
    }

    async fn resolve(&self, device: &DeviceId) -> Result<SharedPeer> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.radio.resolve(device) => result,
        }
    }

    /// Sleep for `delay`; `false` if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }

    async fn run_connection(
        &mut self,
        peer: SharedPeer,
        device: &DeviceId,
        target: &SubscriptionTarget,
    ) -> Attempt {
        let cancel = self.cancel.clone();
        let connect_timeout = self.options.connect_timeout;

        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                release(&peer).await;
                return Attempt::Cancelled;
            }
            result = timeout(connect_timeout, peer.connect()) => result,
        };
        let established = match connected {
            Ok(Ok(())) => peer.events().await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::timeout("connect to device", connect_timeout)),
        };
        let mut events = match established {
            Ok(events) => events,
            Err(e) => {
                release(&peer).await;
                return Attempt::Failed(e);
            }
        };

        let connected_at = Instant::now();
        self.shared.set_state(LinkState::Connected);
        info!(%device, peer = peer.identifier(), "Connected");

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => {
                release(&peer).await;
                return Attempt::Cancelled;
            }
            result = self.subscribe(&peer, target) => result,
        };
        let active = match subscribed {
            Ok(()) => {
                info!(%target, "Notifications enabled");
                self.shared.set_state(LinkState::SubscriptionActive);
                true
            }
            Err(e) => {
                error!(%device, %target, "Could not enable notifications, staying connected without them: {e}");
                self.shared.events.send(LinkEvent::SubscriptionFailed {
                    device: device.clone(),
                    target: *target,
                    reason: e.to_string(),
                });
                false
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    release(&peer).await;
                    return Attempt::Cancelled;
                }
                event = events.next() => match event {
                    Some(PeerEvent::Notification(payload)) if active => self.ingest(&payload),
                    Some(PeerEvent::Notification(_)) => {
                        debug!("Ignoring notification while not subscribed");
                    }
                    Some(PeerEvent::Disconnected) | None => {
                        info!(%device, "Disconnected from device");
                        self.shared.set_state(LinkState::Disconnected);
                        release(&peer).await;
                        return Attempt::Lost { up_for: connected_at.elapsed() };
                    }
                },
            }
        }
    }

    async fn subscribe(&self, peer: &SharedPeer, target: &SubscriptionTarget) -> Result<()> {
        let discovery_timeout = self.options.discovery_timeout;
        timeout(discovery_timeout, peer.discover())
            .await
            .map_err(|_| Error::timeout("discover services", discovery_timeout))??;
        peer.enable_notifications(target).await
    }

    fn ingest(&mut self, payload: &[u8]) {
        debug!(bytes = payload.len(), "Notification received");
        for frame in self.parser.frames(payload) {
            match frame {
                Ok(reading) => {
                    debug!(sensor = %reading.sensor_name, value = reading.value, "Reading parsed");
                    self.shared.events.send(LinkEvent::ReadingParsed {
                        reading: reading.clone(),
                    });
                    self.sink.deliver(reading);
                }
                Err(malformed) => {
                    malformed.log();
                    if malformed.error != ParseError::EmptyLine {
                        self.shared.events.send(LinkEvent::MalformedLine {
                            reason: malformed.error.to_string(),
                            line: malformed.line,
                        });
                    }
                }
            }
        }
    }
}

async fn release(peer: &SharedPeer) {
    if let Err(e) = peer.disconnect().await {
        debug!("Disconnect failed: {e}");
    }
}
