//! Store-and-forward delivery of sensor readings.
//!
//! Every reading gets at most one immediate network attempt. Anything that
//! does not reach the endpoint (no credential, transport failure, non-2xx)
//! is appended to the [`PendingStore`] and retried later by
//! [`DeliveryQueue::replay_pending`]. A pending record leaves the store only
//! once the endpoint has accepted it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use fsrlink_core::ReadingSink;
use fsrlink_store::PendingStore;
use fsrlink_types::{DeliveryPayload, SensorReading};

use crate::config::{ConfigHandle, UplinkConfig};

/// Errors from one delivery attempt.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum UplinkError {
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Endpoint answered {0}")]
    Status(StatusCode),
}

impl From<reqwest::Error> for UplinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e)
        }
    }
}

/// The network side of delivery.
#[async_trait]
pub trait Uplink: Send + Sync {
    /// Send one payload, authenticated with `token`. `Ok` means the endpoint
    /// accepted it.
    async fn send(&self, payload: &DeliveryPayload, token: &str) -> Result<(), UplinkError>;
}

/// POSTs JSON payloads with a bearer credential.
#[derive(Debug, Clone)]
pub struct HttpUplink {
    client: Client,
    endpoint: Url,
}

impl HttpUplink {
    /// Create an uplink for `endpoint`, bounding every request by `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, UplinkError> {
        let endpoint = Url::parse(endpoint).map_err(|e| UplinkError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UplinkError::Client)?;
        Ok(Self { client, endpoint })
    }

    /// Create an uplink from the `[uplink]` section.
    pub fn from_config(config: &UplinkConfig) -> Result<Self, UplinkError> {
        Self::new(&config.endpoint, config.timeout())
    }

    /// The URL readings are POSTed to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Uplink for HttpUplink {
    async fn send(&self, payload: &DeliveryPayload, token: &str) -> Result<(), UplinkError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UplinkError::Status(status))
        }
    }
}

/// Why a reading was written to the pending store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistReason {
    /// No bearer credential is configured; the network was not tried.
    NoCredential,
    /// The attempt failed or the endpoint rejected it.
    Failed,
}

/// Result of delivering one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint accepted the reading.
    Delivered,
    /// The reading is in the pending store.
    Persisted(PersistReason),
    /// Delivery failed and so did persisting. Logged at `error`.
    Lost,
}

/// Totals from one pass over the pending store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Records accepted by the endpoint and removed from the store.
    pub delivered: usize,
    /// Records left in the store because a send for their sensor failed.
    pub kept: usize,
}

impl std::fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} delivered, {} kept", self.delivered, self.kept)
    }
}

/// Delivers readings, parking the ones that do not get through.
///
/// Cloning is cheap; clones share the same store and in-flight tracker.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

struct Inner {
    uplink: Arc<dyn Uplink>,
    store: Arc<PendingStore>,
    config: Arc<ConfigHandle>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("in_flight", &self.inner.tracker.len())
            .finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    /// Create a queue. The credential is read from `config` on every attempt.
    pub fn new(
        uplink: Arc<dyn Uplink>,
        store: Arc<PendingStore>,
        config: Arc<ConfigHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                uplink,
                store,
                config,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// The pending store behind this queue.
    pub fn store(&self) -> &Arc<PendingStore> {
        &self.inner.store
    }

    /// Number of attempts spawned by [`ReadingSink::deliver`] that have not
    /// finished.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    fn credential(&self) -> Option<String> {
        self.inner
            .config
            .read(|c| c.uplink.credential().map(str::to_owned))
    }

    /// Attempt one reading and return how it ended.
    ///
    /// When the outcome is [`DeliveryOutcome::Persisted`], the record is
    /// already in the store.
    pub async fn deliver_now(&self, reading: SensorReading) -> DeliveryOutcome {
        let Some(token) = self.credential() else {
            debug!(sensor = %reading.sensor_name, "No credential configured, keeping reading");
            return self.persist(&reading, PersistReason::NoCredential);
        };

        match self.inner.uplink.send(&reading.to_payload(), &token).await {
            Ok(()) => {
                debug!(
                    sensor = %reading.sensor_name,
                    value = reading.value,
                    "Reading delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!(
                    sensor = %reading.sensor_name,
                    error = %e,
                    "Delivery failed, keeping reading for replay"
                );
                self.persist(&reading, PersistReason::Failed)
            }
        }
    }

    fn persist(&self, reading: &SensorReading, reason: PersistReason) -> DeliveryOutcome {
        match self
            .inner
            .store
            .append(&reading.sensor_name, &reading.to_pending())
        {
            Ok(pending) => {
                debug!(sensor = %reading.sensor_name, pending, "Reading persisted");
                DeliveryOutcome::Persisted(reason)
            }
            Err(e) => {
                error!(
                    sensor = %reading.sensor_name,
                    value = reading.value,
                    observed_at = %reading.observed_at,
                    error = %e,
                    "Failed to persist undelivered reading"
                );
                DeliveryOutcome::Lost
            }
        }
    }

    /// Wait until every attempt spawned so far has finished, persistence
    /// included.
    pub async fn settle(&self) {
        let tracker = &self.inner.tracker;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Re-attempt every pending record with its original timestamp.
    ///
    /// Each sensor's records are read in place and sent oldest first. A
    /// record is removed only after the endpoint accepted it, so stopping a
    /// replay part way leaves every undelivered record in the store. The
    /// first failure stops that sensor. Without a credential nothing is
    /// sent.
    pub async fn replay_pending(&self) -> fsrlink_store::Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let Some(token) = self.credential() else {
            debug!("No credential configured, skipping pending replay");
            return Ok(report);
        };

        let store = &self.inner.store;
        for sensor in store.pending_sensors()? {
            let records = store.peek(&sensor)?;
            let mut sent = 0;

            for record in &records {
                let payload = record.clone().into_reading(sensor.clone()).to_payload();
                if let Err(e) = self.inner.uplink.send(&payload, &token).await {
                    warn!(sensor = %sensor, error = %e, "Replay failed, keeping records");
                    break;
                }
                store.remove_front(&sensor, 1)?;
                sent += 1;
            }

            report.delivered += sent;
            report.kept += records.len() - sent;
        }

        if report != ReplayReport::default() {
            info!(
                delivered = report.delivered,
                kept = report.kept,
                "Pending replay finished"
            );
        }
        Ok(report)
    }

    /// Run [`replay_pending`](Self::replay_pending) every `every` until
    /// `cancel` fires. The first pass runs immediately.
    pub fn spawn_replay_loop(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = queue.replay_pending().await {
                            warn!(error = %e, "Pending replay failed");
                        }
                    }
                }
            }
            debug!("Replay loop stopped");
        })
    }
}

impl ReadingSink for DeliveryQueue {
    fn deliver(&self, reading: SensorReading) {
        match Handle::try_current() {
            Ok(runtime) => {
                let queue = self.clone();
                self.inner.tracker.spawn_on(
                    async move {
                        queue.deliver_now(reading).await;
                    },
                    &runtime,
                );
            }
            Err(_) => {
                warn!(
                    sensor = %reading.sensor_name,
                    "No async runtime for delivery, keeping reading"
                );
                self.persist(&reading, PersistReason::Failed);
            }
        }
    }
}
