//! btleplug implementation of [`Radio`] and [`Peer`].
//!
//! Resolution first looks through peripherals the adapter already knows,
//! then scans until the peer shows up or the scan window closes.
//! Disconnects are detected from the adapter's `DeviceDisconnected` events,
//! so a dropped link is noticed without polling.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::{StreamExt, future, stream};
use tokio::sync::OnceCell;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use fsrlink_types::{DeviceId, SubscriptionTarget};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::traits::{Peer, PeerEvent, PeerEventStream, Radio, SharedPeer};
use crate::util::{create_identifier, format_peripheral_id, identifier_matches};

/// Default time to scan for a peer that is not already known.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often known peripherals are re-checked while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(|e| {
        warn!("Bluetooth manager unavailable: {e}");
        Error::AdapterUnavailable
    })?;
    let adapters = manager.adapters().await.map_err(|e| {
        warn!("Could not list Bluetooth adapters: {e}");
        Error::AdapterUnavailable
    })?;

    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

/// Radio backed by the first system Bluetooth adapter.
///
/// The adapter is acquired on first use, so constructing a `BleRadio` never
/// fails; an absent adapter surfaces from [`Radio::resolve`].
#[derive(Debug)]
pub struct BleRadio {
    adapter: OnceCell<Adapter>,
    scan_timeout: Duration,
}

impl Default for BleRadio {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_TIMEOUT)
    }
}

impl BleRadio {
    /// Create a radio that scans for at most `scan_timeout` per resolution.
    pub fn new(scan_timeout: Duration) -> Self {
        Self {
            adapter: OnceCell::new(),
            scan_timeout,
        }
    }

    async fn adapter(&self) -> Result<&Adapter> {
        self.adapter.get_or_try_init(get_adapter).await
    }

    /// Find a peripheral, checking the adapter's cache before scanning.
    #[tracing::instrument(level = "info", skip_all, fields(device = %device))]
    async fn find_peripheral(&self, adapter: &Adapter, device: &DeviceId) -> Result<Peripheral> {
        if let Some(peripheral) = find_known_peripheral(adapter, device.as_str()).await? {
            info!("Found device in cache (no scan needed)");
            return Ok(peripheral);
        }

        info!(
            "Scanning for up to {}s...",
            self.scan_timeout.as_secs_f32()
        );
        adapter.start_scan(ScanFilter::default()).await?;

        let deadline = Instant::now() + self.scan_timeout;
        let found = loop {
            sleep(SCAN_POLL_INTERVAL).await;
            match find_known_peripheral(adapter, device.as_str()).await {
                Ok(Some(peripheral)) => break Ok(Some(peripheral)),
                Ok(None) if Instant::now() >= deadline => break Ok(None),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = adapter.stop_scan().await {
            debug!("Failed to stop scan: {e}");
        }

        match found? {
            Some(peripheral) => Ok(peripheral),
            None => {
                warn!("Device not seen within scan window");
                Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                    identifier: device.to_string(),
                    duration: self.scan_timeout,
                }))
            }
        }
    }
}

#[async_trait]
impl Radio for BleRadio {
    async fn resolve(&self, device: &DeviceId) -> Result<SharedPeer> {
        let adapter = self.adapter().await?;
        let peripheral = self.find_peripheral(adapter, device).await?;
        let peer = BlePeer::new(adapter.clone(), peripheral).await;
        debug!(peer = %peer.identifier, "Resolved device");
        Ok(Arc::new(peer))
    }
}

/// Search through known peripherals to find one matching the identifier.
async fn find_known_peripheral(adapter: &Adapter, identifier: &str) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await {
            let peripheral_id = format_peripheral_id(&peripheral.id());
            let address = props.address.to_string();
            if identifier_matches(
                identifier,
                &peripheral_id,
                &address,
                props.local_name.as_deref(),
            ) {
                debug!(%peripheral_id, %address, name = ?props.local_name, "Matched peripheral");
                return Ok(Some(peripheral));
            }
        }
    }
    Ok(None)
}

/// A btleplug peripheral driven through the [`Peer`] trait.
pub struct BlePeer {
    adapter: Adapter,
    peripheral: Peripheral,
    identifier: String,
    /// Characteristic notifications are accepted from, once enabled.
    subscribed: Arc<Mutex<Option<Uuid>>>,
}

impl std::fmt::Debug for BlePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlePeer")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl BlePeer {
    async fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        let identifier = match peripheral.properties().await {
            Ok(Some(props)) => create_identifier(&props.address.to_string(), &peripheral.id()),
            _ => format_peripheral_id(&peripheral.id()),
        };
        Self {
            adapter,
            peripheral,
            identifier,
            subscribed: Arc::new(Mutex::new(None)),
        }
    }

    fn find_characteristic(&self, target: &SubscriptionTarget) -> Result<Characteristic> {
        let services = self.peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == target.service)
            .ok_or(Error::ServiceNotFound {
                uuid: target.service,
            })?;
        service
            .characteristics
            .iter()
            .find(|c| c.uuid == target.characteristic)
            .cloned()
            .ok_or(Error::CharacteristicNotFound {
                uuid: target.characteristic,
                service: target.service,
            })
    }
}

#[async_trait]
impl Peer for BlePeer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    #[tracing::instrument(level = "info", skip(self), fields(peer = %self.identifier))]
    async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            debug!("Already connected");
            return Ok(());
        }
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn events(&self) -> Result<PeerEventStream> {
        let id = self.peripheral.id();
        let disconnects = self.adapter.events().await?.filter_map(move |event| {
            future::ready(match event {
                CentralEvent::DeviceDisconnected(gone) if gone == id => {
                    Some(PeerEvent::Disconnected)
                }
                _ => None,
            })
        });

        let subscribed = Arc::clone(&self.subscribed);
        let notifications = self.peripheral.notifications().await?.filter_map(move |n| {
            let wanted = subscribed.lock().ok().and_then(|g| *g);
            future::ready(
                (wanted == Some(n.uuid)).then(|| PeerEvent::Notification(Bytes::from(n.value))),
            )
        });

        Ok(Box::pin(stream::select(disconnects, notifications)))
    }

    async fn discover(&self) -> Result<()> {
        self.peripheral.discover_services().await?;
        let services = self.peripheral.services();
        debug!("Found {} services", services.len());
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for characteristic in &service.characteristics {
                debug!("    Characteristic: {}", characteristic.uuid);
            }
        }
        Ok(())
    }

    async fn enable_notifications(&self, target: &SubscriptionTarget) -> Result<()> {
        let characteristic = self.find_characteristic(target)?;
        if let Ok(mut slot) = self.subscribed.lock() {
            *slot = Some(characteristic.uuid);
        }
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), fields(peer = %self.identifier))]
    async fn disconnect(&self) -> Result<()> {
        if let Ok(mut slot) = self.subscribed.lock() {
            *slot = None;
        }
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Disconnecting from device...");
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
