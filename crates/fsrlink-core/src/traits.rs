//! Trait abstractions over the wireless platform and the reading consumer.
//!
//! The link state machine only talks to [`Radio`] and [`Peer`], so it runs
//! unchanged against btleplug ([`crate::ble`]) and the in-memory mock
//! ([`crate::mock`]).

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use fsrlink_types::{DeviceId, SensorReading, SubscriptionTarget};

use crate::error::Result;

/// Something that happened on a connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A notification payload from the subscribed characteristic.
    Notification(Bytes),
    /// The connection dropped.
    Disconnected,
}

/// Stream of events for one connection.
///
/// The stream ending is treated the same as [`PeerEvent::Disconnected`].
pub type PeerEventStream = Pin<Box<dyn Stream<Item = PeerEvent> + Send>>;

/// Shared handle to a resolved peer.
pub type SharedPeer = Arc<dyn Peer>;

/// Locates peers by identifier.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Resolve an identifier to a peer that can be connected.
    ///
    /// Fails with [`Error::AdapterUnavailable`](crate::Error::AdapterUnavailable)
    /// when there is no usable adapter and with
    /// [`Error::DeviceNotFound`](crate::Error::DeviceNotFound) when nothing
    /// matches the identifier.
    async fn resolve(&self, device: &DeviceId) -> Result<SharedPeer>;
}

/// One remote device.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Platform identifier of the peer, for logging.
    fn identifier(&self) -> &str;

    /// Establish the connection.
    async fn connect(&self) -> Result<()>;

    /// Events for the current connection.
    ///
    /// Called once per established connection, before notifications are
    /// enabled, so no payload is missed.
    async fn events(&self) -> Result<PeerEventStream>;

    /// Discover the peer's services and characteristics.
    async fn discover(&self) -> Result<()>;

    /// Enable notifications on the target characteristic.
    ///
    /// Fails with [`Error::ServiceNotFound`](crate::Error::ServiceNotFound) or
    /// [`Error::CharacteristicNotFound`](crate::Error::CharacteristicNotFound)
    /// when the target is not offered.
    async fn enable_notifications(&self, target: &SubscriptionTarget) -> Result<()>;

    /// Release the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Consumer of accepted readings.
///
/// `deliver` is called inline on the link driver for every reading, so
/// implementations must return promptly and do any slow work elsewhere.
pub trait ReadingSink: Send + Sync {
    /// Hand over one reading.
    fn deliver(&self, reading: SensorReading);
}
