//! BLE link and line framing for FSR sensor streams.
//!
//! This crate keeps a wearable sensor connected over Bluetooth Low Energy
//! and turns its notification stream into discrete readings.
//!
//! # Features
//!
//! - **Framing**: newline-terminated `NAME:VALUE` lines reassembled from
//!   arbitrary notification fragments ([`FrameParser`])
//! - **Link lifecycle**: connect, discover, subscribe and reconnect forever
//!   with capped exponential backoff ([`LinkStateMachine`])
//! - **Platform abstraction**: [`Radio`]/[`Peer`] traits with a btleplug
//!   implementation ([`BleRadio`]) and an in-memory mock ([`mock`])
//! - **Events**: every transition and reading broadcast as a [`LinkEvent`]
//!
//! # Platform Differences
//!
//! Device identification varies by platform:
//!
//! - **macOS**: devices are identified by a UUID assigned by CoreBluetooth,
//!   stable for a given device on a given Mac.
//! - **Linux/Windows**: devices are identified by their Bluetooth MAC
//!   address (e.g., `AA:BB:CC:DD:EE:FF`).
//!
//! An advertised name (or a unique part of it) works everywhere.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use fsrlink_core::{BleRadio, LinkOptions, LinkStateMachine, ReadingSink};
//! use fsrlink_types::uuids::{NUS_SERVICE, NUS_TX};
//! use fsrlink_types::{DeviceId, SensorReading, SubscriptionTarget};
//!
//! struct Print;
//!
//! impl ReadingSink for Print {
//!     fn deliver(&self, reading: SensorReading) {
//!         println!("{} = {}", reading.sensor_name, reading.value);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let link = LinkStateMachine::new(
//!         Arc::new(BleRadio::default()),
//!         Arc::new(Print),
//!         LinkOptions::default(),
//!     );
//!     let target = SubscriptionTarget::new(NUS_SERVICE, NUS_TX);
//!     link.start(DeviceId::new("AA:BB:CC:DD:EE:FF")?, target).await?;
//!     tokio::signal::ctrl_c().await?;
//!     link.stop().await;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod error;
pub mod events;
pub mod framing;
pub mod link;
pub mod mock;
pub mod reconnect;
pub mod traits;
pub mod util;

pub use ble::{BlePeer, BleRadio};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};
pub use events::{EventDispatcher, EventReceiver, EventSender, LinkEvent};
pub use framing::{FrameParser, MalformedLine, Readings};
pub use link::{LinkOptions, LinkStateMachine};
pub use reconnect::ReconnectOptions;
pub use traits::{Peer, PeerEvent, PeerEventStream, Radio, ReadingSink, SharedPeer};

// Re-export from fsrlink-types
pub use fsrlink_types::uuids;
pub use fsrlink_types::{DeviceId, LinkState, SensorName, SensorReading, SubscriptionTarget};
