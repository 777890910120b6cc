//! Store-and-forward delivery and session control for FSR sensor streams.
//!
//! This crate turns the link from `fsrlink-core` into a complete pipeline:
//! - Relays every parsed reading to the collection endpoint
//! - Parks undelivered readings in the pending store and replays them later
//! - Persists the device identifier and subscription target
//! - Exposes start / stop / take-over to the host
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/fsrlink/config.toml`:
//!
//! ```toml
//! [link]
//! device = "AA:BB:CC:DD:EE:FF"
//! service_uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
//! characteristic_uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
//!
//! [uplink]
//! endpoint = "https://mybackendhaha.store/api/SensorData/by-name"
//! token = "your-bearer-token"
//! timeout_secs = 15
//!
//! [delivery]
//! replay_interval_secs = 300
//!
//! [storage]
//! path = "~/.local/share/fsrlink/pending.db"
//! ```
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use fsrlink_core::BleRadio;
//! use fsrlink_service::{ConfigHandle, DeliveryQueue, HttpUplink, SessionController};
//! use fsrlink_store::PendingStore;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(ConfigHandle::open_default()?);
//! let snapshot = config.snapshot();
//! let store = Arc::new(PendingStore::open(&snapshot.storage.path)?);
//! let uplink = Arc::new(HttpUplink::from_config(&snapshot.uplink)?);
//! let queue = DeliveryQueue::new(uplink, store, Arc::clone(&config));
//!
//! let radio = Arc::new(BleRadio::new(snapshot.link.scan_timeout()));
//! let session = SessionController::new(config, radio, Arc::new(queue.clone()));
//! session.take_over().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod delivery;
pub mod session;

pub use config::{
    Config, ConfigError, ConfigHandle, DeliveryConfig, LinkConfig, ReconnectConfig,
    StorageConfig, UplinkConfig, ValidationError,
};
pub use delivery::{
    DeliveryOutcome, DeliveryQueue, HttpUplink, PersistReason, ReplayReport, Uplink, UplinkError,
};
pub use session::{SessionCommand, SessionController, SessionError};
