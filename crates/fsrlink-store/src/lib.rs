//! Durable store of sensor readings that could not be delivered.
//!
//! When the collection endpoint is unreachable, readings are parked here,
//! grouped by sensor name, until a replay drains them. The store is a single
//! SQLite file in WAL mode and survives process restarts.
//!
//! # Example
//!
//! ```no_run
//! use fsrlink_store::PendingStore;
//! use fsrlink_types::{SensorName, SensorReading};
//! use time::OffsetDateTime;
//!
//! let store = PendingStore::open_default()?;
//! let reading = SensorReading::parse_line("FSR2:7.0", OffsetDateTime::now_utc()).unwrap();
//! store.append(&reading.sensor_name, &reading.to_pending())?;
//!
//! for record in store.drain(&SensorName::parse("FSR2").unwrap())? {
//!     println!("{} at {}", record.value, record.time_stamp);
//! }
//! # Ok::<(), fsrlink_store::Error>(())
//! ```

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use store::PendingStore;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/fsrlink/pending.db`
/// - macOS: `~/Library/Application Support/fsrlink/pending.db`
/// - Windows: `C:\Users\<user>\AppData\Local\fsrlink\pending.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("fsrlink")
        .join("pending.db")
}
