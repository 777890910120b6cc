//! Platform-agnostic types for the fsrlink sensor pipeline.
//!
//! This crate provides the data model shared by the link layer
//! (fsrlink-core), the durable pending store (fsrlink-store) and the
//! delivery service (fsrlink-service).
//!
//! # Features
//!
//! - Validated sensor names (`FSR` followed by digits)
//! - Line classification for the `NAME:VALUE` wire format
//! - Pending records and delivery payloads with their JSON shapes
//! - Device identifiers, subscription targets and link states
//!
//! # Example
//!
//! ```
//! use fsrlink_types::{SensorReading, LinkState};
//! use time::OffsetDateTime;
//!
//! let reading = SensorReading::parse_line("FSR1:512", OffsetDateTime::now_utc()).unwrap();
//! assert_eq!(reading.value, 512.0);
//! assert!(LinkState::SubscriptionActive.is_connected());
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    DeliveryPayload, DeviceId, FIELD_DELIMITER, LINE_TERMINATOR, LinkState, PENDING_KEY_PREFIX,
    PendingRecord, SENSOR_NAME_PREFIX, SensorName, SensorReading, SubscriptionTarget,
};
pub use uuid as uuids;


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Classifying arbitrary text never panics.
        #[test]
        fn parse_line_never_panics(line in ".*") {
            let _ = SensorReading::parse_line(&line, time::OffsetDateTime::UNIX_EPOCH);
        }

        /// Every well-formed line is accepted with the same name and value.
        #[test]
        fn well_formed_lines_are_accepted(index in 0u32..10_000, value in -1.0e6f64..1.0e6) {
            let line = format!("FSR{index}:{value}");
            let reading = SensorReading::parse_line(&line, time::OffsetDateTime::UNIX_EPOCH).unwrap();
            prop_assert_eq!(reading.sensor_name.as_str(), format!("FSR{index}"));
            prop_assert_eq!(reading.value, value);
        }
    }
}
