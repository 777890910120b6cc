//! Well-known Bluetooth UUIDs for serial-style sensor peripherals.
//!
//! The pipeline subscribes to whatever service/characteristic pair is
//! configured. Most line-oriented wearables expose the Nordic UART Service,
//! so its UUIDs are provided here for configuration templates and tests.

use uuid::{Uuid, uuid};

/// Nordic UART Service.
pub const NUS_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Nordic UART RX characteristic (central writes to the peripheral).
pub const NUS_RX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Nordic UART TX characteristic (peripheral notifies the central).
pub const NUS_TX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");
