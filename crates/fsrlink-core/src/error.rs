//! Error types for fsrlink-core.
//!
//! # Recovery
//!
//! The link never gives up on its own, so most of these errors are reported
//! through events and logs rather than returned to callers. Only
//! [`LinkStateMachine::start`](crate::LinkStateMachine::start) surfaces them
//! directly, when the very first resolution of the peer fails.
//!
//! | Error Type | Link behaviour |
//! |------------|----------------|
//! | [`Error::AdapterUnavailable`] | Returned from `start`; retried with backoff afterwards |
//! | [`Error::DeviceNotFound`] | Returned from `start`; retried with backoff afterwards |
//! | [`Error::Timeout`] | Counted as a failed attempt, retried with backoff |
//! | [`Error::Bluetooth`] | Counted as a failed attempt, retried with backoff |
//! | [`Error::ServiceNotFound`] | Link stays connected without notifications |
//! | [`Error::CharacteristicNotFound`] | Link stays connected without notifications |
//! | [`Error::InvalidConfig`] | Fix configuration and restart |

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while driving the wireless link.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The device identifier could not be resolved to a peer.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// Operation attempted while not connected to the peer.
    #[error("Not connected to device")]
    NotConnected,

    /// The subscription target's service is not offered by the peer.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The missing service.
        uuid: Uuid,
    },

    /// The subscription target's characteristic is missing from its service.
    #[error("Characteristic not found: {uuid} (in service {service})")]
    CharacteristicNotFound {
        /// The missing characteristic.
        uuid: Uuid,
        /// The service that was searched.
        service: Uuid,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Connection failed with specific reason.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Why a peer refused a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// The peer stopped answering.
    OutOfRange,
    /// The peer turned the connection down.
    Rejected,
    /// Anything else the platform reported.
    Other(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange => f.write_str("device out of range"),
            Self::Rejected => f.write_str("connection rejected by device"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No known or advertising peer matched the identifier.
    NotFound { identifier: String },
    /// Scan window elapsed before the peer was seen.
    ScanTimeout {
        identifier: String,
        duration: Duration,
    },
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout {
                identifier,
                duration,
            } => write!(f, "device '{}' not seen within {:?}", identifier, duration),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: Option<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed { device_id, reason }
    }
}

/// Result type alias using fsrlink-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::device_not_found("AA:BB:CC:DD:EE:FF").to_string(),
            "Device not found: device 'AA:BB:CC:DD:EE:FF' not found"
        );
        assert_eq!(
            Error::AdapterUnavailable.to_string(),
            "Bluetooth adapter unavailable"
        );
        assert_eq!(
            Error::timeout("connect to device", Duration::from_secs(15)).to_string(),
            "Operation 'connect to device' timed out after 15s"
        );
    }

    #[test]
    fn test_missing_target_names_uuids() {
        let service = fsrlink_types::uuids::NUS_SERVICE;
        let err = Error::ServiceNotFound { uuid: service };
        assert!(err.to_string().contains("6e400001"));

        let err = Error::CharacteristicNotFound {
            uuid: fsrlink_types::uuids::NUS_TX,
            service,
        };
        let msg = err.to_string();
        assert!(msg.contains("6e400003"));
        assert!(msg.contains("6e400001"));
    }

    #[test]
    fn test_scan_timeout_reason() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
            identifier: "FSR-Glove".to_string(),
            duration: Duration::from_secs(10),
        });
        assert!(err.to_string().contains("FSR-Glove"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_connection_failed_display() {
        let err = Error::connection_failed(
            Some("AA:BB".to_string()),
            ConnectionFailureReason::OutOfRange,
        );
        assert_eq!(err.to_string(), "Connection failed: device out of range");
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
