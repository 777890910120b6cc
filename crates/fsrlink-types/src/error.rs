//! Error types for line and configuration parsing in fsrlink-types.

use thiserror::Error;

/// Reasons a value could not be parsed into one of the pipeline types.
///
/// Line-level variants describe why a framed line was rejected by
/// [`SensorReading::parse_line`](crate::SensorReading::parse_line). They are
/// never fatal to the stream; callers log them and move on.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line was empty after trimming.
    #[error("empty line")]
    EmptyLine,

    /// The line bytes were not valid UTF-8.
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    /// The line did not contain exactly one field delimiter.
    #[error("expected exactly one ':' delimiter, found {found}")]
    DelimiterCount {
        /// Number of delimiters present in the line.
        found: usize,
    },

    /// One side of the delimiter was empty.
    #[error("empty {0} field")]
    EmptyField(&'static str),

    /// The name does not match `FSR` followed by digits.
    #[error("invalid sensor name: {0:?}")]
    InvalidSensorName(String),

    /// The value is not a finite decimal number.
    #[error("invalid sensor value: {0:?}")]
    InvalidValue(String),

    /// A device identifier was empty.
    #[error("device identifier cannot be empty")]
    EmptyDeviceId,

    /// A subscription UUID was missing or malformed.
    #[error("invalid {field} UUID: {value:?}")]
    InvalidUuid {
        /// Which half of the subscription target was rejected.
        field: &'static str,
        /// The offending input.
        value: String,
    },
}

/// Result type alias using fsrlink-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
