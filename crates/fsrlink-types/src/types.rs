//! Core types for the sensor pipeline.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};

/// Prefix every accepted sensor name starts with.
pub const SENSOR_NAME_PREFIX: &str = "FSR";

/// Byte that terminates one line on the wire.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Separator between the sensor name and its value.
pub const FIELD_DELIMITER: char = ':';

/// Prefix of Pending Store keys (`unsent_FSR3`).
pub const PENDING_KEY_PREFIX: &str = "unsent_";

/// A validated sensor name: `FSR` followed by one or more ASCII digits.
///
/// A `SensorName` can only be obtained through [`SensorName::parse`] (or the
/// equivalent `FromStr`/`TryFrom` impls), so holding one is proof the name
/// matched the protocol pattern.
///
/// ```
/// use fsrlink_types::SensorName;
///
/// assert!(SensorName::parse("FSR3").is_ok());
/// assert!(SensorName::parse("FSR").is_err());
/// assert!(SensorName::parse("fsr3").is_err());
/// assert!(SensorName::parse("temp").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct SensorName(String);

impl SensorName {
    /// Validate and wrap a sensor name.
    pub fn parse(name: &str) -> ParseResult<Self> {
        if Self::is_valid(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(ParseError::InvalidSensorName(name.to_string()))
        }
    }

    /// Check a candidate against the `FSR<digits>` pattern without allocating.
    #[must_use]
    pub fn is_valid(name: &str) -> bool {
        name.strip_prefix(SENSOR_NAME_PREFIX)
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which undelivered records for this sensor are stored.
    ///
    /// ```
    /// use fsrlink_types::SensorName;
    ///
    /// let name = SensorName::parse("FSR2").unwrap();
    /// assert_eq!(name.pending_key(), "unsent_FSR2");
    /// ```
    #[must_use]
    pub fn pending_key(&self) -> String {
        format!("{PENDING_KEY_PREFIX}{}", self.0)
    }

    /// Recover a sensor name from a Pending Store key.
    ///
    /// Returns `None` for keys that do not carry the prefix or whose suffix is
    /// not a valid sensor name.
    #[must_use]
    pub fn from_pending_key(key: &str) -> Option<Self> {
        key.strip_prefix(PENDING_KEY_PREFIX)
            .and_then(|name| Self::parse(name).ok())
    }
}

impl fmt::Display for SensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl FromStr for SensorName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SensorName {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(ParseError::InvalidSensorName(value))
        }
    }
}

impl From<SensorName> for String {
    fn from(name: SensorName) -> Self {
        name.0
    }
}

impl AsRef<str> for SensorName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single accepted reading from the sensor stream.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorReading {
    /// Which sensor produced the value.
    pub sensor_name: SensorName,
    /// The reported value.
    pub value: f64,
    /// When the line carrying the value was framed.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub observed_at: OffsetDateTime,
}

impl SensorReading {
    /// Create a reading.
    pub fn new(sensor_name: SensorName, value: f64, observed_at: OffsetDateTime) -> Self {
        Self {
            sensor_name,
            value,
            observed_at,
        }
    }

    /// Classify one framed line (terminator already removed).
    ///
    /// The line is trimmed, then must contain exactly one `:` with non-empty
    /// name and value on either side. The name must match `FSR<digits>` and
    /// the value must parse as a finite decimal number.
    ///
    /// ```
    /// use fsrlink_types::SensorReading;
    /// use time::OffsetDateTime;
    ///
    /// let now = OffsetDateTime::now_utc();
    /// let reading = SensorReading::parse_line("FSR3: 42.5", now).unwrap();
    /// assert_eq!(reading.sensor_name.as_str(), "FSR3");
    /// assert_eq!(reading.value, 42.5);
    ///
    /// assert!(SensorReading::parse_line("temp:10", now).is_err());
    /// assert!(SensorReading::parse_line("FSR1:notanumber", now).is_err());
    /// ```
    pub fn parse_line(line: &str, observed_at: OffsetDateTime) -> ParseResult<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::EmptyLine);
        }

        let found = line.matches(FIELD_DELIMITER).count();
        if found != 1 {
            return Err(ParseError::DelimiterCount { found });
        }

        // Exactly one delimiter, so split_once always succeeds here.
        let (name, value) = line
            .split_once(FIELD_DELIMITER)
            .ok_or(ParseError::DelimiterCount { found: 0 })?;
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            return Err(ParseError::EmptyField("name"));
        }
        if value.is_empty() {
            return Err(ParseError::EmptyField("value"));
        }

        let sensor_name = SensorName::parse(name)?;
        let value = parse_decimal(value)?;

        Ok(Self::new(sensor_name, value, observed_at))
    }

    /// Build the JSON body sent to the collection endpoint.
    #[must_use]
    pub fn to_payload(&self) -> DeliveryPayload {
        DeliveryPayload {
            sensor_name: self.sensor_name.clone(),
            value: self.value,
            time_stamp: self.observed_at,
        }
    }

    /// Build the record kept in the Pending Store.
    #[must_use]
    pub fn to_pending(&self) -> PendingRecord {
        PendingRecord {
            time_stamp: self.observed_at,
            value: self.value,
        }
    }
}

fn parse_decimal(raw: &str) -> ParseResult<f64> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidValue(raw.to_string())),
    }
}

/// An undelivered reading, stored under its sensor's pending key.
///
/// Serialized as `{ "timeStamp": "<RFC 3339>", "value": <number> }`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PendingRecord {
    /// When the reading was observed.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "timeStamp", with = "time::serde::rfc3339")
    )]
    pub time_stamp: OffsetDateTime,
    /// The reported value.
    pub value: f64,
}

impl PendingRecord {
    /// Re-attach the sensor name the record was keyed under.
    #[must_use]
    pub fn into_reading(self, sensor_name: SensorName) -> SensorReading {
        SensorReading::new(sensor_name, self.value, self.time_stamp)
    }
}

/// JSON body POSTed to the collection endpoint.
///
/// Serialized as `{ "sensorName": "FSR3", "value": 42.5, "timeStamp": "<RFC 3339>" }`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeliveryPayload {
    /// Sensor that produced the value.
    pub sensor_name: SensorName,
    /// The reported value.
    pub value: f64,
    /// Observation time.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub time_stamp: OffsetDateTime,
}

/// Opaque identifier of the peer to connect to.
///
/// A MAC address on Linux and Windows, a CoreBluetooth UUID on macOS, or an
/// advertised name. The only invariant is that it is not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a non-blank identifier. Surrounding whitespace is removed.
    pub fn new(id: impl Into<String>) -> ParseResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyDeviceId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

/// The notification stream to subscribe to on the connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubscriptionTarget {
    /// GATT service (capability group).
    pub service: Uuid,
    /// GATT characteristic (capability) inside `service`.
    pub characteristic: Uuid,
}

impl SubscriptionTarget {
    /// Create a target from already-parsed UUIDs.
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// Parse both halves from configuration strings.
    ///
    /// Both must be present and well-formed.
    ///
    /// ```
    /// use fsrlink_types::SubscriptionTarget;
    ///
    /// let target = SubscriptionTarget::parse(
    ///     Some("6e400001-b5a3-f393-e0a9-e50e24dcca9e"),
    ///     Some("6e400003-b5a3-f393-e0a9-e50e24dcca9e"),
    /// );
    /// assert!(target.is_ok());
    /// assert!(SubscriptionTarget::parse(Some("6e400001-b5a3-f393-e0a9-e50e24dcca9e"), None).is_err());
    /// ```
    pub fn parse(service: Option<&str>, characteristic: Option<&str>) -> ParseResult<Self> {
        Ok(Self {
            service: parse_uuid("service", service)?,
            characteristic: parse_uuid("characteristic", characteristic)?,
        })
    }
}

fn parse_uuid(field: &'static str, raw: Option<&str>) -> ParseResult<Uuid> {
    let raw = raw.map(str::trim).unwrap_or_default();
    Uuid::parse_str(raw).map_err(|_| ParseError::InvalidUuid {
        field,
        value: raw.to_string(),
    })
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.characteristic)
    }
}

/// Lifecycle state of the wireless link.
///
/// Ordered by progress, so `state >= LinkState::Connected` means a
/// connection is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum LinkState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// Resolving the peer or waiting for the connection to come up.
    Connecting,
    /// Connected; notifications are not (or not yet) enabled.
    Connected,
    /// Connected and receiving notifications from the target.
    SubscriptionActive,
}

impl LinkState {
    /// Whether a connection to the peer is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self >= LinkState::Connected
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::SubscriptionActive => "subscription active",
        };
        f.write_str(label)
    }
}
