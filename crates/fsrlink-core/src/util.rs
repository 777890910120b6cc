//! Utility functions for fsrlink-core.

use btleplug::platform::PeripheralId;

/// Address reported by platforms that hide the real one (macOS).
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create an identifier string from an address and peripheral ID.
///
/// Uses the peripheral ID where the platform hides the address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == HIDDEN_ADDRESS {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

/// Decide whether a configured identifier names this peripheral.
///
/// Matching is case-insensitive and tries, in order: the platform peripheral
/// ID, the Bluetooth address (with or without colons), then the advertised
/// name (substring match).
pub fn identifier_matches(
    identifier: &str,
    peripheral_id: &str,
    address: &str,
    local_name: Option<&str>,
) -> bool {
    let wanted = identifier.trim().to_lowercase();
    if wanted.is_empty() {
        return false;
    }

    if peripheral_id.to_lowercase().contains(&wanted) {
        return true;
    }

    let address = address.to_lowercase();
    if address != HIDDEN_ADDRESS
        && (address == wanted || address.replace(':', "") == wanted.replace(':', ""))
    {
        return true;
    }

    local_name.is_some_and(|name| name.to_lowercase().contains(&wanted))
}
