use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A 20-byte account address, stored as lowercase `0x`-prefixed hex.
///
/// Equality is therefore case-insensitive with respect to the input form:
/// checksummed, upper-case and lower-case spellings of the same account parse
/// to equal values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Left-pad the address to a 32-byte log topic
    pub fn to_topic(&self) -> String {
        format!("0x{:0>64}", &self.0[2..])
    }

    /// Extract an address from a 32-byte indexed topic
    pub fn from_topic(topic: &str) -> Result<Self, ValidationError> {
        let hex = strip_hex_prefix(topic.trim());
        if hex.len() != 64 {
            return Err(ValidationError::InvalidAddress(format!(
                "topic should be 64 hex characters, got {}",
                hex.len()
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidAddress(format!("topic is not hex: {}", topic)));
        }
        // Address is in the last 40 characters (20 bytes)
        hex[24..].parse()
    }
}

impl FromStr for Address {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_address(s);

        if normalized.len() != 40 {
            return Err(ValidationError::InvalidAddress(format!(
                "{}: must be 40 hex characters, got {}",
                s.trim(),
                normalized.len()
            )));
        }

        if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidAddress(format!(
                "{}: contains non-hexadecimal characters",
                s.trim()
            )));
        }

        Ok(Address(format!("0x{}", normalized)))
    }
}

impl TryFrom<String> for Address {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase an address or hash and drop its `0x` prefix
pub fn normalize_address(address: &str) -> String {
    strip_hex_prefix(address.trim()).to_lowercase()
}

pub(crate) fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
