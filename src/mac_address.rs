//! Bluetooth MAC addresses and the short tag ids derived from them.
//!
//! Tags are identified everywhere else in the crate by a short id: the first
//! four bytes of the address as eight lowercase hex characters, e.g.
//! `a06bd66b`. This is what users put in the configuration.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters in a short tag id.
pub const TAG_ID_LEN: usize = 8;

/// A Bluetooth MAC address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Short, stable tag id for this address.
    pub fn tag_id(&self) -> String {
        format!(
            "{:02x}{:02x}{:02x}{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid MAC address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// Normalize a user-supplied tag identifier to a short tag id.
///
/// Accepts a full colon-separated MAC address, a bare hex address of any
/// length of at least eight characters, or an id that is already short.
/// Returns `None` if the input is not hex.
pub fn normalize_tag_id(src: &str) -> Option<String> {
    let src = src.trim();
    if let Ok(mac) = src.parse::<MacAddress>() {
        return Some(mac.tag_id());
    }

    let hex: String = src.chars().filter(|c| *c != ':').collect();
    if hex.len() < TAG_ID_LEN || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hex[..TAG_ID_LEN].to_ascii_lowercase())
}
