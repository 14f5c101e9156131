//! MAC address type and randomization
//!
//! Parses the formats operators actually type (`AA:BB:CC:DD:EE:FF`,
//! `AA-BB-CC-DD-EE-FF`, `AABBCCDDEEFF`), displays the colon form, and
//! generates random addresses with the locally administered bit set and the
//! multicast bit cleared. Serialized in the ledger as the display string.

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ControlError, Result};

/// A validated six-byte MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress {
    bytes: [u8; 6],
}

impl MacAddress {
    /// Create a MAC address from raw bytes
    #[must_use]
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    /// Parse a MAC address from string
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidMac`] if the string is not one of the
    /// accepted formats.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    /// Check if the locally administered bit is set
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.bytes[0] & 0x02 != 0
    }

    /// Check if this is a unicast address (multicast bit clear)
    #[must_use]
    pub fn is_unicast(&self) -> bool {
        self.bytes[0] & 0x01 == 0
    }

    /// Get the vendor OUI portion (first 3 bytes)
    #[must_use]
    pub fn oui(&self) -> [u8; 3] {
        [self.bytes[0], self.bytes[1], self.bytes[2]]
    }

    /// Create a random MAC address
    ///
    /// Sets the locally administered bit and clears the multicast bit so the
    /// result is always a valid unicast address.
    pub fn random() -> Result<Self> {
        let mut bytes = [0u8; 6];
        getrandom::getrandom(&mut bytes).map_err(|e| {
            ControlError::operation_failed("generate random MAC", e.to_string())
        })?;

        bytes[0] = (bytes[0] | 0x02) & 0xFE;

        Ok(Self { bytes })
    }

    /// Create a random MAC that keeps the given vendor OUI
    ///
    /// Only the NIC-specific half is randomized; the OUI is carried over
    /// with the locally administered and unicast bits normalized.
    pub fn random_with_oui(oui: [u8; 3]) -> Result<Self> {
        let mut bytes = [0u8; 6];
        getrandom::getrandom(&mut bytes[3..6]).map_err(|e| {
            ControlError::operation_failed("generate random MAC", e.to_string())
        })?;

        bytes[0] = (oui[0] | 0x02) & 0xFE;
        bytes[1] = oui[1];
        bytes[2] = oui[2];

        Ok(Self { bytes })
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4], self.bytes[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_uppercase();

        // The continuous form is sliced by byte offset; everything past this
        // point may assume single-byte characters.
        if !s.is_ascii() {
            return Err(ControlError::InvalidMac(format!(
                "unrecognized format: {s}"
            )));
        }

        let octets: Vec<&str> = if s.contains(':') {
            s.split(':').collect()
        } else if s.contains('-') {
            s.split('-').collect()
        } else if s.len() == 12 {
            (0..6).map(|i| &s[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(ControlError::InvalidMac(format!(
                "unrecognized format: {s}"
            )));
        };

        if octets.len() != 6 {
            return Err(ControlError::InvalidMac(format!(
                "expected 6 octets, got {}",
                octets.len()
            )));
        }

        let mut bytes = [0u8; 6];
        for (i, part) in octets.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ControlError::InvalidMac(format!("invalid hex octet: {part}")))?;
        }

        Ok(Self { bytes })
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
