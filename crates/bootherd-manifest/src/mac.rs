//! Hardware (link-layer) addresses
//!
//! Records list the hardware addresses a machine may boot from. The DHCP
//! engine indexes records by the canonical form, so every accepted notation
//! normalises to lowercase colon-separated octets.

use crate::error::{ManifestError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A physical hardware address (MAC-48, EUI-64 or 20-octet InfiniBand)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HardwareAddr(Vec<u8>);

impl HardwareAddr {
    /// Create an address from raw octets
    pub fn new(octets: impl Into<Vec<u8>>) -> Self {
        Self(octets.into())
    }

    /// Raw octets of the address
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `00:00:5e:00:53:01`, `00-00-5e-00-53-01` or `0000.5e00.5301`
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || ManifestError::InvalidHardwareAddress(s.to_string());

        let octets = if s.contains(':') || s.contains('-') {
            let sep = if s.contains(':') { ':' } else { '-' };
            s.split(sep)
                .map(|part| {
                    if part.len() != 2 {
                        return Err(invalid());
                    }
                    u8::from_str_radix(part, 16).map_err(|_| invalid())
                })
                .collect::<Result<Vec<u8>>>()?
        } else if s.contains('.') {
            let mut octets = Vec::new();
            for group in s.split('.') {
                if group.len() != 4 {
                    return Err(invalid());
                }
                let value = u16::from_str_radix(group, 16).map_err(|_| invalid())?;
                octets.extend_from_slice(&value.to_be_bytes());
            }
            octets
        } else {
            return Err(invalid());
        };

        match octets.len() {
            6 | 8 | 20 => Ok(Self(octets)),
            _ => Err(invalid()),
        }
    }
}

impl From<&[u8]> for HardwareAddr {
    fn from(octets: &[u8]) -> Self {
        Self(octets.to_vec())
    }
}

impl From<[u8; 6]> for HardwareAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets.to_vec())
    }
}

impl FromStr for HardwareAddr {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HardwareAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
