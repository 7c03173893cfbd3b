//! Network operations module
//!
//! Hardware address handling, MAC-to-interface resolution and network
//! namespace access for the netlink connection.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{NetworkError, ValidationError};

pub mod device;
pub mod namespace;

pub use device::NetlinkDeviceResolver;
pub use namespace::NetworkNamespace;

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$").expect("valid MAC pattern")
});

/// 48-bit hardware address of an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !MAC_PATTERN.is_match(s) {
            return Err(ValidationError::InvalidMac(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(s.split([':', '-'])) {
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| ValidationError::InvalidMac(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Maps a hardware address to the kernel interface currently carrying it.
///
/// Implementations must look the interface up on every call. Interfaces get
/// re-enumerated between a configure and the matching delete, so a cached
/// index can point at the wrong device.
pub trait DeviceResolver {
    fn resolve(
        &self,
        mac: &MacAddress,
    ) -> impl Future<Output = Result<u32, NetworkError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        let mac: MacAddress = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac.octets(), &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_parse_mac_normalizes_case_and_separator() {
        let mac: MacAddress = "0A-1B-2C-3D-4E-5F".parse().unwrap();
        assert_eq!(mac.to_string(), "0a:1b:2c:3d:4e:5f");
    }

    #[test]
    fn test_parse_mac_invalid() {
        for input in ["", "00:11:22:33:44", "00:11:22:33:44:55:66", "zz:11:22:33:44:55", "0011.2233.4455"] {
            assert!(
                matches!(input.parse::<MacAddress>(), Err(ValidationError::InvalidMac(_))),
                "{input} should be rejected"
            );
        }
    }
}
