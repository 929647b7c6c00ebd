//! Interface lookup
//!
//! The engine needs the name and first IPv4 address of the interface a
//! request arrived on. Lookups go through [`InterfaceDirectory`] so tests
//! can supply a fixed table.

use crate::error::{DhcpError, Result};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;

/// A host network interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub index: u32,
    pub name: String,
}

/// Source of interface information
pub trait InterfaceDirectory: Send + Sync {
    /// Look up an interface by kernel index
    fn by_index(&self, index: u32) -> Result<InterfaceInfo>;

    /// Look up an interface by name
    fn by_name(&self, name: &str) -> Result<InterfaceInfo>;

    /// First non-loopback IPv4 address assigned to the interface
    fn ipv4_address(&self, index: u32) -> Result<Ipv4Addr>;
}

/// Interface table of the running host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl SystemInterfaces {
    fn list() -> Result<Vec<NetworkInterface>> {
        NetworkInterface::show().map_err(|e| DhcpError::InterfaceQuery(e.to_string()))
    }
}

impl InterfaceDirectory for SystemInterfaces {
    fn by_index(&self, index: u32) -> Result<InterfaceInfo> {
        Self::list()?
            .into_iter()
            .find(|iface| iface.index == index)
            .map(|iface| InterfaceInfo {
                index: iface.index,
                name: iface.name,
            })
            .ok_or_else(|| DhcpError::InterfaceNotFound(format!("index {}", index)))
    }

    fn by_name(&self, name: &str) -> Result<InterfaceInfo> {
        Self::list()?
            .into_iter()
            .find(|iface| iface.name == name)
            .map(|iface| InterfaceInfo {
                index: iface.index,
                name: iface.name,
            })
            .ok_or_else(|| DhcpError::InterfaceNotFound(name.to_string()))
    }

    fn ipv4_address(&self, index: u32) -> Result<Ipv4Addr> {
        let interfaces = Self::list()?;

        // Some platforms report one entry per address, so scan all of them
        let mut name = None;
        for iface in interfaces.iter().filter(|iface| iface.index == index) {
            name.get_or_insert_with(|| iface.name.clone());
            if let Some(ip) = first_ipv4(&iface.addr) {
                return Ok(ip);
            }
        }

        match name {
            Some(name) => Err(DhcpError::NoInterfaceAddress(name)),
            None => Err(DhcpError::InterfaceNotFound(format!("index {}", index))),
        }
    }
}

fn first_ipv4(addrs: &[Addr]) -> Option<Ipv4Addr> {
    addrs.iter().find_map(|addr| match addr {
        Addr::V4(v4) if !v4.ip.is_loopback() => Some(v4.ip),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_index() {
        let err = SystemInterfaces.by_index(u32::MAX).unwrap_err();
        assert!(matches!(
            err,
            DhcpError::InterfaceNotFound(_) | DhcpError::InterfaceQuery(_)
        ));
    }

    #[test]
    fn test_unknown_name() {
        let err = SystemInterfaces.by_name("no-such-if0").unwrap_err();
        assert!(matches!(
            err,
            DhcpError::InterfaceNotFound(_) | DhcpError::InterfaceQuery(_)
        ));
    }

    #[test]
    fn test_name_and_index_agree() {
        let Ok(interfaces) = NetworkInterface::show() else {
            return;
        };
        for iface in interfaces {
            let found = SystemInterfaces.by_name(&iface.name).unwrap();
            assert_eq!(found.index, iface.index);
        }
    }
}
