//! DHCP listener configuration
//!
//! Network settings for the listener plus the chainloader file names handed
//! to firmware PXE clients.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Port servers and relays listen on
pub const SERVER_PORT: u16 = 67;

/// Port clients listen on
pub const CLIENT_PORT: u16 = 68;

/// Chainloader boot files, one per firmware family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Chainloaders {
    /// Legacy BIOS PXE ROMs
    pub bios: String,

    /// x86 UEFI firmware
    pub uefi: String,

    /// ARM64 UEFI firmware
    pub arm64_uefi: String,
}

impl Default for Chainloaders {
    fn default() -> Self {
        Self {
            bios: "undionly.kpxe".to_string(),
            uefi: "ipxe.efi".to_string(),
            arm64_uefi: "ipxe_arm64.efi".to_string(),
        }
    }
}

/// DHCP listener configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpConfig {
    /// IP address to bind the socket to (0.0.0.0 for all interfaces)
    pub bind_ip: Ipv4Addr,

    /// UDP port to listen on
    pub port: u16,

    /// Interface to bind to (e.g., "eth0")
    /// If None, listens on every interface and relies on packet info
    pub interface: Option<String>,

    /// Boot files for clients that are not yet running iPXE
    pub chainloaders: Chainloaders,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            bind_ip: Ipv4Addr::UNSPECIFIED,
            port: SERVER_PORT,
            interface: None,
            chainloaders: Chainloaders::default(),
        }
    }
}

impl DhcpConfig {
    /// Create a config bound to `bind_ip`
    pub fn new(bind_ip: Ipv4Addr) -> Self {
        Self {
            bind_ip,
            ..Default::default()
        }
    }

    /// Set the listening port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind to a specific interface
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Override the chainloader file names
    pub fn with_chainloaders(mut self, chainloaders: Chainloaders) -> Self {
        self.chainloaders = chainloaders;
        self
    }

    pub fn bind_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.bind_ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DhcpConfig::default();
        assert_eq!(config.bind_addr(), SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 67));
        assert!(config.interface.is_none());
        assert_eq!(config.chainloaders.bios, "undionly.kpxe");
        assert_eq!(config.chainloaders.uefi, "ipxe.efi");
        assert_eq!(config.chainloaders.arm64_uefi, "ipxe_arm64.efi");
    }

    #[test]
    fn test_config_builder() {
        let config = DhcpConfig::new(Ipv4Addr::new(10, 0, 0, 1))
            .with_port(1067)
            .with_interface("eth1")
            .with_chainloaders(Chainloaders {
                bios: "custom.kpxe".to_string(),
                ..Default::default()
            });

        assert_eq!(config.bind_addr(), SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 1067));
        assert_eq!(config.interface.as_deref(), Some("eth1"));
        assert_eq!(config.chainloaders.bios, "custom.kpxe");
        assert_eq!(config.chainloaders.uefi, "ipxe.efi");
    }

    #[test]
    fn test_chainloaders_partial_yaml() {
        let loaders: Chainloaders = serde_yaml::from_str("arm64Uefi: snp_arm64.efi\n").unwrap();
        assert_eq!(loaders.arm64_uefi, "snp_arm64.efi");
        assert_eq!(loaders.bios, "undionly.kpxe");
    }
}
