//! Daemon configuration file
//!
//! Optional YAML file; every field has a default so a missing file or a
//! partial one is fine. Command-line flags are applied on top.

use bootherd_dhcp::{Chainloaders, DhcpConfig, SERVER_PORT};
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

const SYSTEM_CONFIG: &str = "/etc/bootherd/bootherd.yaml";
const LOCAL_CONFIG: &str = "bootherd.yaml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DaemonConfig {
    pub dhcp: DhcpSection,
    pub store: StoreSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DhcpSection {
    pub enabled: bool,
    pub address: Ipv4Addr,
    pub port: u16,
    pub interface: Option<String>,
    pub chainloaders: Chainloaders,
}

impl Default for DhcpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            address: Ipv4Addr::UNSPECIFIED,
            port: SERVER_PORT,
            interface: None,
            chainloaders: Chainloaders::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreSection {
    /// Directory of record manifests loaded at startup
    pub manifests: Option<PathBuf>,
    /// Directory records are written back to
    pub persistence: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document parses as null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).wrap_err("invalid configuration")
    }

    /// Load `explicit` if given, else the first existing default location.
    /// Returns the path that was read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => search_paths().into_iter().find(|path| path.is_file()),
        };

        let Some(path) = path else {
            return Ok((Self::default(), None));
        };

        let content = fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
        Ok((config, Some(path)))
    }

    pub fn dhcp_config(&self) -> DhcpConfig {
        let config = DhcpConfig::new(self.dhcp.address)
            .with_port(self.dhcp.port)
            .with_chainloaders(self.dhcp.chainloaders.clone());
        match &self.dhcp.interface {
            Some(interface) => config.with_interface(interface.clone()),
            None => config,
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(Path::new(&home).join(".config/bootherd").join(LOCAL_CONFIG));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));
    paths
}
