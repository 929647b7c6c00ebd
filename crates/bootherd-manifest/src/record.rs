//! Provisioning record types
//!
//! A record is the per-host manifest the daemon answers for. Field names
//! follow the camelCase keys of the on-disk YAML files.

use crate::error::{ManifestError, Result};
use crate::mac::HardwareAddr;
use crate::mount::{self, PathRule};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Free-form values attached to a record for content rendering
pub type Vars = BTreeMap<String, serde_yaml::Value>;

/// Provisioning record for one machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Unique record identifier
    pub id: String,

    /// Host address together with its subnet (`10.0.0.5/24`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<Ipv4Network>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    /// Lease duration in seconds, 0 leaves the lease-time option out
    #[serde(default, with = "crate::duration", skip_serializing_if = "is_zero")]
    pub lease_duration: u32,

    /// Hardware addresses this machine boots from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mac: Vec<HardwareAddr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub router: Vec<Ipv4Addr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ntp: Vec<Ipv4Addr>,

    /// Chainload iPXE before handing out `boot_filename`
    #[serde(default)]
    pub ipxe: bool,

    /// Boot file handed to iPXE clients, or to every client when `ipxe` is off
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub boot_filename: String,

    /// Path rules for the file transports, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<PathRule>,

    /// Withhold boot options while keeping address assignment
    #[serde(default)]
    pub suspended: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: Vars,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Record {
    /// Create a record with an identifier and address
    pub fn new(id: impl Into<String>, ipv4: Ipv4Network) -> Self {
        Self {
            id: id.into(),
            ipv4: Some(ipv4),
            ..Default::default()
        }
    }

    /// Builder method to add a hardware address
    pub fn with_mac(mut self, mac: HardwareAddr) -> Self {
        self.mac.push(mac);
        self
    }

    /// Builder method to set the hostname
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Builder method to add a path rule
    pub fn with_mount(mut self, rule: PathRule) -> Self {
        self.mounts.push(rule);
        self
    }

    /// Decode a record from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Decode a record from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the fields required for registration
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ManifestError::MissingField("id"));
        }
        if self.ipv4.is_none() {
            return Err(ManifestError::MissingField("ipv4"));
        }
        Ok(())
    }

    /// Host address handed out to the machine
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.ip())
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Addr> {
        self.ipv4.map(|net| net.mask())
    }

    /// Best matching path rule for a transport request
    pub fn mount_for(&self, path: &str) -> Result<&PathRule> {
        mount::resolve(&self.mounts, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_YAML: &str = r##"
id: rack1-node3
ipv4: 10.20.0.13/24
hostname: node3
domain: rack1.lab
leaseDuration: 1h
mac:
  - 52:54:00:12:34:56
  - 52-54-00-12-34-57
dns: [10.20.0.1, 1.1.1.1]
router: [10.20.0.1]
ntp: [10.20.0.2]
ipxe: true
bootFilename: http://10.20.0.1:8080/boot.ipxe
mounts:
  - path: /boot.ipxe
    content: "#!ipxe"
  - path: /images/
    pathIsPrefix: true
    localDir: /srv/images
    appendSuffix: true
vars:
  role: worker
  disks: [sda, sdb]
"##;

    #[test]
    fn test_record_from_yaml() {
        let record = Record::from_yaml(NODE_YAML).unwrap();

        assert_eq!(record.id, "rack1-node3");
        assert_eq!(record.address(), Some(Ipv4Addr::new(10, 20, 0, 13)));
        assert_eq!(record.subnet_mask(), Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(record.lease_duration, 3600);
        assert_eq!(record.mac.len(), 2);
        assert_eq!(record.mac[1].to_string(), "52:54:00:12:34:57");
        assert_eq!(record.dns.len(), 2);
        assert!(record.ipxe);
        assert!(!record.suspended);
        assert_eq!(record.mounts.len(), 2);
        assert!(record.mounts[1].path_is_prefix);
        assert!(record.mounts[1].append_suffix);
        assert_eq!(
            record.vars.get("role"),
            Some(&serde_yaml::Value::String("worker".to_string()))
        );
    }

    #[test]
    fn test_lease_duration_as_seconds() {
        let record = Record::from_yaml("id: a\nipv4: 10.0.0.1/8\nleaseDuration: 600\n").unwrap();
        assert_eq!(record.lease_duration, 600);
    }

    #[test]
    fn test_record_from_json() {
        let json = r#"{"id":"vm1","ipv4":"192.168.1.50/24","mac":["aa:bb:cc:dd:ee:ff"],"suspended":true}"#;
        let record = Record::from_json(json).unwrap();

        assert_eq!(record.id, "vm1");
        assert!(record.suspended);
        assert_eq!(record.mac[0].to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_invalid_mac_rejected() {
        let result = Record::from_yaml("id: a\nipv4: 10.0.0.1/8\nmac: [zz:zz]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let record = Record::default();
        assert!(matches!(
            record.validate(),
            Err(ManifestError::MissingField("id"))
        ));

        let record = Record {
            id: "no-address".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            record.validate(),
            Err(ManifestError::MissingField("ipv4"))
        ));

        let record = Record::new("ok", "10.0.0.1/24".parse().unwrap());
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_yaml_keeps_record_intact() {
        let record = Record::from_yaml(NODE_YAML).unwrap();
        let yaml = record.to_yaml().unwrap();
        assert!(yaml.contains("leaseDuration: 3600"));
        assert_eq!(Record::from_yaml(&yaml).unwrap(), record);
    }

    #[test]
    fn test_mount_for() {
        let record = Record::from_yaml(NODE_YAML).unwrap();
        let rule = record.mount_for("/images/vmlinuz").unwrap();
        assert_eq!(rule.local_dir, "/srv/images");
        assert!(record.mount_for("/nothing").is_err());
    }
}
