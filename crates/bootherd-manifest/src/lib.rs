//! Bootherd provisioning records
//!
//! A [`Record`] describes one physical machine: the address it is handed
//! over DHCP, the boot options it receives, and the [`PathRule`]s that the
//! file transports use to answer its TFTP and HTTP requests.
//!
//! # Record files
//!
//! Records are stored one per YAML file:
//!
//! ```yaml
//! id: rack1-node3
//! ipv4: 10.20.0.13/24
//! hostname: node3
//! domain: rack1.lab
//! leaseDuration: 1h
//! mac:
//!   - 52:54:00:12:34:56
//! dns: [10.20.0.1]
//! router: [10.20.0.1]
//! ipxe: true
//! bootFilename: http://10.20.0.1:8080/boot.ipxe
//! mounts:
//!   - path: /boot.ipxe
//!     content: |
//!       #!ipxe
//!       chain http://10.20.0.1:8080/images/vmlinuz
//!   - path: /images/
//!     pathIsPrefix: true
//!     localDir: /srv/images
//!     appendSuffix: true
//! ```
//!
//! # Mount resolution
//!
//! [`resolve`] picks the rule answering a request path: exact non-prefix
//! selectors win outright, otherwise the longest qualifying prefix selector.

pub mod duration;
pub mod error;
pub mod mac;
pub mod mount;
pub mod record;

pub use error::*;
pub use mac::HardwareAddr;
pub use mount::*;
pub use record::*;
