//! Bootherd record registry
//!
//! The [`Registry`] holds every provisioning record the daemon answers for
//! and indexes them three ways: by identifier, by IPv4 address and by
//! hardware address. The DHCP engine reads it on every datagram and the
//! file transports on every request, so lookups share a read lock while
//! `put`/`forget` update all three indices under one write lock.
//!
//! ```ignore
//! use bootherd_store::{DirectoryPersistence, Registry};
//! use std::sync::Arc;
//!
//! let persistence = DirectoryPersistence::new("/var/lib/bootherd")?;
//! let registry = Arc::new(Registry::with_persistence(Arc::new(persistence)));
//! let report = registry.load_from_directory("/etc/bootherd/manifests".as_ref())?;
//! println!("loaded {} records", report.loaded.len());
//! ```

pub mod error;
pub mod loader;
pub mod persist;
pub mod registry;

pub use error::*;
pub use loader::*;
pub use persist::*;
pub use registry::*;
