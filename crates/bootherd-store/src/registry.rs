//! Multiply-indexed record registry
//!
//! Records are kept behind `Arc` so lookups hand out cheap immutable
//! snapshots. Any change to a record (including suspend/unsuspend) replaces
//! the `Arc` under the write lock; nothing mutates a record in place.

use crate::error::{Result, StoreError};
use crate::loader::read_manifest_dir;
use crate::persist::Persistence;
use bootherd_manifest::{HardwareAddr, Record};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

/// Normalised 16-byte form of an address used as the IP index key
fn ip_key(ip: IpAddr) -> Ipv6Addr {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// The three indices, always updated together
#[derive(Default)]
struct Indices {
    records: HashMap<String, Arc<Record>>,
    /// IP key -> record id
    by_ip: HashMap<Ipv6Addr, String>,
    /// Hardware address -> record id
    by_mac: HashMap<HardwareAddr, String>,
}

impl Indices {
    fn link(&mut self, record: Arc<Record>) {
        if let Some(ip) = record.address() {
            self.by_ip.insert(ip_key(ip.into()), record.id.clone());
        }
        for mac in &record.mac {
            self.by_mac.insert(mac.clone(), record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    /// Drop the secondary entries of `record` that still point at its id
    fn unlink(&mut self, record: &Record) {
        if let Some(ip) = record.address() {
            let key = ip_key(ip.into());
            if self.by_ip.get(&key) == Some(&record.id) {
                self.by_ip.remove(&key);
            }
        }
        for mac in &record.mac {
            if self.by_mac.get(mac) == Some(&record.id) {
                self.by_mac.remove(mac);
            }
        }
    }

    fn resolve(&self, id: Option<&String>) -> Option<Arc<Record>> {
        id.and_then(|id| self.records.get(id)).cloned()
    }
}

/// Outcome of loading a manifest directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Identifiers of the records stored
    pub loaded: Vec<String>,
    /// Files that were skipped, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Concurrency-safe store of provisioning records
pub struct Registry {
    indices: RwLock<Indices>,
    persistence: Option<Arc<dyn Persistence>>,
}

impl Registry {
    /// Create an empty in-memory registry
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
            persistence: None,
        }
    }

    /// Create an empty registry mirroring changes to `persistence`
    pub fn with_persistence(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
            persistence: Some(persistence),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a record
    ///
    /// The record must have an identifier and an IPv4 address. Index
    /// entries of a previous record with the same id are dropped before
    /// the new ones are installed. With persistence configured the record
    /// is written under the same lock, and a failed write leaves the
    /// registry unchanged.
    pub fn put(&self, record: Record) -> Result<Arc<Record>> {
        record.validate().map_err(StoreError::Validation)?;
        let record = Arc::new(record);

        let mut indices = self.write();
        if let Some(persistence) = &self.persistence {
            persistence.save(&record)?;
        }
        if let Some(previous) = indices.records.remove(&record.id) {
            indices.unlink(&previous);
        }
        indices.link(Arc::clone(&record));
        drop(indices);

        debug!(id = %record.id, ip = ?record.address(), macs = record.mac.len(), "Stored record");
        Ok(record)
    }

    /// Remove a record from every index; unknown ids are ignored
    pub fn forget(&self, id: &str) -> Result<()> {
        let mut indices = self.write();
        if !indices.records.contains_key(id) {
            return Ok(());
        }
        if let Some(persistence) = &self.persistence {
            persistence.remove(id)?;
        }
        if let Some(record) = indices.records.remove(id) {
            indices.unlink(&record);
        }
        drop(indices);

        debug!(id = %id, "Forgot record");
        Ok(())
    }

    /// Set or clear the suspended flag of a record
    ///
    /// Returns the updated record, or `None` if the id is unknown.
    pub fn set_suspended(&self, id: &str, suspended: bool) -> Result<Option<Arc<Record>>> {
        let mut indices = self.write();
        let Some(current) = indices.records.get_mut(id) else {
            return Ok(None);
        };
        if current.suspended == suspended {
            return Ok(Some(Arc::clone(current)));
        }

        let mut next = Record::clone(current);
        next.suspended = suspended;
        let next = Arc::new(next);
        if let Some(persistence) = &self.persistence {
            persistence.save(&next)?;
        }
        *current = Arc::clone(&next);
        drop(indices);

        info!(id = %id, suspended, "Changed suspension");
        Ok(Some(next))
    }

    pub fn find(&self, id: &str) -> Option<Arc<Record>> {
        self.read().records.get(id).cloned()
    }

    /// Look up by address; IPv4 and IPv4-mapped IPv6 forms are equivalent
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<Arc<Record>> {
        let indices = self.read();
        indices.resolve(indices.by_ip.get(&ip_key(ip)))
    }

    pub fn find_by_mac(&self, mac: &HardwareAddr) -> Option<Arc<Record>> {
        let indices = self.read();
        indices.resolve(indices.by_mac.get(mac))
    }

    /// Point-in-time copy of all records keyed by id
    pub fn all(&self) -> HashMap<String, Arc<Record>> {
        self.read().records.clone()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every manifest in `dir`
    ///
    /// Unreadable, malformed or invalid files are logged and skipped; only
    /// an unreadable directory fails the call.
    pub fn load_from_directory(&self, dir: &Path) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for file in read_manifest_dir(dir)? {
            let stored = file.record.and_then(|record| self.put(record));
            match stored {
                Ok(record) => {
                    debug!(id = %record.id, path = %file.path.display(), "Loaded record from file");
                    report.loaded.push(record.id.clone());
                }
                Err(e) => {
                    error!(path = %file.path.display(), error = %e, "Skipping manifest");
                    report.skipped.push((file.path, e.to_string()));
                }
            }
        }

        if report.loaded.is_empty() {
            warn!(dir = %dir.display(), "No records loaded");
        } else {
            info!(
                dir = %dir.display(),
                loaded = report.loaded.len(),
                skipped = report.skipped.len(),
                "Loaded manifest directory"
            );
        }
        Ok(report)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("records", &self.len())
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}
