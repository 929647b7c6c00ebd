//! Durable storage of registry changes
//!
//! When the registry is built with a [`Persistence`] backend every `put`
//! and `forget` is written to it under the registry lock, before the
//! in-memory indices change.

use crate::error::{Result, StoreError};
use bootherd_manifest::Record;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Backend mirroring registry mutations
pub trait Persistence: Send + Sync {
    /// Write (or overwrite) a record
    fn save(&self, record: &Record) -> Result<()>;

    /// Delete a record; deleting an unknown id is not an error
    fn remove(&self, id: &str) -> Result<()>;
}

/// Stores each record as `<id>.yaml` in a directory
///
/// The directory doubles as a manifest directory, so it can be fed back
/// to [`Registry::load_from_directory`](crate::Registry::load_from_directory)
/// on the next start.
#[derive(Debug, Clone)]
pub struct DirectoryPersistence {
    dir: PathBuf,
}

impl DirectoryPersistence {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(id: &str) -> Result<String> {
        if id.is_empty()
            || id.starts_with('.')
            || id.contains(['/', '\\', '\0'])
        {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(format!("{id}.yaml"))
    }
}

impl Persistence for DirectoryPersistence {
    fn save(&self, record: &Record) -> Result<()> {
        let name = Self::file_name(&record.id)?;
        let yaml = record.to_yaml().map_err(|source| StoreError::Encode {
            id: record.id.clone(),
            source,
        })?;

        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        fs::write(&tmp, yaml).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(id = %record.id, path = %path.display(), "Persisted record");
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let path = self.dir.join(Self::file_name(id)?);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(id = %id, path = %path.display(), "Removed persisted record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
