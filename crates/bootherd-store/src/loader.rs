//! Manifest directory reading
//!
//! A manifest directory holds one YAML record per `.yml`/`.yaml` file.
//! Files are decoded independently so one malformed file never hides the
//! others.

use crate::error::{Result, StoreError};
use bootherd_manifest::Record;
use std::fs;
use std::path::{Path, PathBuf};

/// One manifest file and the outcome of decoding it
#[derive(Debug)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub record: Result<Record>,
}

/// Whether a file name looks like a manifest
pub fn is_manifest_name(name: &str) -> bool {
    !name.starts_with('.') && (name.ends_with(".yml") || name.ends_with(".yaml"))
}

/// Decode every manifest in `dir`, in file name order
///
/// Fails only when the directory itself cannot be read.
pub fn read_manifest_dir(dir: &Path) -> Result<Vec<ManifestFile>> {
    let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(is_manifest_name)
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .map(|path| {
            let record = read_manifest(&path);
            ManifestFile { path, record }
        })
        .collect())
}

/// Decode a single manifest file
pub fn read_manifest(path: &Path) -> Result<Record> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Record::from_yaml(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
