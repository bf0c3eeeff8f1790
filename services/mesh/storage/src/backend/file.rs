//! File-based storage backend with checksummed snapshots

use crate::{DirectoryRecord, DirectoryStore, StorageError};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot file content
#[derive(Serialize, Deserialize, Debug)]
struct Snapshot {
    version: u32,
    /// CRC32 over the JSON encoding of `records`
    checksum: u32,
    records: Vec<DirectoryRecord>,
}

impl Snapshot {
    fn compute_crc(records: &[DirectoryRecord]) -> Result<u32, StorageError> {
        let mut hasher = Hasher::new();
        hasher.update(&serde_json::to_vec(records)?);
        Ok(hasher.finalize())
    }
}

/// Directory snapshot kept in one JSON file
///
/// Saves go to a sibling temporary file that is synced and then renamed over
/// the snapshot, so a crash leaves either the old or the new snapshot.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store at `path`, creating its parent directory
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    /// Snapshot path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl DirectoryStore for FileStore {
    fn load(&self) -> Result<Vec<DirectoryRecord>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No directory snapshot at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::Corruption(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        let expected = Snapshot::compute_crc(&snapshot.records)?;
        if snapshot.checksum != expected {
            warn!(
                "Directory snapshot {} failed checksum",
                self.path.display()
            );
            return Err(StorageError::Corruption(format!(
                "checksum mismatch: stored {:08x}, computed {:08x}",
                snapshot.checksum, expected
            )));
        }

        info!(
            "Loaded {} directory records from {}",
            snapshot.records.len(),
            self.path.display()
        );
        Ok(snapshot.records)
    }

    fn save(&self, records: &[DirectoryRecord]) -> Result<(), StorageError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            checksum: Snapshot::compute_crc(records)?,
            records: records.to_vec(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;

        debug!(
            "Saved {} directory records to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}
