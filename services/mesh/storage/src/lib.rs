//! Directory persistence for mesh: pluggable in-memory and JSON file backends.
//!
//! The master's address directory lives in memory and nodes simply re-request
//! after a restart, so persistence is optional. When enabled, the directory
//! hands a snapshot of its records to a [`DirectoryStore`] whenever it
//! changes and restores from it on startup.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use mesh_wire::{LogicalAddress, NodeIdentity};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// One persisted identity to address binding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    /// Node identity
    pub identity: NodeIdentity,
    /// Address bound to it
    pub address: LogicalAddress,
    /// Configured binding that never expires
    #[serde(default)]
    pub is_static: bool,
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence for directory snapshots
pub trait DirectoryStore: Send {
    /// Load the last saved snapshot; empty when nothing was saved
    fn load(&self) -> Result<Vec<DirectoryRecord>, StorageError>;

    /// Replace the saved snapshot
    fn save(&self, records: &[DirectoryRecord]) -> Result<(), StorageError>;
}

/// Storage backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StorageMode {
    /// In-memory storage (lost on restart)
    #[default]
    InMemory,
    /// JSON snapshot file
    File {
        /// Snapshot path
        path: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileStore;
pub use backend::mem::MemoryStore;

impl StorageMode {
    /// Open the configured backend
    pub fn open(&self) -> Result<Box<dyn DirectoryStore>, StorageError> {
        match self {
            StorageMode::InMemory => Ok(Box::new(MemoryStore::new())),
            StorageMode::File { path } => Ok(Box::new(FileStore::new(path.clone())?)),
        }
    }
}
