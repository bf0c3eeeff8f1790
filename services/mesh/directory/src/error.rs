//! Directory and mesh errors.

use mesh_network::NetworkError;
use mesh_storage::StorageError;
use mesh_wire::{LogicalAddress, NodeIdentity};
use thiserror::Error;

/// Master-side allocation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// No free address left in the tree (or under the requested parent)
    #[error("address capacity exhausted")]
    CapacityExhausted,

    /// The identity cannot hold a dynamic address
    #[error("identity {0} is reserved")]
    ReservedIdentity(NodeIdentity),

    /// The suggested parent does not hold an address
    #[error("parent {0} is not in the directory")]
    UnknownParent(LogicalAddress),

    /// Address already bound to another live identity
    #[error("address {address} is held by {holder}")]
    Conflict {
        /// Contested address
        address: LogicalAddress,
        /// Current holder
        holder: NodeIdentity,
    },

    /// Address outside the configured tree limits
    #[error("address {0} is outside the tree limits")]
    OutOfRange(LogicalAddress),
}

/// Errors surfaced by [`crate::Mesh`]
#[derive(Error, Debug)]
pub enum MeshError {
    /// Delivery layer failure
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Directory failure (master only)
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Snapshot persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Node has no assigned address yet
    #[error("no address assigned")]
    NotAssigned,

    /// Destination identity not resolved yet; a lookup is in flight
    #[error("address of {0} unknown, lookup pending")]
    AddressUnknown(NodeIdentity),

    /// The master could not be reached; the node is re-requesting an address
    #[error("connectivity to the master lost")]
    ConnectivityLost,

    /// Operation only valid on the master
    #[error("operation requires the master")]
    NotMaster,
}
