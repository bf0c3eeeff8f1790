//! Dynamic addressing for mesh: the master directory, the join and renewal
//! protocol, and identity lookups.
//!
//! Nodes are known by a stable one-byte [`NodeIdentity`](mesh_wire::NodeIdentity)
//! while their tree address depends on where they joined. Identity 0 is the
//! master: it sits at the root and hands out addresses from its
//! [`Directory`]. Every other node starts unassigned, polls the tree level by
//! level for a contact, and asks the master for an address through it.
//!
//! ## Join sequence
//!
//! ```text
//! joiner (04444)          contact               master (0)
//!   | POLL, level n  ──>    |                      |
//!   | <── POLL (direct)     |                      |
//!   | REQ_ADDRESS ──────>   | ───── routed ─────>  | allocate
//!   |                       | <── ADDR_RESPONSE ── |
//!   | <── relayed direct    |                      |
//!   | ADDR_CONFIRM ───────────── routed ───────>   | renew
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod directory;
pub mod error;
pub mod mesh;
pub mod node;

pub use directory::{Directory, DirectoryConfig, DirectoryEntry, DirectoryStats, DEFAULT_ENTRY_TIMEOUT};
pub use error::{DirectoryError, MeshError};
pub use mesh::{Mesh, MeshConfig, UpdateSummary};
pub use node::{Join, JoinAction, JoinTimers, MeshEvent, NodeState};
