//! Tree routing decisions, next-hop pipe resolution, and known children for mesh.
//!
//! Routes are never stored: a frame for this node is delivered locally, a
//! frame for a descendant goes down to the child whose subtree holds it, and
//! everything else goes up to the parent. The root drops what it cannot
//! resolve downward.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod next_hop;
pub mod router;
pub mod tree;

pub use next_hop::*;
pub use router::*;
pub use tree::*;
