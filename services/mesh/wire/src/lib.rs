//! Tree addressing, radio frame encoding/decoding, and fragmentation for mesh.
//!
//! This crate provides the low-level wire format of the radio mesh: octal tree
//! addresses and their physical pipe mapping, the fixed frame header, single
//! packet frames, fragmentation of larger payloads, and the payloads of the
//! mesh control messages.
//!
//! ## Features
//!
//! - **Tree Addresses**: Validated octal addresses with parent/child arithmetic
//! - **Zero-Copy I/O**: Uses `Bytes`/`BytesMut` for minimal allocations
//! - **Fragmentation**: Automatic splitting and out-of-order reassembly
//! - **Control Payloads**: Fixed layouts for the address assignment protocol
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | Frame Header (11B)   | routing + fragment info    |
//! +----------------------+----------------------------+
//! | payload              | variable (0..21B)          |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod chunk;
pub mod control;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use address::{
    multicast_address, pipe_for_child, LogicalAddress, PipeAddress, MAX_CHILDREN, MAX_DEPTH,
    MULTICAST_PIPE, PARENT_LISTEN_PIPE,
};
pub use chunk::{
    Accepted, Fragmenter, Reassembler, ReassemblyKey, DEFAULT_MAX_BUFFERS,
    DEFAULT_REASSEMBLY_TIMEOUT, MAX_FRAGMENTS,
};
pub use control::{ControlMessage, NodeIdentity};
pub use error::{AddressError, WireError};
pub use frame::{max_frame_payload, Frame, DEFAULT_PACKET_SIZE, MAX_FRAME_PAYLOAD};
pub use header::{Flags, FragmentInfo, FrameHeader, MessageType, HEADER_SIZE};
