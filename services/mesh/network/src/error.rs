//! Delivery layer errors.

use mesh_radio::RadioError;
use mesh_routing::DropReason;
use mesh_wire::{LogicalAddress, WireError};
use thiserror::Error;

/// Errors surfaced by the delivery layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// No next hop toward the destination
    #[error("no route to {to}: {reason}")]
    NoRoute {
        /// Destination
        to: LogicalAddress,
        /// Why the router refused
        reason: DropReason,
    },

    /// The radio could not deliver to the next hop
    #[error("forwarding to {next_hop} failed (destination {to})")]
    ForwardingFailure {
        /// Neighbour the frame was sent to
        next_hop: LogicalAddress,
        /// Final destination
        to: LogicalAddress,
    },

    /// Malformed frame
    #[error("format error: {0}")]
    Format(#[from] WireError),

    /// Payload larger than the configured maximum
    #[error("message of {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Payload size
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// A fragmented message did not complete in time
    #[error("reassembly of {origin}#{frame_id} timed out")]
    ReassemblyTimeout {
        /// Originating node
        origin: LogicalAddress,
        /// Frame id of the message
        frame_id: u16,
    },

    /// A partial message was discarded to make room for newer ones
    #[error("reassembly of {origin}#{frame_id} evicted, buffers full")]
    ReassemblyEvicted {
        /// Originating node
        origin: LogicalAddress,
        /// Frame id of the message
        frame_id: u16,
    },

    /// Transceiver configuration failed
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),
}

impl NetworkError {
    /// Whether the error concerns a single frame rather than the node itself
    pub fn is_transient(&self) -> bool {
        !matches!(self, NetworkError::Radio(_))
    }
}
