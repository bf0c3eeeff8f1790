//! Radio transport interface and in-memory simulated medium for mesh.
//!
//! The network layer talks to the transceiver only through the [`Radio`]
//! trait: configure, open reading pipes, send one packet to a pipe address,
//! and drain the receive FIFO. [`SimMedium`] provides a deterministic
//! implementation for tests and the host simulator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod radio;
pub mod sim;

pub use error::RadioError;
pub use radio::{
    AutoRetry, DataRate, PaLevel, Radio, RadioConfig, ReceivedPacket, MAX_CHANNEL, PIPE_COUNT,
};
pub use sim::{MediumStats, RadioId, SimMedium, SimMediumConfig, SimRadio, SIM_PAYLOAD_SIZE};
