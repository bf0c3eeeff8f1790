//! Delivery layer for mesh: begin/write/poll, forwarding, reassembly, and inbox.
//!
//! This crate turns a [`mesh_radio::Radio`] into one node of a tree-routed
//! network. The node is single-threaded and cooperative: the host must call
//! [`Network::poll`] often, because forwarding, reassembly and timeouts only
//! make progress inside that call.
//!
//! ## Data flow
//!
//! ```text
//! write ─> Fragmenter ─> TreeRouter ─> Frame::encode ─> Radio::send_to
//! poll  <─ Reassembler <─ TreeRouter <─ Frame::decode <─ Radio::receive
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod error;
pub mod inbox;
pub mod network;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{NetworkConfig, RetryPolicy};
pub use error::NetworkError;
pub use inbox::{Inbox, Message};
pub use network::{Network, NetworkStats, PollSummary};
