//! Radio transport errors.

use thiserror::Error;

/// Errors raised while configuring a radio
///
/// Single-packet send failures are not errors; they are reported as `false`
/// from [`crate::Radio::send_to`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// Operation requires a successful `begin` first
    #[error("radio not initialized")]
    NotInitialized,

    /// Configuration value out of range
    #[error("invalid radio configuration: {0}")]
    Config(String),

    /// Reading pipe index out of range
    #[error("invalid pipe {0}")]
    Pipe(u8),

    /// Transceiver did not respond
    #[error("hardware failure: {0}")]
    Hardware(String),
}
