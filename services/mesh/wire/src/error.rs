//! Wire protocol error types.

use thiserror::Error;

/// Logical address validation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    /// An octal digit outside 1..=5 at the given tree level
    #[error("invalid digit {digit} at level {level}")]
    Digit {
        /// Offending digit
        digit: u8,
        /// 1-based tree level
        level: u8,
    },

    /// Address deeper than the supported tree depth
    #[error("address depth {0} exceeds maximum")]
    Depth(u8),

    /// Textual address could not be parsed as octal
    #[error("malformed octal address")]
    Syntax,
}

/// Wire protocol errors
///
/// Every decode failure belongs to the format error category: the frame is
/// dropped and processing continues with the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the fixed header
    #[error("incomplete frame: {0} bytes")]
    Incomplete(usize),

    /// Declared payload length disagrees with the buffer
    #[error("payload length {declared} does not match {actual} remaining bytes")]
    Length {
        /// Length carried in the header
        declared: usize,
        /// Bytes actually present after the header
        actual: usize,
    },

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Destination or origin is not a valid tree address
    #[error("bad address: {0}")]
    Address(#[from] AddressError),

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Fragment metadata is inconsistent
    #[error("inconsistent fragment metadata ({id}/{total})")]
    Fragment {
        /// Fragment index
        id: u8,
        /// Declared fragment count
        total: u8,
    },

    /// Malformed control payload
    #[error("malformed control payload")]
    Malformed,
}
