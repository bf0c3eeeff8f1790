//! The transceiver interface the network layer drives.

use bytes::Bytes;
use mesh_wire::PipeAddress;
use serde::{Deserialize, Serialize};

use crate::RadioError;

/// Number of reading pipes on the transceiver
pub const PIPE_COUNT: u8 = 6;

/// Highest usable RF channel
pub const MAX_CHANNEL: u8 = 125;

/// Transmit power level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaLevel {
    /// -18 dBm
    Min,
    /// -12 dBm
    Low,
    /// -6 dBm
    High,
    /// 0 dBm
    Max,
}

/// Air data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRate {
    /// 250 kbps
    #[serde(rename = "250kbps")]
    Kbps250,
    /// 1 Mbps
    #[serde(rename = "1mbps")]
    Mbps1,
    /// 2 Mbps
    #[serde(rename = "2mbps")]
    Mbps2,
}

/// Hardware auto-retransmit settings for a single packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRetry {
    /// Delay between attempts in steps of 250 µs (0..=15)
    pub delay: u8,
    /// Retransmissions after the first attempt (0..=15)
    pub count: u8,
}

impl Default for AutoRetry {
    fn default() -> Self {
        Self {
            delay: 5,
            count: 15,
        }
    }
}

/// Transceiver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// RF channel (0..=125)
    pub channel: u8,
    /// Transmit power
    pub pa_level: PaLevel,
    /// Air data rate
    pub data_rate: DataRate,
    /// Pipe address width in bytes (3..=5)
    pub address_width: u8,
    /// Hardware retry settings
    pub auto_retry: AutoRetry,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            channel: 97,
            pa_level: PaLevel::Max,
            data_rate: DataRate::Mbps1,
            address_width: 5,
            auto_retry: AutoRetry::default(),
        }
    }
}

impl RadioConfig {
    /// Check every field against the transceiver's limits
    pub fn validate(&self) -> Result<(), RadioError> {
        if self.channel > MAX_CHANNEL {
            return Err(RadioError::Config(format!(
                "channel {} exceeds {}",
                self.channel, MAX_CHANNEL
            )));
        }
        if !(3..=5).contains(&self.address_width) {
            return Err(RadioError::Config(format!(
                "address width {} not in 3..=5",
                self.address_width
            )));
        }
        if self.auto_retry.delay > 15 || self.auto_retry.count > 15 {
            return Err(RadioError::Config(format!(
                "auto retry {}/{} exceeds 15",
                self.auto_retry.delay, self.auto_retry.count
            )));
        }
        Ok(())
    }
}

/// A packet taken from the receive FIFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    /// Reading pipe the packet arrived on
    pub pipe: u8,
    /// Raw packet bytes
    pub payload: Bytes,
}

/// Single-channel, half-duplex packet transceiver
///
/// Implementations own the hardware exclusively; callers serialize every send
/// through one instance.
pub trait Radio {
    /// Configure and power up the transceiver
    fn begin(&mut self, config: &RadioConfig) -> Result<(), RadioError>;

    /// Listen for `addr` on reading pipe `pipe` (0..=5)
    fn open_reading_pipe(&mut self, pipe: u8, addr: PipeAddress) -> Result<(), RadioError>;

    /// Enter or leave receive mode
    fn set_listening(&mut self, listening: bool);

    /// Transmit one packet, including the hardware's own retries
    ///
    /// Returns whether the packet was acknowledged. Multicast sends are never
    /// acknowledged and report `true` once transmitted.
    fn send_to(&mut self, addr: PipeAddress, bytes: &[u8], multicast: bool) -> bool;

    /// Whether a packet is waiting in the receive FIFO
    fn available(&mut self) -> bool;

    /// Pop the next received packet
    fn receive(&mut self) -> Option<ReceivedPacket>;

    /// Largest packet the transceiver moves in one transmission
    fn payload_size(&self) -> usize;
}
