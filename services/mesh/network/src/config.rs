//! Delivery layer configuration.

use mesh_radio::RadioConfig;
use std::time::Duration;

/// End-to-end retry applied to each transmission of a `write`
///
/// The radio already retries a single packet in hardware. `attempts` adds
/// whole software resends on top of that, `backoff` apart. Forwarding of
/// other nodes' traffic never uses this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failed one
    pub attempts: u8,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::from_millis(2),
        }
    }
}

/// Configuration for a [`crate::Network`]
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    /// Largest payload accepted by `write`
    pub max_message_size: usize,
    /// How long an incomplete fragmented message is kept
    pub reassembly_timeout: Duration,
    /// Concurrent fragmented messages held per node
    pub max_reassembly_buffers: usize,
    /// Completed messages held until the application reads them
    pub inbox_capacity: usize,
    /// Software retry for locally originated transmissions
    pub retry: RetryPolicy,
    /// Answer level multicast polls once an address is assigned
    pub respond_to_polls: bool,
    /// Transceiver settings applied by `begin`
    pub radio: RadioConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1514,
            reassembly_timeout: Duration::from_secs(3),
            max_reassembly_buffers: 8,
            inbox_capacity: 64,
            retry: RetryPolicy::default(),
            respond_to_polls: true,
            radio: RadioConfig::default(),
        }
    }
}
