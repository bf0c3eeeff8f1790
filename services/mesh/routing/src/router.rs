//! Router trait and routing decision logic

use crate::next_hop::NextHop;
use mesh_wire::LogicalAddress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Routing decision result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Forward to next hop
    Forward(NextHop),
    /// Deliver locally (we are the destination)
    Local,
    /// Drop packet (no route found, outside the tree, etc.)
    Drop(DropReason),
}

/// Reason for dropping a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Must go up the tree but this node has no parent binding yet
    NoRoute,
    /// Reached the root without resolving downward
    Undeliverable,
    /// Destination is the unassigned placeholder, reachable only directly
    InvalidDestination,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::NoRoute => write!(f, "no route to destination"),
            DropReason::Undeliverable => write!(f, "undeliverable"),
            DropReason::InvalidDestination => write!(f, "invalid destination"),
        }
    }
}

/// Router trait for making routing decisions
pub trait Router {
    /// Make a routing decision for a frame headed to `dest`
    fn decide(&self, dest: LogicalAddress) -> RoutingDecision;

    /// Hop used to reach a physical neighbour directly
    fn direct(&self, node: LogicalAddress) -> Option<NextHop>;

    /// Get the local address, if bound
    fn local_address(&self) -> Option<LogicalAddress>;

    /// Check if a destination is believed reachable
    fn is_reachable(&self, dest: LogicalAddress) -> bool;

    /// Get routing statistics
    fn stats(&self) -> RouterStats;
}

/// Router statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    /// Local address
    pub local_address: Option<LogicalAddress>,
    /// Number of direct children heard from
    pub known_children: usize,
    /// Number of routing decisions made
    pub decisions_made: u64,
    /// Number of packets forwarded
    pub packets_forwarded: u64,
    /// Number of packets delivered locally
    pub packets_local: u64,
    /// Number of packets dropped
    pub packets_dropped: u64,
    /// Breakdown of drop reasons
    pub drop_reasons: HashMap<String, u64>,
}

impl RouterStats {
    /// Create new router statistics
    pub fn new(local_address: Option<LogicalAddress>) -> Self {
        Self {
            local_address,
            known_children: 0,
            decisions_made: 0,
            packets_forwarded: 0,
            packets_local: 0,
            packets_dropped: 0,
            drop_reasons: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::NoRoute.to_string(), "no route to destination");
        assert_eq!(DropReason::Undeliverable.to_string(), "undeliverable");
        assert_eq!(DropReason::InvalidDestination.to_string(), "invalid destination");
    }

    #[test]
    fn test_router_stats() {
        let mut stats = RouterStats::new(Some(LogicalAddress::ROOT));
        assert_eq!(stats.local_address, Some(LogicalAddress::ROOT));
        assert_eq!(stats.decisions_made, 0);

        stats.packets_dropped += 1;
        stats.drop_reasons.insert(DropReason::NoRoute.to_string(), 1);

        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.drop_reasons.get("no route to destination"), Some(&1));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["local_address"], 0);
    }
}
