//! Next hop definitions and utilities

use mesh_wire::{pipe_for_child, AddressError, LogicalAddress, PipeAddress, PARENT_LISTEN_PIPE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which way a hop moves through the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HopDirection {
    /// Toward the root
    Up,
    /// Toward a descendant
    Down,
    /// Straight to a physical node, ignoring the tree
    Direct,
}

/// A resolved next hop: the neighbour and the pipe it hears us on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NextHop {
    /// Logical address of the neighbour
    pub node: LogicalAddress,
    /// Reading pipe of the neighbour we write into
    pub pipe: u8,
    /// Physical address of that pipe
    pub address: PipeAddress,
    /// Direction of travel
    pub direction: HopDirection,
}

impl NextHop {
    /// Hop down to a direct child, which hears its parent on pipe 5
    pub fn to_child(child: LogicalAddress) -> Self {
        Self {
            node: child,
            pipe: PARENT_LISTEN_PIPE,
            address: child.pipe_address(PARENT_LISTEN_PIPE),
            direction: HopDirection::Down,
        }
    }

    /// Hop up to `parent`, which hears `from` on the pipe named by its leaf digit
    pub fn to_parent(parent: LogicalAddress, from: LogicalAddress) -> Result<Self, AddressError> {
        let digit = from.leaf_digit().ok_or(AddressError::Depth(0))?;
        let pipe = pipe_for_child(digit)?;
        Ok(Self {
            node: parent,
            pipe,
            address: parent.pipe_address(pipe),
            direction: HopDirection::Up,
        })
    }

    /// Physical hop from `from` to `node` regardless of where the frame is headed
    pub fn direct(node: LogicalAddress, from: LogicalAddress) -> Self {
        if from.parent() == Some(node) {
            if let Ok(hop) = Self::to_parent(node, from) {
                return Self {
                    direction: HopDirection::Direct,
                    ..hop
                };
            }
        }
        Self {
            node,
            pipe: PARENT_LISTEN_PIPE,
            address: node.pipe_address(PARENT_LISTEN_PIPE),
            direction: HopDirection::Direct,
        }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pipe {} ({})", self.node, self.pipe, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> LogicalAddress {
        s.parse().unwrap()
    }

    #[test]
    fn test_child_hop() {
        let hop = NextHop::to_child(addr("021"));
        assert_eq!(hop.pipe, 5);
        assert_eq!(hop.address, addr("021").pipe_address(5));
        assert_eq!(hop.direction, HopDirection::Down);
    }

    #[test]
    fn test_parent_hop_uses_leaf_digit() {
        let hop = NextHop::to_parent(addr("01"), addr("021")).unwrap();
        assert_eq!(hop.node, addr("01"));
        assert_eq!(hop.pipe, 2);
        assert_eq!(hop.address, addr("01").pipe_address(2));

        assert!(NextHop::to_parent(LogicalAddress::ROOT, LogicalAddress::ROOT).is_err());
    }

    #[test]
    fn test_direct_hop() {
        // Parent still hears us on our own pipe
        let up = NextHop::direct(addr("01"), addr("031"));
        assert_eq!(up.pipe, 3);
        assert_eq!(up.direction, HopDirection::Direct);

        // Anything else is written on its pipe 5
        let other = NextHop::direct(addr("02"), LogicalAddress::UNASSIGNED);
        assert_eq!(other.pipe, 5);
        assert_eq!(other.address, addr("02").pipe_address(5));
    }

    #[test]
    fn test_display() {
        let hop = NextHop::to_child(addr("01"));
        assert!(hop.to_string().starts_with("01 pipe 5"));
    }
}
