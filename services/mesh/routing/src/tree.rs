//! Tree router: routes derived from address arithmetic alone

use crate::next_hop::NextHop;
use crate::router::{DropReason, Router, RouterStats, RoutingDecision};
use dashmap::DashMap;
use mesh_wire::LogicalAddress;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Router for one node of the tree
///
/// Holds no routing table. The only state besides the local address is the
/// set of direct children this node has heard from.
#[derive(Debug, Default)]
pub struct TreeRouter {
    /// Local address, `None` until bound
    local: Option<LogicalAddress>,
    /// Direct children heard from since the address was bound
    known_children: BTreeSet<LogicalAddress>,
    /// Counters for statistics
    decisions_counter: AtomicU64,
    forwards_counter: AtomicU64,
    local_counter: AtomicU64,
    drops_counter: AtomicU64,
    drop_reasons: DashMap<DropReason, u64>,
}

impl TreeRouter {
    /// Create a router with no address bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router bound to `local`
    pub fn with_address(local: LogicalAddress) -> Self {
        let mut router = Self::new();
        router.set_address(Some(local));
        router
    }

    /// Bind (or unbind) the local address, forgetting known children
    pub fn set_address(&mut self, local: Option<LogicalAddress>) {
        if self.local != local {
            info!(
                "Router address {} -> {}",
                fmt_local(self.local),
                fmt_local(local)
            );
            self.known_children.clear();
        }
        self.local = local;
    }

    /// Record a direct child; returns `true` if it was not known before
    pub fn learn_child(&mut self, child: LogicalAddress) -> bool {
        let Some(local) = self.local else {
            return false;
        };
        if !child.is_direct_child_of(local) {
            return false;
        }
        let added = self.known_children.insert(child);
        if added {
            debug!("Learned child {} of {}", child, local);
        }
        added
    }

    /// Forget a direct child
    pub fn forget_child(&mut self, child: LogicalAddress) -> bool {
        self.known_children.remove(&child)
    }

    /// Direct children heard from, lowest first
    pub fn known_children(&self) -> impl Iterator<Item = LogicalAddress> + '_ {
        self.known_children.iter().copied()
    }

    fn route(&self, dest: LogicalAddress) -> RoutingDecision {
        let Some(local) = self.local else {
            return RoutingDecision::Drop(DropReason::NoRoute);
        };
        if dest == local {
            return RoutingDecision::Local;
        }
        if local == LogicalAddress::UNASSIGNED {
            return RoutingDecision::Drop(DropReason::NoRoute);
        }
        if dest == LogicalAddress::UNASSIGNED {
            return RoutingDecision::Drop(DropReason::InvalidDestination);
        }
        if let Some(child) = local.direct_child_toward(dest) {
            return RoutingDecision::Forward(NextHop::to_child(child));
        }
        match local.parent() {
            Some(parent) => match NextHop::to_parent(parent, local) {
                Ok(hop) => RoutingDecision::Forward(hop),
                Err(_) => RoutingDecision::Drop(DropReason::NoRoute),
            },
            None => RoutingDecision::Drop(DropReason::Undeliverable),
        }
    }

    fn record(&self, decision: &RoutingDecision) {
        self.decisions_counter.fetch_add(1, Ordering::Relaxed);

        match decision {
            RoutingDecision::Forward(_) => {
                self.forwards_counter.fetch_add(1, Ordering::Relaxed);
            }
            RoutingDecision::Local => {
                self.local_counter.fetch_add(1, Ordering::Relaxed);
            }
            RoutingDecision::Drop(reason) => {
                self.drops_counter.fetch_add(1, Ordering::Relaxed);
                *self.drop_reasons.entry(*reason).or_insert(0) += 1;
            }
        }
    }
}

impl Router for TreeRouter {
    fn decide(&self, dest: LogicalAddress) -> RoutingDecision {
        let decision = self.route(dest);
        debug!(
            "Routing decision: local={}, dst={}, decision={:?}",
            fmt_local(self.local),
            dest,
            decision
        );
        self.record(&decision);
        decision
    }

    fn direct(&self, node: LogicalAddress) -> Option<NextHop> {
        self.local.map(|local| NextHop::direct(node, local))
    }

    fn local_address(&self) -> Option<LogicalAddress> {
        self.local
    }

    fn is_reachable(&self, dest: LogicalAddress) -> bool {
        let Some(local) = self.local else {
            return false;
        };
        if dest == local {
            return true;
        }
        if local == LogicalAddress::UNASSIGNED || dest == LogicalAddress::UNASSIGNED {
            return false;
        }
        match local.direct_child_toward(dest) {
            Some(child) => self.known_children.contains(&child),
            None => !local.is_root(),
        }
    }

    fn stats(&self) -> RouterStats {
        let mut stats = RouterStats::new(self.local);
        stats.known_children = self.known_children.len();
        stats.decisions_made = self.decisions_counter.load(Ordering::Relaxed);
        stats.packets_forwarded = self.forwards_counter.load(Ordering::Relaxed);
        stats.packets_local = self.local_counter.load(Ordering::Relaxed);
        stats.packets_dropped = self.drops_counter.load(Ordering::Relaxed);
        stats.drop_reasons = self
            .drop_reasons
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();
        stats
    }
}

fn fmt_local(addr: Option<LogicalAddress>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::next_hop::HopDirection;

    fn addr(s: &str) -> LogicalAddress {
        s.parse().unwrap()
    }

    fn forward(decision: RoutingDecision) -> NextHop {
        match decision {
            RoutingDecision::Forward(hop) => hop,
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn test_local_delivery() {
        let router = TreeRouter::with_address(addr("021"));
        assert_eq!(router.decide(addr("021")), RoutingDecision::Local);
    }

    #[test]
    fn test_forward_down_toward_subtree() {
        let router = TreeRouter::with_address(addr("01"));
        let hop = forward(router.decide(addr("0321")));
        assert_eq!(hop.node, addr("021"));
        assert_eq!(hop.pipe, 5);
        assert_eq!(hop.direction, HopDirection::Down);

        let root = TreeRouter::with_address(LogicalAddress::ROOT);
        assert_eq!(forward(root.decide(addr("0321"))).node, addr("01"));
    }

    #[test]
    fn test_forward_up_otherwise() {
        let router = TreeRouter::with_address(addr("021"));

        let hop = forward(router.decide(LogicalAddress::ROOT));
        assert_eq!(hop.node, addr("01"));
        assert_eq!(hop.pipe, 2);
        assert_eq!(hop.direction, HopDirection::Up);

        // Sibling subtree goes through the parent as well
        assert_eq!(forward(router.decide(addr("031"))).node, addr("01"));
        assert_eq!(forward(router.decide(addr("02"))).node, addr("01"));
    }

    #[test]
    fn test_no_route_without_binding() {
        let router = TreeRouter::new();
        assert_eq!(
            router.decide(LogicalAddress::ROOT),
            RoutingDecision::Drop(DropReason::NoRoute)
        );

        let unassigned = TreeRouter::with_address(LogicalAddress::UNASSIGNED);
        assert_eq!(
            unassigned.decide(LogicalAddress::ROOT),
            RoutingDecision::Drop(DropReason::NoRoute)
        );
        assert_eq!(
            unassigned.decide(LogicalAddress::UNASSIGNED),
            RoutingDecision::Local
        );
    }

    #[test]
    fn test_unassigned_placeholder_is_not_routable() {
        let root = TreeRouter::with_address(LogicalAddress::ROOT);
        assert_eq!(
            root.decide(LogicalAddress::UNASSIGNED),
            RoutingDecision::Drop(DropReason::InvalidDestination)
        );
    }

    #[test]
    fn test_learn_only_direct_children() {
        let mut router = TreeRouter::with_address(addr("01"));
        assert!(router.learn_child(addr("021")));
        assert!(!router.learn_child(addr("021")));
        assert!(!router.learn_child(addr("0321")));
        assert!(!router.learn_child(addr("02")));
        assert_eq!(router.known_children().collect::<Vec<_>>(), vec![addr("021")]);

        router.set_address(Some(addr("02")));
        assert_eq!(router.known_children().count(), 0);
    }

    #[test]
    fn test_reachability() {
        let mut root = TreeRouter::with_address(LogicalAddress::ROOT);
        assert!(root.is_reachable(LogicalAddress::ROOT));
        assert!(!root.is_reachable(addr("021")));
        root.learn_child(addr("01"));
        assert!(root.is_reachable(addr("021")));
        assert!(root.forget_child(addr("01")));
        assert!(!root.is_reachable(addr("01")));

        let leaf = TreeRouter::with_address(addr("021"));
        assert!(leaf.is_reachable(LogicalAddress::ROOT));
        assert!(!TreeRouter::new().is_reachable(LogicalAddress::ROOT));
    }

    #[test]
    fn test_direct_hop_requires_binding() {
        assert!(TreeRouter::new().direct(addr("01")).is_none());
        let router = TreeRouter::with_address(LogicalAddress::UNASSIGNED);
        assert_eq!(router.direct(addr("01")).unwrap().pipe, 5);
    }

    #[test]
    fn test_rebinding_and_logging_unbound_address() {
        assert_eq!(fmt_local(None), "-");
        assert_eq!(fmt_local(Some(addr("021"))), "021");

        let mut router = TreeRouter::new();
        router.set_address(Some(addr("01")));
        router.set_address(None);
        assert_eq!(router.local_address(), None);
        assert_eq!(
            router.decide(addr("01")),
            RoutingDecision::Drop(DropReason::NoRoute)
        );
    }

    #[test]
    fn test_stats_count_decisions() {
        let router = TreeRouter::with_address(addr("01"));
        router.decide(addr("01"));
        router.decide(addr("021"));
        router.decide(LogicalAddress::ROOT);

        let stats = router.stats();
        assert_eq!(stats.decisions_made, 3);
        assert_eq!(stats.packets_local, 1);
        assert_eq!(stats.packets_forwarded, 2);
        assert_eq!(stats.packets_dropped, 0);

        let unbound = TreeRouter::new();
        unbound.decide(addr("01"));
        let stats = unbound.stats();
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.drop_reasons.get("no route to destination"), Some(&1));
    }
}
