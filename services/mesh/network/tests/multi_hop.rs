//! Multi-hop forwarding across a simulated tree.

use mesh_network::{ManualClock, Network, NetworkConfig, NetworkError};
use mesh_radio::{SimMedium, SimMediumConfig, SimRadio};
use mesh_wire::{LogicalAddress, MessageType};

type Node = Network<SimRadio, ManualClock>;

fn addr(s: &str) -> LogicalAddress {
    s.parse().unwrap()
}

fn build(medium: &SimMedium, clock: &ManualClock, addresses: &[&str]) -> Vec<Node> {
    addresses
        .iter()
        .map(|a| {
            let mut net = Network::with_clock(medium.radio(), clock.clone(), NetworkConfig::default());
            net.begin(addr(a)).unwrap();
            net
        })
        .collect()
}

/// Poll every node until the air is quiet
fn pump(nodes: &mut [Node]) -> Vec<NetworkError> {
    let mut errors = Vec::new();
    loop {
        let mut received = 0;
        for node in nodes.iter_mut() {
            let summary = node.poll();
            received += summary.received;
            errors.extend(summary.errors);
        }
        if received == 0 {
            return errors;
        }
    }
}

#[test]
fn test_three_hops_up_to_root() {
    let medium = SimMedium::new(SimMediumConfig::default());
    let clock = ManualClock::new();
    let mut nodes = build(&medium, &clock, &["0", "01", "011", "0111"]);

    nodes[3]
        .write(LogicalAddress::ROOT, MessageType(b'U'), b"from the leaf")
        .unwrap();
    assert!(pump(&mut nodes).is_empty());

    let message = nodes[0].read().unwrap();
    assert_eq!(message.header.from, addr("0111"));
    assert_eq!(&message.payload[..], b"from the leaf");
    assert_eq!(nodes[1].stats().frames_forwarded, 1);
    assert_eq!(nodes[2].stats().frames_forwarded, 1);
}

#[test]
fn test_fragments_cross_hops_individually() {
    let medium = SimMedium::new(SimMediumConfig::default());
    let clock = ManualClock::new();
    let mut nodes = build(&medium, &clock, &["0", "01", "011"]);

    let payload: Vec<u8> = (0..=255u8).cycle().take(500).collect();
    nodes[0]
        .write(addr("011"), MessageType(b'D'), &payload)
        .unwrap();
    assert!(pump(&mut nodes).is_empty());

    let fragments = (payload.len() + 20) / 21;
    assert_eq!(nodes[1].stats().frames_forwarded, fragments as u64);
    assert!(!nodes[1].available());
    assert_eq!(&nodes[2].read().unwrap().payload[..], &payload[..]);
}

#[test]
fn test_sibling_subtrees_route_through_root() {
    let medium = SimMedium::new(SimMediumConfig::default());
    let clock = ManualClock::new();
    // 021 sits under 01 and 012 under 02
    let mut nodes = build(&medium, &clock, &["0", "01", "02", "021", "012"]);

    nodes[3].write(addr("012"), MessageType(1), b"across").unwrap();
    assert!(pump(&mut nodes).is_empty());

    assert_eq!(&nodes[4].read().unwrap().payload[..], b"across");
    assert_eq!(nodes[0].stats().frames_forwarded, 1);
    assert_eq!(nodes[2].stats().frames_forwarded, 1);
    assert!(nodes[0]
        .router()
        .known_children()
        .any(|child| child == addr("01")));
}

#[test]
fn test_broken_hop_reported_at_forwarder() {
    let medium = SimMedium::new(SimMediumConfig::default());
    let clock = ManualClock::new();
    let mut nodes = build(&medium, &clock, &["0", "01", "011"]);
    medium.set_link(nodes[0].radio().id(), nodes[1].radio().id(), false);

    // The first hop succeeds, so the originator sees success
    nodes[2].write(LogicalAddress::ROOT, MessageType(1), b"x").unwrap();
    let errors = pump(&mut nodes);
    assert_eq!(
        errors,
        vec![NetworkError::ForwardingFailure {
            next_hop: LogicalAddress::ROOT,
            to: LogicalAddress::ROOT
        }]
    );
    assert!(!nodes[0].available());
    assert_eq!(nodes[1].stats().forward_failures, 1);
}
