//! A master and its nodes sharing one simulated medium.

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use mesh_directory::{DirectoryStats, Mesh, MeshConfig, MeshError, MeshEvent, NodeState};
use mesh_network::{Clock, NetworkStats};
use mesh_radio::{MediumStats, RadioId, SimMedium, SimRadio};
use mesh_wire::{MessageType, NodeIdentity};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::SimulationConfig;
use crate::{component_debug, component_info, component_warn};

/// Message type of the counter payload
pub const COUNTER_MESSAGE: MessageType = MessageType(1);

struct SimNode<C> {
    mesh: Mesh<SimRadio, C>,
    next_send: Instant,
    counter: u32,
    sent: u64,
    send_failures: u64,
    renewals: u64,
}

/// Per-node section of the final report
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub identity: NodeIdentity,
    pub state: NodeState,
    /// Octal address, if assigned
    pub address: Option<String>,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub renewals: u64,
    pub network: NetworkStats,
}

/// Statistics printed on exit
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Wall time covered, as humantime text
    pub elapsed: String,
    pub rounds: u64,
    pub master: NetworkStats,
    pub directory: DirectoryStats,
    /// Counter messages the master received, by sender identity
    pub received_by_identity: BTreeMap<String, u64>,
    pub medium: MediumStats,
    pub nodes: Vec<NodeReport>,
}

/// Cooperative driver for the whole simulated mesh
pub struct Simulation<C> {
    config: SimulationConfig,
    medium: SimMedium,
    clock: C,
    started: Instant,
    rounds: u64,
    master: Mesh<SimRadio, C>,
    nodes: Vec<SimNode<C>>,
    received: BTreeMap<String, u64>,
}

impl<C: Clock + Clone> Simulation<C> {
    /// Build and start every radio; nodes begin joining immediately
    pub fn new(config: SimulationConfig, clock: C) -> Result<Self> {
        let medium = SimMedium::new(config.medium.clone());

        let mut master_config = MeshConfig::new(NodeIdentity::MASTER);
        master_config.network.radio = config.radio.clone();
        master_config.directory = config.directory;
        let store = config
            .storage
            .open()
            .context("opening directory storage")?;
        let mut master =
            Mesh::with_clock(medium.radio(), clock.clone(), master_config).with_store(store);
        master.begin().context("starting master")?;

        for node_spec in &config.nodes {
            if let Some(address) = node_spec.static_address()? {
                master
                    .set_static_address(node_spec.identity, address)
                    .with_context(|| format!("reserving {} for {}", address, node_spec.identity))?;
            }
        }

        let now = clock.now();
        let mut nodes = Vec::with_capacity(config.nodes.len());
        for node_spec in &config.nodes {
            let mut node_config = MeshConfig::new(node_spec.identity);
            node_config.network.radio = config.radio.clone();
            let mut mesh = Mesh::with_clock(medium.radio(), clock.clone(), node_config);
            mesh.begin()
                .with_context(|| format!("starting node {}", node_spec.identity))?;
            nodes.push(SimNode {
                mesh,
                next_send: now + config.send_interval,
                counter: 0,
                sent: 0,
                send_failures: 0,
                renewals: 0,
            });
        }

        let simulation = Self {
            config,
            medium,
            started: now,
            clock,
            rounds: 0,
            master,
            nodes,
            received: BTreeMap::new(),
        };
        simulation.apply_ranges();
        Ok(simulation)
    }

    /// Cut the links listed in each node's `out_of_range`
    fn apply_ranges(&self) {
        for node_spec in &self.config.nodes {
            let Some(from) = self.radio_of(node_spec.identity) else {
                continue;
            };
            for other in &node_spec.out_of_range {
                if let Some(to) = self.radio_of(*other) {
                    self.medium.set_link(from, to, false);
                    component_debug!("sim", "Link {} <-> {} cut", node_spec.identity, other);
                }
            }
        }
    }

    fn radio_of(&self, identity: NodeIdentity) -> Option<RadioId> {
        if identity.is_master() {
            return Some(self.master.network().radio().id());
        }
        self.nodes
            .iter()
            .find(|node| node.mesh.identity() == identity)
            .map(|node| node.mesh.network().radio().id())
    }

    /// One round: master update and directory service, then every node
    pub fn step(&mut self) {
        self.rounds += 1;

        let summary = self.master.update();
        for error in &summary.network.errors {
            component_debug!("master", "{}", error);
        }
        if let Err(e) = self.master.dhcp() {
            component_warn!("master", "Directory service failed: {}", e);
        }
        while let Some(message) = self.master.read() {
            let sender = self
                .master
                .lookup_identity(message.header.from)
                .ok()
                .flatten()
                .map(|identity| identity.to_string())
                .unwrap_or_else(|| format!("@{}", message.header.from));
            let counter = message
                .payload
                .get(..4)
                .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
                .map(u32::from_le_bytes);
            component_info!(
                "master",
                "Received {:?} from {} ({} bytes, counter {:?})",
                message.header.msg_type,
                sender,
                message.payload.len(),
                counter
            );
            *self.received.entry(sender).or_default() += 1;
        }

        let now = self.clock.now();
        let send_interval = self.config.send_interval;
        let payload_size = self.config.payload_size;
        for node in &mut self.nodes {
            let identity = node.mesh.identity();
            let summary = node.mesh.update();
            for event in summary.events {
                match event {
                    MeshEvent::AddressAssigned(address) => {
                        component_info!("node", "{} joined at {}", identity, address);
                    }
                    MeshEvent::RenewalFailed => {
                        component_warn!("node", "{} could not join, retrying", identity);
                        node.renewals += 1;
                        if let Err(e) = node.mesh.renew_address() {
                            component_warn!("node", "{} renewal failed: {}", identity, e);
                        }
                    }
                    MeshEvent::ConnectivityLost => {
                        component_warn!("node", "{} lost the master, re-joining", identity);
                        node.renewals += 1;
                    }
                    other => component_debug!("node", "{}: {:?}", identity, other),
                }
            }

            if node.mesh.state() != NodeState::Assigned || now < node.next_send {
                continue;
            }
            node.next_send = now + send_interval;
            node.counter = node.counter.wrapping_add(1);

            let payload = counter_payload(node.counter, payload_size);
            match node.mesh.write(NodeIdentity::MASTER, COUNTER_MESSAGE, &payload) {
                Ok(()) => node.sent += 1,
                Err(MeshError::ConnectivityLost) => {
                    node.send_failures += 1;
                    node.renewals += 1;
                    component_warn!("node", "{} lost the master, re-joining", identity);
                }
                Err(e) => {
                    node.send_failures += 1;
                    component_debug!("node", "{} send failed: {}", identity, e);
                }
            }
        }
    }

    /// Number of nodes holding an address
    pub fn assigned(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.mesh.state() == NodeState::Assigned)
            .count()
    }

    /// Pause between rounds
    pub fn tick(&self) -> Duration {
        self.config.tick
    }

    /// Statistics for every radio
    pub fn report(&self) -> SimulationReport {
        let now = self.clock.now();
        SimulationReport {
            elapsed: humantime::format_duration(now.saturating_duration_since(self.started))
                .to_string(),
            rounds: self.rounds,
            master: self.master.network().stats(),
            directory: self
                .master
                .directory()
                .map(|directory| directory.stats(now))
                .unwrap_or_default(),
            received_by_identity: self.received.clone(),
            medium: self.medium.stats(),
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeReport {
                    identity: node.mesh.identity(),
                    state: node.mesh.state(),
                    address: node.mesh.mesh_address().map(|address| address.to_string()),
                    messages_sent: node.sent,
                    send_failures: node.send_failures,
                    renewals: node.renewals,
                    network: node.mesh.network().stats(),
                })
                .collect(),
        }
    }
}

/// Little-endian counter followed by filler up to `size` bytes
fn counter_payload(counter: u32, size: usize) -> Vec<u8> {
    let size = size.max(4);
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u32_le(counter);
    for i in 4..size {
        buf.put_u8(i as u8);
    }
    buf.to_vec()
}
