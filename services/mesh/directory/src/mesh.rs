//! Identity-addressed mesh on top of the tree network.
//!
//! A [`Mesh`] wraps one [`Network`] and gives it a stable identity. Identity
//! [`NodeIdentity::MASTER`] runs at the root and keeps the [`Directory`];
//! every other node joins through a nearby contact, re-announces itself
//! periodically and re-joins when the master stops answering. Like the
//! network below it, nothing runs in the background: the host calls
//! [`Mesh::update`] often and, on the master, [`Mesh::dhcp`] after it.

use mesh_network::{Clock, Message, Network, NetworkConfig, NetworkError, PollSummary, SystemClock};
use mesh_radio::Radio;
use mesh_storage::DirectoryStore;
use mesh_wire::{ControlMessage, FrameHeader, LogicalAddress, MessageType, NodeIdentity};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::directory::{Directory, DirectoryConfig};
use crate::error::MeshError;
use crate::node::{Join, JoinAction, JoinTimers, MeshEvent, NodeState};

/// Configuration for a [`Mesh`]
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// This node's identity; `MASTER` makes it the root
    pub identity: NodeIdentity,
    /// Delivery layer settings
    pub network: NetworkConfig,
    /// Allocation limits (master only)
    pub directory: DirectoryConfig,
    /// Time to collect answers to one level's poll
    pub poll_timeout: Duration,
    /// Time to wait for the master's answer through one contact
    pub request_timeout: Duration,
    /// A join that takes longer fails and leaves the node disconnected
    pub renewal_timeout: Duration,
    /// Interval between address confirmations sent to the master
    pub announce_interval: Duration,
    /// Time to wait for a lookup answer
    pub lookup_timeout: Duration,
    /// Pings sent to the parent before declaring the link lost
    pub connection_attempts: u8,
    /// Contacts remembered per poll
    pub max_contacts: usize,
}

impl MeshConfig {
    /// Defaults for `identity`
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            network: NetworkConfig::default(),
            directory: DirectoryConfig::default(),
            poll_timeout: Duration::from_millis(100),
            request_timeout: Duration::from_millis(250),
            renewal_timeout: Duration::from_millis(7500),
            announce_interval: Duration::from_secs(20),
            lookup_timeout: Duration::from_secs(1),
            connection_attempts: 3,
            max_contacts: 4,
        }
    }

    fn join_timers(&self) -> JoinTimers {
        JoinTimers {
            poll_timeout: self.poll_timeout,
            request_timeout: self.request_timeout,
            renewal_timeout: self.renewal_timeout,
            max_contacts: self.max_contacts.max(1),
        }
    }
}

/// Outcome of one [`Mesh::update`]
#[derive(Debug, Default)]
pub struct UpdateSummary {
    /// What the network poll did
    pub network: PollSummary,
    /// Addressing events, oldest first
    pub events: Vec<MeshEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Address(NodeIdentity),
    Identity(LogicalAddress),
}

struct Master {
    directory: Directory,
    store: Option<Box<dyn DirectoryStore>>,
    requests: VecDeque<(FrameHeader, ControlMessage)>,
}

/// One identity-addressed mesh node
pub struct Mesh<R, C = SystemClock> {
    network: Network<R, C>,
    config: MeshConfig,
    state: NodeState,
    join: Option<Join>,
    last_announce: Option<Instant>,
    addresses: HashMap<NodeIdentity, LogicalAddress>,
    lookups: Vec<(Lookup, Instant)>,
    events: Vec<MeshEvent>,
    master: Option<Master>,
}

impl<R: Radio> Mesh<R, SystemClock> {
    /// Create a mesh node on the system clock
    pub fn new(radio: R, config: MeshConfig) -> Self {
        Self::with_clock(radio, SystemClock, config)
    }
}

impl<R: Radio, C: Clock> Mesh<R, C> {
    /// Create a mesh node driven by `clock`
    pub fn with_clock(radio: R, clock: C, config: MeshConfig) -> Self {
        let master = config.identity.is_master().then(|| Master {
            directory: Directory::new(config.directory),
            store: None,
            requests: VecDeque::new(),
        });
        Self {
            network: Network::with_clock(radio, clock, config.network.clone()),
            config,
            state: NodeState::Disconnected,
            join: None,
            last_announce: None,
            addresses: HashMap::new(),
            lookups: Vec::new(),
            events: Vec::new(),
            master,
        }
    }

    /// Persist the master's directory in `store`; ignored on other nodes
    pub fn with_store(mut self, store: Box<dyn DirectoryStore>) -> Self {
        if let Some(master) = self.master.as_mut() {
            master.store = Some(store);
        }
        self
    }

    /// Start the node
    ///
    /// The master binds the root and restores its directory. Any other node
    /// binds the unassigned placeholder and starts joining; the address
    /// arrives through later [`Mesh::update`] calls.
    pub fn begin(&mut self) -> Result<(), MeshError> {
        let now = self.network.clock().now();
        if let Some(master) = self.master.as_mut() {
            self.network.begin(LogicalAddress::ROOT)?;
            if let Some(store) = master.store.as_ref() {
                let records = store.load()?;
                master.directory.restore(&records, now);
            }
            self.state = NodeState::Assigned;
            info!("Mesh master started");
            return Ok(());
        }

        self.network.begin(LogicalAddress::UNASSIGNED)?;
        self.state = NodeState::Requesting;
        self.start_join(now);
        info!("Mesh node {} started, joining", self.config.identity);
        Ok(())
    }

    /// Drop the current address (if any) and join again
    ///
    /// Does nothing on the master or while a join is already running.
    pub fn renew_address(&mut self) -> Result<(), MeshError> {
        if self.master.is_some() || self.join.is_some() {
            return Ok(());
        }
        self.state = if self.network.is_assigned() {
            NodeState::Renewing
        } else {
            NodeState::Requesting
        };
        self.network.set_address(LogicalAddress::UNASSIGNED)?;
        let now = self.network.clock().now();
        self.start_join(now);
        Ok(())
    }

    /// Poll the network and advance addressing
    pub fn update(&mut self) -> UpdateSummary {
        let network = self.network.poll();
        let now = self.network.clock().now();

        while let Some(message) = self.network.take_system() {
            self.handle_system(message, now);
        }

        if let Some(action) = self.join.as_mut().and_then(|join| join.tick(now)) {
            self.run_join_action(action, now);
        }

        if self.master.is_none() && self.state == NodeState::Assigned {
            self.announce_if_due(now);
        }

        self.expire_lookups(now);

        UpdateSummary {
            network,
            events: std::mem::take(&mut self.events),
        }
    }

    /// Service queued addressing requests (master only)
    ///
    /// Answers address requests, lookups, confirmations and releases received
    /// by [`Mesh::update`], expires silent entries and saves the directory
    /// when it changed. Returns the number of requests handled.
    pub fn dhcp(&mut self) -> Result<usize, MeshError> {
        let now = self.network.clock().now();
        let Some(master) = self.master.as_mut() else {
            return Err(MeshError::NotMaster);
        };
        let network = &mut self.network;

        let mut handled = 0;
        while let Some((header, control)) = master.requests.pop_front() {
            handled += 1;
            match control {
                ControlMessage::RequestAddress { identity, contact } => {
                    let reply = match master.directory.allocate(identity, Some(contact), now) {
                        Ok(address) => ControlMessage::AddressResponse { identity, address },
                        Err(e) => {
                            warn!("Denying {} via {}: {}", identity, contact, e);
                            ControlMessage::AddressDenied { identity }
                        }
                    };
                    // The root answers its own joiners directly
                    let sent = if contact.is_root() {
                        send_direct_to_unassigned(network, &reply)
                    } else {
                        send_control(network, contact, &reply)
                    };
                    if let Err(e) = sent {
                        warn!("Reply to {} via {} failed: {}", identity, contact, e);
                    }
                }
                ControlMessage::AddressConfirm { identity } => {
                    if header.from == LogicalAddress::UNASSIGNED {
                        continue;
                    }
                    if let Err(e) = master.directory.renew(identity, header.from, now) {
                        warn!("Confirmation from {} at {} refused: {}", identity, header.from, e);
                    }
                }
                ControlMessage::AddressRelease { identity } => {
                    master.directory.release(identity);
                }
                ControlMessage::AddressLookup { identity } => {
                    let reply = ControlMessage::LookupReply {
                        identity: Some(identity),
                        address: master.directory.lookup_address(identity, now),
                    };
                    if let Err(e) = send_control(network, header.from, &reply) {
                        debug!("Lookup reply to {} failed: {}", header.from, e);
                    }
                }
                ControlMessage::IdentityLookup { address } => {
                    let reply = ControlMessage::LookupReply {
                        identity: master.directory.lookup_identity(address, now),
                        address: Some(address),
                    };
                    if let Err(e) = send_control(network, header.from, &reply) {
                        debug!("Lookup reply to {} failed: {}", header.from, e);
                    }
                }
                _ => {}
            }
        }

        master.directory.expire(now);

        if master.directory.take_dirty() {
            if let Some(store) = master.store.as_ref() {
                if let Err(e) = store.save(&master.directory.records()) {
                    master.directory.mark_dirty();
                    warn!("Saving directory failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Ok(handled)
    }

    /// Send to the node holding `to`
    ///
    /// An identity not resolved yet triggers a lookup and fails with
    /// [`MeshError::AddressUnknown`]; retry after a few updates. A failed
    /// send on a node checks the link to its parent and, if that is gone
    /// too, drops the address and starts re-joining.
    pub fn write(
        &mut self,
        to: NodeIdentity,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<(), MeshError> {
        if !self.network.is_assigned() {
            return Err(MeshError::NotAssigned);
        }
        let Some(address) = self.lookup_address(to)? else {
            return Err(MeshError::AddressUnknown(to));
        };

        match self.network.write(address, msg_type, payload) {
            Ok(()) => Ok(()),
            Err(e @ (NetworkError::ForwardingFailure { .. } | NetworkError::NoRoute { .. })) => {
                self.addresses.remove(&to);
                if self.master.is_none() && !self.check_connection() {
                    self.lose_connectivity();
                    return Err(MeshError::ConnectivityLost);
                }
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ping the parent; the master is always connected
    pub fn check_connection(&mut self) -> bool {
        if self.master.is_some() {
            return true;
        }
        if !self.network.is_assigned() {
            return false;
        }
        let Some(parent) = self.network.address().and_then(|address| address.parent()) else {
            return false;
        };
        for attempt in 1..=self.config.connection_attempts.max(1) {
            if self.network.write(parent, MessageType::PING, &[]).is_ok() {
                return true;
            }
            debug!("Ping {} to parent {} failed", attempt, parent);
        }
        false
    }

    /// Address of `identity`
    ///
    /// `Ok(None)` on a node means the answer is not cached and a lookup was
    /// sent to the master; the result arrives as
    /// [`MeshEvent::LookupResolved`].
    pub fn lookup_address(
        &mut self,
        identity: NodeIdentity,
    ) -> Result<Option<LogicalAddress>, MeshError> {
        let now = self.network.clock().now();
        if let Some(master) = self.master.as_ref() {
            return Ok(master.directory.lookup_address(identity, now));
        }
        if identity.is_master() {
            return Ok(Some(LogicalAddress::ROOT));
        }
        if let Some(address) = self.addresses.get(&identity) {
            return Ok(Some(*address));
        }
        self.request_lookup(Lookup::Address(identity), now)?;
        Ok(None)
    }

    /// Identity holding `address`; same caching rules as
    /// [`Mesh::lookup_address`]
    pub fn lookup_identity(
        &mut self,
        address: LogicalAddress,
    ) -> Result<Option<NodeIdentity>, MeshError> {
        let now = self.network.clock().now();
        if let Some(master) = self.master.as_ref() {
            return Ok(master.directory.lookup_identity(address, now));
        }
        if address.is_root() {
            return Ok(Some(NodeIdentity::MASTER));
        }
        if let Some((identity, _)) = self.addresses.iter().find(|(_, held)| **held == address) {
            return Ok(Some(*identity));
        }
        self.request_lookup(Lookup::Identity(address), now)?;
        Ok(None)
    }

    /// Give the address back to the master
    ///
    /// Returns `false` when there was nothing to release.
    pub fn release_address(&mut self) -> Result<bool, MeshError> {
        if self.master.is_some() || !self.network.is_assigned() {
            return Ok(false);
        }
        let release = ControlMessage::AddressRelease {
            identity: self.config.identity,
        };
        send_control(&mut self.network, LogicalAddress::ROOT, &release)?;
        self.network.set_address(LogicalAddress::UNASSIGNED)?;
        self.state = NodeState::Disconnected;
        self.join = None;
        self.addresses.clear();
        info!("{} released its address", self.config.identity);
        Ok(true)
    }

    /// Bind `identity` to `address` for good (master only)
    pub fn set_static_address(
        &mut self,
        identity: NodeIdentity,
        address: LogicalAddress,
    ) -> Result<(), MeshError> {
        let now = self.network.clock().now();
        let master = self.master.as_mut().ok_or(MeshError::NotMaster)?;
        master.directory.set_static_address(identity, address, now)?;
        Ok(())
    }

    /// Addressing state
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// This node's identity
    pub fn identity(&self) -> NodeIdentity {
        self.config.identity
    }

    /// Whether this node is the master
    pub fn is_master(&self) -> bool {
        self.master.is_some()
    }

    /// Assigned address, if any
    pub fn mesh_address(&self) -> Option<LogicalAddress> {
        self.network
            .address()
            .filter(|_| self.network.is_assigned())
    }

    /// The master's directory
    pub fn directory(&self) -> Option<&Directory> {
        self.master.as_ref().map(|master| &master.directory)
    }

    /// Whether an application message is waiting
    pub fn available(&self) -> bool {
        self.network.available()
    }

    /// Take the oldest application message
    pub fn read(&mut self) -> Option<Message> {
        self.network.read()
    }

    /// The network below
    pub fn network(&self) -> &Network<R, C> {
        &self.network
    }

    /// The network below, for direct addressing
    pub fn network_mut(&mut self) -> &mut Network<R, C> {
        &mut self.network
    }

    /// Active configuration
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    fn handle_system(&mut self, message: Message, now: Instant) {
        let header = message.header;
        let control = match ControlMessage::decode(header.msg_type, &message.payload) {
            Ok(Some(control)) => control,
            Ok(None) => {
                debug!("Ignoring system message {:?} from {}", header.msg_type, header.from);
                return;
            }
            Err(e) => {
                warn!("Bad control message from {}: {}", header.from, e);
                return;
            }
        };

        if let Some(master) = self.master.as_mut() {
            match control {
                ControlMessage::RequestAddress { .. }
                | ControlMessage::AddressConfirm { .. }
                | ControlMessage::AddressRelease { .. }
                | ControlMessage::AddressLookup { .. }
                | ControlMessage::IdentityLookup { .. } => {
                    master.requests.push_back((header, control));
                }
                other => debug!("Master ignoring {:?} from {}", other, header.from),
            }
            return;
        }

        match control {
            ControlMessage::Poll => {
                if let Some(join) = self.join.as_mut() {
                    join.on_poll_reply(header.from);
                }
            }
            // Answers addressed to us are for a joiner next to us; relayed
            // copies arrive addressed to the placeholder
            ControlMessage::AddressResponse { identity, address } => {
                if header.to != LogicalAddress::UNASSIGNED {
                    self.relay(header.msg_type, &message.payload);
                } else if identity == self.config.identity && self.join.is_some() {
                    self.adopt(address, now);
                }
            }
            ControlMessage::AddressDenied { identity } => {
                if header.to != LogicalAddress::UNASSIGNED {
                    self.relay(header.msg_type, &message.payload);
                } else if identity == self.config.identity {
                    if let Some(join) = self.join.as_mut() {
                        info!("Address request denied via {}", header.from);
                        self.events.push(MeshEvent::AddressDenied {
                            contact: header.from,
                        });
                        let action = join.on_contact_failed(now);
                        self.run_join_action(action, now);
                    }
                }
            }
            ControlMessage::LookupReply { identity, address } => {
                if let (Some(identity), Some(address)) = (identity, address) {
                    self.addresses.insert(identity, address);
                }
                self.lookups.retain(|(lookup, _)| match lookup {
                    Lookup::Address(wanted) => Some(*wanted) != identity,
                    Lookup::Identity(wanted) => Some(*wanted) != address,
                });
                self.events
                    .push(MeshEvent::LookupResolved { identity, address });
            }
            other => debug!("Node ignoring {:?} from {}", other, header.from),
        }
    }

    /// Pass the master's answer on to whoever is joining next to us
    fn relay(&mut self, msg_type: MessageType, payload: &[u8]) {
        match self.network.write_direct(
            LogicalAddress::UNASSIGNED,
            LogicalAddress::UNASSIGNED,
            msg_type,
            payload,
        ) {
            Ok(()) => debug!("Relayed {:?} to joining node", msg_type),
            Err(e) => debug!("Relay of {:?} failed: {}", msg_type, e),
        }
    }

    fn adopt(&mut self, address: LogicalAddress, now: Instant) {
        if let Err(e) = self.network.set_address(address) {
            warn!("Could not bind {}: {}", address, e);
            return;
        }
        self.join = None;
        self.state = NodeState::Assigned;
        self.last_announce = Some(now);
        info!("{} assigned {}", self.config.identity, address);
        self.events.push(MeshEvent::AddressAssigned(address));

        let confirm = ControlMessage::AddressConfirm {
            identity: self.config.identity,
        };
        if let Err(e) = send_control(&mut self.network, LogicalAddress::ROOT, &confirm) {
            debug!("Initial confirmation failed: {}", e);
        }
    }

    fn start_join(&mut self, now: Instant) {
        let (join, action) = Join::start(self.config.join_timers(), now);
        self.join = Some(join);
        self.run_join_action(action, now);
    }

    fn run_join_action(&mut self, mut action: JoinAction, now: Instant) {
        loop {
            match action {
                JoinAction::Poll(level) => {
                    if let Err(e) = self.network.multicast(level, MessageType::POLL, &[]) {
                        debug!("Poll of level {} failed: {}", level, e);
                    }
                    return;
                }
                JoinAction::Request(contact) => {
                    let request = ControlMessage::RequestAddress {
                        identity: self.config.identity,
                        contact,
                    };
                    let encoded = request.encode();
                    match self.network.write_direct(
                        contact,
                        LogicalAddress::ROOT,
                        request.message_type(),
                        &encoded,
                    ) {
                        Ok(()) => {
                            debug!("Requested address via {}", contact);
                            return;
                        }
                        Err(e) => {
                            debug!("Request via {} failed: {}", contact, e);
                            let Some(join) = self.join.as_mut() else {
                                return;
                            };
                            action = join.on_contact_failed(now);
                        }
                    }
                }
                JoinAction::GiveUp => {
                    self.join = None;
                    self.state = NodeState::Disconnected;
                    warn!("{} could not obtain an address", self.config.identity);
                    self.events.push(MeshEvent::RenewalFailed);
                    return;
                }
            }
        }
    }

    fn announce_if_due(&mut self, now: Instant) {
        let due = match self.last_announce {
            Some(last) => now.saturating_duration_since(last) >= self.config.announce_interval,
            None => true,
        };
        if !due {
            return;
        }
        self.last_announce = Some(now);

        let confirm = ControlMessage::AddressConfirm {
            identity: self.config.identity,
        };
        if let Err(e) = send_control(&mut self.network, LogicalAddress::ROOT, &confirm) {
            warn!("Address confirmation failed: {}", e);
            if !self.check_connection() {
                self.lose_connectivity();
            }
        }
    }

    fn lose_connectivity(&mut self) {
        warn!("{} lost its link, re-joining", self.config.identity);
        self.events.push(MeshEvent::ConnectivityLost);
        self.addresses.clear();
        self.state = NodeState::Renewing;
        if let Err(e) = self.network.set_address(LogicalAddress::UNASSIGNED) {
            warn!("Could not unbind address: {}", e);
        }
        let now = self.network.clock().now();
        self.start_join(now);
    }

    fn request_lookup(&mut self, lookup: Lookup, now: Instant) -> Result<(), MeshError> {
        if self.lookups.iter().any(|(pending, _)| *pending == lookup) {
            return Ok(());
        }
        if !self.network.is_assigned() {
            return Err(MeshError::NotAssigned);
        }
        let request = match lookup {
            Lookup::Address(identity) => ControlMessage::AddressLookup { identity },
            Lookup::Identity(address) => ControlMessage::IdentityLookup { address },
        };
        send_control(&mut self.network, LogicalAddress::ROOT, &request)?;
        self.lookups.push((lookup, now));
        Ok(())
    }

    fn expire_lookups(&mut self, now: Instant) {
        let timeout = self.config.lookup_timeout;
        let before = self.lookups.len();
        self.lookups
            .retain(|(_, sent)| now.saturating_duration_since(*sent) < timeout);
        for _ in self.lookups.len()..before {
            self.events.push(MeshEvent::LookupTimedOut);
        }
    }
}

fn send_control<R: Radio, C: Clock>(
    network: &mut Network<R, C>,
    to: LogicalAddress,
    control: &ControlMessage,
) -> Result<(), NetworkError> {
    network.write(to, control.message_type(), &control.encode())
}

fn send_direct_to_unassigned<R: Radio, C: Clock>(
    network: &mut Network<R, C>,
    control: &ControlMessage,
) -> Result<(), NetworkError> {
    network.write_direct(
        LogicalAddress::UNASSIGNED,
        LogicalAddress::UNASSIGNED,
        control.message_type(),
        &control.encode(),
    )
}
