//! The delivery layer: one node's view of the tree network.
//!
//! A [`Network`] owns the radio exclusively and serializes every send through
//! it. Nothing happens in the background: inbound frames are only read,
//! forwarded and reassembled when the host calls [`Network::poll`], so the
//! host must poll frequently or traffic through this node stalls.

use bytes::Bytes;
use mesh_radio::Radio;
use mesh_routing::{DropReason, NextHop, Router, RouterStats, RoutingDecision, TreeRouter};
use mesh_wire::{
    max_frame_payload, multicast_address, Accepted, Fragmenter, Frame, FrameHeader,
    LogicalAddress, MessageType, PipeAddress, Reassembler, WireError, MAX_DEPTH, MULTICAST_PIPE,
    PARENT_LISTEN_PIPE,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::inbox::{Inbox, Message};

/// Counters for one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Messages originated by this node and fully transmitted
    pub messages_sent: u64,
    /// Frames transmitted for locally originated messages
    pub frames_sent: u64,
    /// Software retries spent on locally originated frames
    pub retries: u64,
    /// Packets taken from the radio
    pub frames_received: u64,
    /// Frames relayed for other nodes
    pub frames_forwarded: u64,
    /// Messages placed in the inbox or system queue
    pub messages_delivered: u64,
    /// Frames or writes the router refused
    pub dropped: u64,
    /// Malformed frames discarded
    pub format_errors: u64,
    /// Transmissions that failed after all attempts
    pub forward_failures: u64,
    /// Fragmented messages discarded incomplete
    pub reassembly_timeouts: u64,
    /// Fragmented messages discarded to free a reassembly buffer
    pub reassembly_evictions: u64,
    /// Messages lost because a queue was full
    pub inbox_overflows: u64,
    /// Level multicast polls answered
    pub polls_answered: u64,
}

/// Outcome of one [`Network::poll`]
#[derive(Debug, Default)]
pub struct PollSummary {
    /// Packets read from the radio
    pub received: usize,
    /// Messages completed for this node
    pub delivered: usize,
    /// Frames relayed toward other nodes
    pub forwarded: usize,
    /// Per-frame failures; none of them stop the poll
    pub errors: Vec<NetworkError>,
}

/// One node of the tree network
pub struct Network<R, C = SystemClock> {
    radio: R,
    clock: C,
    config: NetworkConfig,
    router: TreeRouter,
    fragmenter: Fragmenter,
    reassembler: Reassembler,
    inbox: Inbox,
    system: Inbox,
    next_frame_id: u16,
    stats: NetworkStats,
}

impl<R: Radio> Network<R, SystemClock> {
    /// Create a network on the system clock
    pub fn new(radio: R, config: NetworkConfig) -> Self {
        Self::with_clock(radio, SystemClock, config)
    }
}

impl<R: Radio, C: Clock> Network<R, C> {
    /// Create a network driven by `clock`
    pub fn with_clock(radio: R, clock: C, config: NetworkConfig) -> Self {
        let fragmenter = Fragmenter::new(max_frame_payload(radio.payload_size()));
        let reassembler =
            Reassembler::new(config.reassembly_timeout, config.max_reassembly_buffers);
        Self {
            inbox: Inbox::new(config.inbox_capacity),
            system: Inbox::new(config.inbox_capacity),
            radio,
            clock,
            config,
            router: TreeRouter::new(),
            fragmenter,
            reassembler,
            next_frame_id: 1,
            stats: NetworkStats::default(),
        }
    }

    /// Configure the radio and bind `address`
    ///
    /// A radio that fails to initialize is the one fatal condition.
    pub fn begin(&mut self, address: LogicalAddress) -> Result<(), NetworkError> {
        self.radio.begin(&self.config.radio)?;
        self.set_address(address)?;
        info!(
            "Network started at {} (channel {})",
            address, self.config.radio.channel
        );
        Ok(())
    }

    /// Re-bind the node to a new address, reopening every reading pipe
    pub fn set_address(&mut self, address: LogicalAddress) -> Result<(), NetworkError> {
        self.radio.set_listening(false);
        for pipe in 1..=PARENT_LISTEN_PIPE {
            self.radio
                .open_reading_pipe(pipe, address.pipe_address(pipe))?;
        }
        self.radio
            .open_reading_pipe(MULTICAST_PIPE, address.multicast_address())?;
        self.radio.set_listening(true);
        self.router.set_address(Some(address));
        Ok(())
    }

    /// Current address, if bound
    pub fn address(&self) -> Option<LogicalAddress> {
        self.router.local_address()
    }

    /// Whether the node holds a real tree address
    pub fn is_assigned(&self) -> bool {
        matches!(self.address(), Some(addr) if addr != LogicalAddress::UNASSIGNED)
    }

    /// Largest payload `write` accepts
    pub fn max_message_size(&self) -> usize {
        self.config
            .max_message_size
            .min(self.fragmenter.max_message_size())
    }

    /// Largest payload that travels unfragmented
    pub fn max_frame_payload(&self) -> usize {
        self.fragmenter.max_fragment_payload()
    }

    /// Send a message to `to` through the tree
    ///
    /// Payloads above one frame are fragmented and sent in order over the same
    /// hop. The first fragment that cannot be transmitted aborts the rest; the
    /// caller decides whether to retry the whole write.
    pub fn write(
        &mut self,
        to: LogicalAddress,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        self.check_size(payload.len())?;
        let from = self.local_or_no_route(to)?;
        let header = FrameHeader::new(to, from, self.next_id(), msg_type);
        let payload = Bytes::copy_from_slice(payload);

        match self.router.decide(to) {
            RoutingDecision::Local => {
                self.deliver(Message { header, payload });
                self.stats.messages_sent += 1;
                Ok(())
            }
            RoutingDecision::Forward(hop) => self.send_message(hop, header, payload),
            RoutingDecision::Drop(reason) => {
                self.stats.dropped += 1;
                warn!("Write to {} dropped: {}", to, reason);
                Err(NetworkError::NoRoute { to, reason })
            }
        }
    }

    /// Send a message physically to `node`, whatever its destination
    pub fn write_direct(
        &mut self,
        node: LogicalAddress,
        to: LogicalAddress,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        self.check_size(payload.len())?;
        let from = self.local_or_no_route(to)?;
        let hop = self.router.direct(node).ok_or(NetworkError::NoRoute {
            to,
            reason: DropReason::NoRoute,
        })?;
        let header = FrameHeader::new(to, from, self.next_id(), msg_type);
        self.send_message(hop, header, Bytes::copy_from_slice(payload))
    }

    /// Send a message to every node on tree `level`, without acknowledgement
    pub fn multicast(
        &mut self,
        level: u8,
        msg_type: MessageType,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        self.check_size(payload.len())?;
        let to = level_address(level)?;
        let from = self.local_or_no_route(to)?;
        let header = FrameHeader::new(to, from, self.next_id(), msg_type);
        let frames = self
            .fragmenter
            .split(header, Bytes::copy_from_slice(payload))?;
        let address = multicast_address(level);

        for frame in frames {
            let bytes = frame.encode(self.radio.payload_size())?;
            self.radio.set_listening(false);
            self.radio.send_to(address, &bytes, true);
            self.radio.set_listening(true);
            self.stats.frames_sent += 1;
        }
        self.stats.messages_sent += 1;
        debug!("Multicast {:?} to level {}", msg_type, level);
        Ok(())
    }

    /// Drain the radio: forward, reassemble and deliver everything pending
    pub fn poll(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();
        let now = self.clock.now();

        while let Some(packet) = self.radio.receive() {
            summary.received += 1;
            self.stats.frames_received += 1;

            let raw = packet.payload.clone();
            let frame = match Frame::decode(packet.payload) {
                Ok(frame) => frame,
                Err(e) => {
                    self.stats.format_errors += 1;
                    warn!("Dropping malformed frame on pipe {}: {}", packet.pipe, e);
                    summary.errors.push(e.into());
                    continue;
                }
            };

            self.learn_sender(packet.pipe, frame.header.from);

            if packet.pipe == MULTICAST_PIPE {
                self.receive_local(frame, now, true, &mut summary);
                continue;
            }

            match self.router.decide(frame.header.to) {
                RoutingDecision::Local => self.receive_local(frame, now, false, &mut summary),
                RoutingDecision::Forward(hop) => self.forward(hop, frame.header, &raw, &mut summary),
                RoutingDecision::Drop(reason) => {
                    self.stats.dropped += 1;
                    debug!(
                        "Dropping frame {} -> {}: {}",
                        frame.header.from, frame.header.to, reason
                    );
                    summary.errors.push(NetworkError::NoRoute {
                        to: frame.header.to,
                        reason,
                    });
                }
            }
        }

        for key in self.reassembler.take_evicted() {
            self.stats.reassembly_evictions += 1;
            summary.errors.push(NetworkError::ReassemblyEvicted {
                origin: key.origin,
                frame_id: key.frame_id,
            });
        }

        for key in self.reassembler.expire(now) {
            self.stats.reassembly_timeouts += 1;
            summary.errors.push(NetworkError::ReassemblyTimeout {
                origin: key.origin,
                frame_id: key.frame_id,
            });
        }

        summary
    }

    /// Whether an application message is waiting
    pub fn available(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Oldest application message, left in place
    pub fn peek(&self) -> Option<&Message> {
        self.inbox.peek()
    }

    /// Take the oldest application message
    pub fn read(&mut self) -> Option<Message> {
        self.inbox.pop()
    }

    /// Take the oldest system message (types 128 and up)
    pub fn take_system(&mut self) -> Option<Message> {
        self.system.pop()
    }

    /// Counters for this node
    pub fn stats(&self) -> NetworkStats {
        self.stats.clone()
    }

    /// Routing counters for this node
    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// The router, for reachability and known children
    pub fn router(&self) -> &TreeRouter {
        &self.router
    }

    /// The clock driving timeouts
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Active configuration
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// The underlying radio
    pub fn radio(&self) -> &R {
        &self.radio
    }

    fn next_id(&mut self) -> u16 {
        let id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        id
    }

    fn check_size(&self, size: usize) -> Result<(), NetworkError> {
        let max = self.max_message_size();
        if size > max {
            return Err(NetworkError::MessageTooLarge { size, max });
        }
        Ok(())
    }

    fn local_or_no_route(&self, to: LogicalAddress) -> Result<LogicalAddress, NetworkError> {
        self.router.local_address().ok_or(NetworkError::NoRoute {
            to,
            reason: DropReason::NoRoute,
        })
    }

    fn send_message(
        &mut self,
        hop: NextHop,
        header: FrameHeader,
        payload: Bytes,
    ) -> Result<(), NetworkError> {
        let frames = self.fragmenter.split(header, payload)?;
        let count = frames.len();
        let attempts = self.config.retry.attempts;

        for frame in frames {
            let bytes = frame.encode(self.radio.payload_size())?;
            if !self.transmit(hop.address, &bytes, attempts) {
                self.stats.forward_failures += 1;
                warn!(
                    "Send of {}#{} to {} via {} failed",
                    header.from, header.id, header.to, hop
                );
                return Err(NetworkError::ForwardingFailure {
                    next_hop: hop.node,
                    to: header.to,
                });
            }
            self.stats.frames_sent += 1;
        }

        self.stats.messages_sent += 1;
        debug!(
            "Sent {:?} {} -> {} via {} ({} frames)",
            header.msg_type, header.from, header.to, hop.node, count
        );
        Ok(())
    }

    fn transmit(&mut self, address: PipeAddress, bytes: &[u8], retries: u8) -> bool {
        for attempt in 0..=retries {
            if attempt > 0 {
                self.stats.retries += 1;
                self.clock.sleep(self.config.retry.backoff);
            }
            self.radio.set_listening(false);
            let acked = self.radio.send_to(address, bytes, false);
            self.radio.set_listening(true);
            if acked {
                return true;
            }
        }
        false
    }

    fn forward(&mut self, hop: NextHop, header: FrameHeader, raw: &[u8], summary: &mut PollSummary) {
        if self.transmit(hop.address, raw, 0) {
            self.stats.frames_forwarded += 1;
            summary.forwarded += 1;
            debug!("Forwarded {} -> {} via {}", header.from, header.to, hop);
        } else {
            self.stats.forward_failures += 1;
            warn!(
                "Forwarding {} -> {} via {} failed",
                header.from, header.to, hop
            );
            summary.errors.push(NetworkError::ForwardingFailure {
                next_hop: hop.node,
                to: header.to,
            });
        }
    }

    fn receive_local(
        &mut self,
        frame: Frame,
        now: Instant,
        multicast: bool,
        summary: &mut PollSummary,
    ) {
        match self.reassembler.accept(frame, now) {
            Ok(Accepted::Complete(frame)) => {
                let message = Message::from(frame);
                if multicast && message.header.msg_type == MessageType::POLL {
                    self.answer_poll(message.header.from);
                } else if self.deliver(message) {
                    summary.delivered += 1;
                }
            }
            Ok(Accepted::Pending) | Ok(Accepted::Duplicate) => {}
            Err(e) => {
                self.stats.format_errors += 1;
                summary.errors.push(e.into());
            }
        }
    }

    fn answer_poll(&mut self, requester: LogicalAddress) {
        let Some(local) = self.address() else {
            return;
        };
        // Nodes at the bottom of the tree cannot take children
        if !self.config.respond_to_polls || !self.is_assigned() || local.depth() >= MAX_DEPTH {
            return;
        }
        match self.write_direct(requester, requester, MessageType::POLL, &[]) {
            Ok(()) => {
                self.stats.polls_answered += 1;
                debug!("Answered poll from {}", requester);
            }
            Err(e) => debug!("Poll answer to {} failed: {}", requester, e),
        }
    }

    fn deliver(&mut self, message: Message) -> bool {
        let msg_type = message.header.msg_type;
        if msg_type == MessageType::PING {
            self.stats.messages_delivered += 1;
            return true;
        }
        let queue = if msg_type.is_system() {
            &mut self.system
        } else {
            &mut self.inbox
        };
        match queue.push(message) {
            Ok(()) => {
                self.stats.messages_delivered += 1;
                true
            }
            Err(message) => {
                self.stats.inbox_overflows += 1;
                warn!(
                    "Queue full, dropping {:?} from {}",
                    msg_type, message.header.from
                );
                false
            }
        }
    }

    fn learn_sender(&mut self, pipe: u8, from: LogicalAddress) {
        if !(1..=PARENT_LISTEN_PIPE).contains(&pipe) || !self.is_assigned() {
            return;
        }
        let Some(Ok(child)) = self.address().map(|local| local.child(pipe)) else {
            return;
        };
        // Pipe 5 is shared with the parent link; only child 5's subtree counts
        if from == child || from.is_descendant_of(child) {
            self.router.learn_child(child);
        }
    }
}

fn level_address(level: u8) -> Result<LogicalAddress, NetworkError> {
    if level > MAX_DEPTH {
        return Err(WireError::Address(mesh_wire::AddressError::Depth(level)).into());
    }
    let mut address = LogicalAddress::ROOT;
    for _ in 0..level {
        address = address.child(1).map_err(WireError::from)?;
    }
    Ok(address)
}
