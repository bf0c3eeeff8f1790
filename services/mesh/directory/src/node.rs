//! Node-side addressing state and the join state machine.
//!
//! Joining is a sequence of timed phases driven from [`crate::Mesh::update`]:
//! multicast a poll on one level at a time, collect the contacts that answer,
//! then ask the master for an address through each contact in turn. The
//! machine itself never touches the network; it tells the caller what to send
//! next.

use mesh_wire::{LogicalAddress, MAX_DEPTH};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Addressing state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// No address and not looking for one
    Disconnected,
    /// First join in progress
    Requesting,
    /// Holding an address
    Assigned,
    /// Re-joining after losing or giving up an address
    Renewing,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Disconnected => "disconnected",
            NodeState::Requesting => "requesting",
            NodeState::Assigned => "assigned",
            NodeState::Renewing => "renewing",
        };
        f.write_str(name)
    }
}

/// Things that happened during one [`crate::Mesh::update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// The node adopted an address
    AddressAssigned(LogicalAddress),
    /// A contact relayed a refusal
    AddressDenied {
        /// Contact that relayed it
        contact: LogicalAddress,
    },
    /// The join deadline passed without an address
    RenewalFailed,
    /// The master stopped answering; the node dropped its address to re-join
    ConnectivityLost,
    /// A lookup answer arrived
    LookupResolved {
        /// Identity side, if known
        identity: Option<mesh_wire::NodeIdentity>,
        /// Address side, if known
        address: Option<LogicalAddress>,
    },
    /// A lookup went unanswered
    LookupTimedOut,
}

/// Timing for the join state machine
#[derive(Debug, Clone, Copy)]
pub struct JoinTimers {
    /// How long to collect answers to one level's poll
    pub poll_timeout: Duration,
    /// How long to wait for the master's answer through one contact
    pub request_timeout: Duration,
    /// Give up the whole join after this long
    pub renewal_timeout: Duration,
    /// Contacts remembered per poll
    pub max_contacts: usize,
}

/// What the caller should send next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAction {
    /// Multicast a poll on this level
    Poll(u8),
    /// Ask for an address through this contact
    Request(LogicalAddress),
    /// The join deadline passed
    GiveUp,
}

#[derive(Debug, Clone)]
enum Phase {
    Polling {
        level: u8,
        sent_at: Instant,
        contacts: Vec<LogicalAddress>,
    },
    Requesting {
        contacts: Vec<LogicalAddress>,
        index: usize,
        sent_at: Instant,
    },
}

/// One join attempt
#[derive(Debug, Clone)]
pub struct Join {
    timers: JoinTimers,
    started: Instant,
    phase: Phase,
}

impl Join {
    /// Start joining; the first action is always a poll of level 0
    pub fn start(timers: JoinTimers, now: Instant) -> (Self, JoinAction) {
        let join = Self {
            timers,
            started: now,
            phase: Phase::Polling {
                level: 0,
                sent_at: now,
                contacts: Vec::new(),
            },
        };
        (join, JoinAction::Poll(0))
    }

    /// When the attempt started
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Contact currently asked, if any
    pub fn current_contact(&self) -> Option<LogicalAddress> {
        match &self.phase {
            Phase::Requesting {
                contacts, index, ..
            } => contacts.get(*index).copied(),
            Phase::Polling { .. } => None,
        }
    }

    /// Record a node that answered the poll
    pub fn on_poll_reply(&mut self, contact: LogicalAddress) {
        if let Phase::Polling { contacts, .. } = &mut self.phase {
            if contacts.len() < self.timers.max_contacts && !contacts.contains(&contact) {
                debug!("Contact {} answered poll", contact);
                contacts.push(contact);
            }
        }
    }

    /// The current contact refused or could not be reached
    pub fn on_contact_failed(&mut self, now: Instant) -> JoinAction {
        if now.saturating_duration_since(self.started) >= self.timers.renewal_timeout {
            return JoinAction::GiveUp;
        }
        self.next_contact(now)
    }

    /// Advance on timeouts; `None` means keep waiting
    pub fn tick(&mut self, now: Instant) -> Option<JoinAction> {
        if now.saturating_duration_since(self.started) >= self.timers.renewal_timeout {
            return Some(JoinAction::GiveUp);
        }

        match &mut self.phase {
            Phase::Polling {
                level,
                sent_at,
                contacts,
            } => {
                if now.saturating_duration_since(*sent_at) < self.timers.poll_timeout {
                    return None;
                }
                if contacts.is_empty() {
                    // Nodes on the deepest level never answer
                    let next = if *level + 1 >= MAX_DEPTH { 0 } else { *level + 1 };
                    *level = next;
                    *sent_at = now;
                    return Some(JoinAction::Poll(next));
                }
                let mut found = std::mem::take(contacts);
                found.sort();
                let first = found[0];
                self.phase = Phase::Requesting {
                    contacts: found,
                    index: 0,
                    sent_at: now,
                };
                Some(JoinAction::Request(first))
            }
            Phase::Requesting { sent_at, .. } => {
                if now.saturating_duration_since(*sent_at) < self.timers.request_timeout {
                    return None;
                }
                Some(self.next_contact(now))
            }
        }
    }

    fn next_contact(&mut self, now: Instant) -> JoinAction {
        if let Phase::Requesting {
            contacts,
            index,
            sent_at,
        } = &mut self.phase
        {
            *index += 1;
            if let Some(contact) = contacts.get(*index).copied() {
                *sent_at = now;
                return JoinAction::Request(contact);
            }
        }
        self.phase = Phase::Polling {
            level: 0,
            sent_at: now,
            contacts: Vec::new(),
        };
        JoinAction::Poll(0)
    }
}
