//! Fragmentation of payloads larger than one packet.
//!
//! A message that does not fit one frame is split into ordered fragments that
//! share the message's frame id. The receiver keeps one reassembly buffer per
//! `(origin, frame id)` and only releases the message once every fragment is
//! present. Fragments may arrive in any order and duplicates are ignored,
//! including late copies of a message that already completed. Buffers that
//! stay incomplete past the timeout, or that are evicted to make room, are
//! discarded whole and reported.

use crate::address::LogicalAddress;
use crate::frame::Frame;
use crate::header::{FrameHeader, MessageType};
use crate::WireError;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default reassembly timeout
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of messages reassembled concurrently
pub const DEFAULT_MAX_BUFFERS: usize = 8;

/// Most fragments a single message may be split into
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// Splits payloads into frame-sized pieces
#[derive(Debug, Clone)]
pub struct Fragmenter {
    max_fragment_payload: usize,
}

impl Fragmenter {
    /// Create a fragmenter for frames carrying at most `max_fragment_payload` bytes
    pub fn new(max_fragment_payload: usize) -> Self {
        Self {
            max_fragment_payload: max_fragment_payload.max(1),
        }
    }

    /// Largest payload a single frame carries
    pub fn max_fragment_payload(&self) -> usize {
        self.max_fragment_payload
    }

    /// Largest message that can be fragmented
    pub fn max_message_size(&self) -> usize {
        self.max_fragment_payload * MAX_FRAGMENTS
    }

    /// Number of frames needed for a payload of `len` bytes
    pub fn frame_count(&self, len: usize) -> usize {
        if len <= self.max_fragment_payload {
            1
        } else {
            (len + self.max_fragment_payload - 1) / self.max_fragment_payload
        }
    }

    /// Split a payload into frames in ascending fragment order
    ///
    /// Payloads that fit one frame (including empty ones) produce a single
    /// unfragmented frame.
    pub fn split(&self, header: FrameHeader, payload: Bytes) -> Result<Vec<Frame>, WireError> {
        let header = FrameHeader {
            fragment: None,
            ..header
        };
        if payload.len() <= self.max_fragment_payload {
            return Ok(vec![Frame::new(header, payload)]);
        }

        let total = self.frame_count(payload.len());
        if total > MAX_FRAGMENTS {
            return Err(WireError::Size(payload.len()));
        }

        let mut frames = Vec::with_capacity(total);
        let mut offset = 0;
        for fragment_id in 0..total {
            let end = std::cmp::min(offset + self.max_fragment_payload, payload.len());
            frames.push(Frame::new(
                header.as_fragment(fragment_id as u8, total as u8),
                payload.slice(offset..end),
            ));
            offset = end;
        }

        Ok(frames)
    }
}

/// Identifies one in-flight fragmented message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    /// Originating node
    pub origin: LogicalAddress,
    /// Frame id shared by the fragments
    pub frame_id: u16,
}

/// Outcome of feeding one frame to the reassembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// A whole message is available; its header carries no fragment metadata
    Complete(Frame),
    /// Stored; more fragments are needed
    Pending,
    /// Fragment already held, ignored
    Duplicate,
}

#[derive(Debug)]
struct Partial {
    to: LogicalAddress,
    msg_type: MessageType,
    pieces: Vec<Option<Bytes>>,
    received: usize,
    started: Instant,
    seq: u64,
}

/// Collects fragments into complete messages
#[derive(Debug)]
pub struct Reassembler {
    buffers: HashMap<ReassemblyKey, Partial>,
    timeout: Duration,
    max_buffers: usize,
    /// Recently completed messages, kept for one timeout to absorb late copies
    completed: HashMap<ReassemblyKey, Instant>,
    /// Evictions not yet collected by [`Reassembler::take_evicted`]
    pending_evictions: Vec<ReassemblyKey>,
    evicted: u64,
    next_seq: u64,
}

impl Reassembler {
    /// Create a reassembler
    pub fn new(timeout: Duration, max_buffers: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            timeout,
            max_buffers: max_buffers.max(1),
            completed: HashMap::new(),
            pending_evictions: Vec::new(),
            evicted: 0,
            next_seq: 0,
        }
    }

    /// Number of messages currently being reassembled
    pub fn in_flight(&self) -> usize {
        self.buffers.len()
    }

    /// Buffers discarded to make room for newer messages
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Keys of messages evicted since the last call
    pub fn take_evicted(&mut self) -> Vec<ReassemblyKey> {
        std::mem::take(&mut self.pending_evictions)
    }

    /// Feed a received frame
    pub fn accept(&mut self, frame: Frame, now: Instant) -> Result<Accepted, WireError> {
        let info = match frame.header.fragment {
            None => return Ok(Accepted::Complete(frame)),
            Some(info) => info,
        };
        info.validate()?;

        let key = ReassemblyKey {
            origin: frame.header.from,
            frame_id: frame.header.id,
        };
        let total = info.fragments_total as usize;

        if let Some(done) = self.completed.get(&key).copied() {
            if now.saturating_duration_since(done) < self.timeout {
                return Ok(Accepted::Duplicate);
            }
            self.completed.remove(&key);
        }

        if let Some(partial) = self.buffers.get(&key) {
            if partial.pieces.len() != total {
                warn!(
                    "Fragment total mismatch for {}#{} ({} vs {}), dropping fragment",
                    key.origin,
                    key.frame_id,
                    total,
                    partial.pieces.len()
                );
                return Err(WireError::Fragment {
                    id: info.fragment_id,
                    total: info.fragments_total,
                });
            }
        } else {
            if self.buffers.len() >= self.max_buffers {
                self.evict_oldest();
            }
            debug!(
                "Starting reassembly of {}#{} ({} fragments)",
                key.origin, key.frame_id, total
            );
            self.buffers.insert(
                key,
                Partial {
                    to: frame.header.to,
                    msg_type: frame.header.msg_type,
                    pieces: vec![None; total],
                    received: 0,
                    started: now,
                    seq: self.next_seq,
                },
            );
            self.next_seq += 1;
        }

        let Some(partial) = self.buffers.get_mut(&key) else {
            return Ok(Accepted::Pending);
        };
        let slot = &mut partial.pieces[info.fragment_id as usize];
        if slot.is_some() {
            return Ok(Accepted::Duplicate);
        }
        *slot = Some(frame.payload);
        partial.received += 1;

        if partial.received < total {
            return Ok(Accepted::Pending);
        }

        let Some(partial) = self.buffers.remove(&key) else {
            return Ok(Accepted::Pending);
        };
        self.completed.insert(key, now);
        let mut payload = BytesMut::new();
        for piece in partial.pieces.into_iter().flatten() {
            payload.extend_from_slice(&piece);
        }
        debug!(
            "Reassembled {}#{} ({} bytes)",
            key.origin,
            key.frame_id,
            payload.len()
        );

        let header = FrameHeader::new(partial.to, key.origin, key.frame_id, partial.msg_type);
        Ok(Accepted::Complete(Frame::new(header, payload.freeze())))
    }

    /// Discard buffers older than the timeout, returning their keys
    pub fn expire(&mut self, now: Instant) -> Vec<ReassemblyKey> {
        let timeout = self.timeout;
        self.completed
            .retain(|_, done| now.saturating_duration_since(*done) < timeout);
        let expired: Vec<ReassemblyKey> = self
            .buffers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.started) >= timeout)
            .map(|(k, _)| *k)
            .collect();

        for key in &expired {
            if let Some(partial) = self.buffers.remove(key) {
                warn!(
                    "Reassembly timeout for {}#{} ({}/{} fragments received)",
                    key.origin,
                    key.frame_id,
                    partial.received,
                    partial.pieces.len()
                );
            }
        }

        expired
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .buffers
            .iter()
            .min_by_key(|(_, p)| (p.started, p.seq))
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            self.buffers.remove(&key);
            self.pending_evictions.push(key);
            self.evicted += 1;
            warn!(
                "Reassembly buffers full, evicted {}#{}",
                key.origin, key.frame_id
            );
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TIMEOUT, DEFAULT_MAX_BUFFERS)
    }
}
