//! Bounded queue of completed messages.

use bytes::Bytes;
use mesh_wire::{Frame, FrameHeader};
use std::collections::VecDeque;

/// A complete (possibly reassembled) message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Header of the message; never carries fragment metadata
    pub header: FrameHeader,
    /// Whole payload
    pub payload: Bytes,
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        Self {
            header: frame.header,
            payload: frame.payload,
        }
    }
}

/// FIFO of messages in completion order
#[derive(Debug)]
pub struct Inbox {
    queue: VecDeque<Message>,
    capacity: usize,
}

impl Inbox {
    /// Create an inbox holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message, handing it back if the inbox is full
    pub fn push(&mut self, message: Message) -> Result<(), Message> {
        if self.queue.len() >= self.capacity {
            return Err(message);
        }
        self.queue.push_back(message);
        Ok(())
    }

    /// Oldest message without removing it
    pub fn peek(&self) -> Option<&Message> {
        self.queue.front()
    }

    /// Remove the oldest message
    pub fn pop(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the inbox is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
