//! Bounded FIFO of outbound buffers.

use crate::error::SessionError;
use bytes::Bytes;
use std::collections::VecDeque;

/// Outbound buffers waiting for the send loop.
///
/// A capacity of zero means unbounded.
#[derive(Debug, Default)]
pub struct SendQueue {
    items: VecDeque<Bytes>,
    capacity: usize,
}

impl SendQueue {
    /// Create a queue holding at most `capacity` buffers (0 = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append a buffer, failing with [`SessionError::QueueFull`] at capacity.
    /// The queue is unchanged on failure.
    pub fn push(&mut self, data: Bytes) -> Result<(), SessionError> {
        if self.capacity > 0 && self.items.len() >= self.capacity {
            return Err(SessionError::QueueFull);
        }
        self.items.push_back(data);
        Ok(())
    }

    /// Take the oldest buffer
    pub fn pop(&mut self) -> Result<Bytes, SessionError> {
        self.items.pop_front().ok_or(SessionError::QueueEmpty)
    }

    /// Drop every queued buffer, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    /// Number of queued buffers
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity (0 = unbounded)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. Already queued buffers are kept.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }
}
