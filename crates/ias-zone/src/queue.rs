//! StatusQueue: fixed-capacity ring of pending status notifications.
//!
//! Strict FIFO, except when full: the incoming entry overwrites the newest
//! slot in place and the count stays put. The head (the entry being
//! delivered) is never touched by an overwrite.
use serde::Serialize;

use crate::error::ZoneError;
use crate::types::{Endpoint, ZoneStatus};

/// Smallest capacity for which an overwrite can never hit the head.
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// A status change waiting to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub endpoint: Endpoint,
    pub status: ZoneStatus,
    /// Monotonic ms at which the change happened (enqueue time minus the
    /// elapsed time reported by the application).
    pub occurred_at_ms: u64,
}

/// Where an enqueued entry landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotResult {
    /// Appended at the tail; `len` is the new length.
    Appended { len: usize },
    /// Queue was full; `replaced` was overwritten and is gone.
    Overwrote { replaced: QueueEntry },
}

pub struct StatusQueue {
    slots: Box<[Option<QueueEntry>]>,
    head: usize,
    len: usize,
}

impl StatusQueue {
    pub fn new(capacity: usize) -> Result<Self, ZoneError> {
        if capacity < MIN_QUEUE_CAPACITY {
            return Err(ZoneError::invalid(format!(
                "queue capacity must be >= {MIN_QUEUE_CAPACITY}, got {capacity}"
            )));
        }
        Ok(Self {
            slots: vec![None; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        })
    }

    pub fn enqueue(&mut self, entry: QueueEntry) -> SlotResult {
        let capacity = self.capacity();
        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = Some(entry);
            self.len += 1;
            return SlotResult::Appended { len: self.len };
        }

        let newest = (self.head + self.len - 1) % capacity;
        match self.slots[newest].replace(entry) {
            Some(replaced) => SlotResult::Overwrote { replaced },
            // A full ring has every live slot populated.
            None => SlotResult::Appended { len: self.len },
        }
    }

    /// Remove and return the oldest entry.
    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        if self.len == 0 {
            return None;
        }
        let entry = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        entry
    }

    pub fn peek_head(&self) -> Option<&QueueEntry> {
        if self.len == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    /// Discard everything.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> + '_ {
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.iter().copied().collect()
    }
}
