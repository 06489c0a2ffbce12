//! Bookkeeping for frames that expect an acknowledgment.
//!
//! Every non-broadcast frame is answered with `[ACKNOWLEDGEMENT, command]`.
//! The sender remembers `(peer, command)` with a timestamp; an answer clears
//! the oldest matching entry and entries older than [`ACK_TIMEOUT_MS`] are
//! reported as dropped. Nothing is ever resent.

use std::collections::{HashMap, VecDeque};

/// Age after which a pending acknowledgment counts as dropped.
pub const ACK_TIMEOUT_MS: u64 = 3000;

/// Acknowledgment slots on a module.
pub const MODULE_ACK_SLOTS: usize = 12;

/// A frame still waiting for its acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    pub uid: u16,
    pub command: u8,
    pub sent_at: u64,
}

impl PendingAck {
    fn expired(&self, now: u64) -> bool {
        now.saturating_sub(self.sent_at) > ACK_TIMEOUT_MS
    }
}

/// Storage for pending acknowledgments.
pub trait AckBook {
    /// Record a frame sent to `uid` whose command byte is `command`.
    ///
    /// Returns `false` when the entry could not be stored.
    fn await_ack(&mut self, uid: u16, command: u8, now: u64) -> bool;

    /// Clear the oldest entry for `(uid, command)`. Returns whether one existed.
    fn acknowledge(&mut self, uid: u16, command: u8) -> bool;

    /// Remove and return every entry older than the timeout, oldest first.
    fn sweep(&mut self, now: u64) -> Vec<PendingAck>;

    /// Number of entries still waiting.
    fn pending(&self) -> usize;
}

/// Unbounded tracker used by the coordinator.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: HashMap<(u16, u8), VecDeque<u64>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AckBook for AckTracker {
    fn await_ack(&mut self, uid: u16, command: u8, now: u64) -> bool {
        self.pending.entry((uid, command)).or_default().push_back(now);
        true
    }

    fn acknowledge(&mut self, uid: u16, command: u8) -> bool {
        let key = (uid, command);
        let Some(queue) = self.pending.get_mut(&key) else {
            return false;
        };
        let cleared = queue.pop_front().is_some();
        if queue.is_empty() {
            self.pending.remove(&key);
        }
        cleared
    }

    fn sweep(&mut self, now: u64) -> Vec<PendingAck> {
        let mut dropped = Vec::new();
        self.pending.retain(|&(uid, command), queue| {
            // Queues are in send order, so expired entries sit at the front.
            while let Some(&sent_at) = queue.front() {
                let entry = PendingAck {
                    uid,
                    command,
                    sent_at,
                };
                if !entry.expired(now) {
                    break;
                }
                dropped.push(entry);
                queue.pop_front();
            }
            !queue.is_empty()
        });
        dropped.sort_by_key(|entry| entry.sent_at);
        dropped
    }

    fn pending(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }
}

/// Fixed-capacity tracker used on modules.
///
/// Entries live in an arena of `N` slots handed out from a free list.
#[derive(Debug)]
pub struct AckSlots<const N: usize = MODULE_ACK_SLOTS> {
    slots: [PendingAck; N],
    order: [u64; N],
    used: [bool; N],
    free: [usize; N],
    free_len: usize,
    next_order: u64,
}

impl<const N: usize> AckSlots<N> {
    pub fn new() -> Self {
        let mut free = [0; N];
        for (i, slot) in free.iter_mut().enumerate() {
            *slot = N - 1 - i;
        }
        Self {
            slots: [PendingAck {
                uid: 0,
                command: 0,
                sent_at: 0,
            }; N],
            order: [0; N],
            used: [false; N],
            free,
            free_len: N,
            next_order: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    fn release(&mut self, slot: usize) {
        self.used[slot] = false;
        self.free[self.free_len] = slot;
        self.free_len += 1;
    }

    /// Used slots matching `filter`, oldest first.
    fn ordered(&self, filter: impl Fn(&PendingAck) -> bool) -> Vec<usize> {
        let mut slots: Vec<usize> = (0..N)
            .filter(|&i| self.used[i] && filter(&self.slots[i]))
            .collect();
        slots.sort_by_key(|&i| self.order[i]);
        slots
    }
}

impl<const N: usize> Default for AckSlots<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> AckBook for AckSlots<N> {
    fn await_ack(&mut self, uid: u16, command: u8, now: u64) -> bool {
        if self.free_len == 0 {
            return false;
        }
        self.free_len -= 1;
        let slot = self.free[self.free_len];
        self.slots[slot] = PendingAck {
            uid,
            command,
            sent_at: now,
        };
        self.order[slot] = self.next_order;
        self.next_order += 1;
        self.used[slot] = true;
        true
    }

    fn acknowledge(&mut self, uid: u16, command: u8) -> bool {
        let oldest = self
            .ordered(|entry| entry.uid == uid && entry.command == command)
            .first()
            .copied();
        match oldest {
            Some(slot) => {
                self.release(slot);
                true
            }
            None => false,
        }
    }

    fn sweep(&mut self, now: u64) -> Vec<PendingAck> {
        let expired = self.ordered(|entry| entry.expired(now));
        let mut dropped = Vec::with_capacity(expired.len());
        for slot in expired {
            dropped.push(self.slots[slot]);
            self.release(slot);
        }
        dropped
    }

    fn pending(&self) -> usize {
        N - self.free_len
    }
}
