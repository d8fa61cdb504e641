//! Fixed-slot circular queue between the capture thread and the session loop.
//!
//! Slots are allocated once from a template buffer. `push` copies a filled
//! window into the slot at the write cursor; `pull` copies the oldest slot out
//! and returns it to the pool empty. One producer and one consumer may call
//! in concurrently; cursor updates are serialized by an internal mutex.

use super::buffer::AudioBuffer;
use crate::lock_or_recover;
use clap::ValueEnum;
use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard};

/// What `push` does when every slot is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Overwrite the oldest unread window.
    DropOldest,
    /// Drop the incoming window.
    Reject,
    /// Wait for the consumer; an `interrupt` turns the wait into a reject.
    Block,
}

impl OverflowPolicy {
    pub fn label(self) -> &'static str {
        match self {
            OverflowPolicy::DropOldest => "drop-oldest",
            OverflowPolicy::Reject => "reject",
            OverflowPolicy::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest unread window.
    ReplacedOldest,
    Rejected,
}

impl PushOutcome {
    pub fn is_queued(self) -> bool {
        !matches!(self, PushOutcome::Rejected)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pushed: u64,
    pub pulled: u64,
    pub dropped: u64,
    pub resets: u64,
}

struct QueueState {
    slots: Vec<AudioBuffer>,
    read: usize,
    write: usize,
    len: usize,
    interrupted: bool,
    stats: QueueStats,
}

impl QueueState {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn discard_oldest(&mut self) {
        let read = self.read;
        self.slots[read].resize(0);
        self.read = (read + 1) % self.capacity();
        self.len -= 1;
        self.stats.dropped += 1;
    }
}

pub struct RingBufferQueue {
    state: Mutex<QueueState>,
    space: Condvar,
    policy: OverflowPolicy,
}

impl RingBufferQueue {
    /// Allocate `slots` empty windows shaped like `template` (at least one).
    pub fn new(slots: usize, template: &AudioBuffer, policy: OverflowPolicy) -> Self {
        let slots = (0..slots.max(1)).map(|_| template.empty_like()).collect();
        Self {
            state: Mutex::new(QueueState {
                slots,
                read: 0,
                write: 0,
                len: 0,
                interrupted: false,
                stats: QueueStats::default(),
            }),
            space: Condvar::new(),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock_or_recover(&self.state, "ring buffer queue")
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    /// Copy `buffer` into the next free slot, applying the overflow policy
    /// when the queue is full.
    pub fn push(&self, buffer: &AudioBuffer) -> PushOutcome {
        let mut state = self.lock();
        let mut outcome = PushOutcome::Queued;
        if state.len == state.capacity() {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    state.discard_oldest();
                    outcome = PushOutcome::ReplacedOldest;
                }
                OverflowPolicy::Reject => {
                    state.stats.dropped += 1;
                    return PushOutcome::Rejected;
                }
                OverflowPolicy::Block => {
                    while state.len == state.capacity() && !state.interrupted {
                        state = self
                            .space
                            .wait(state)
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                    }
                    if state.len == state.capacity() {
                        state.stats.dropped += 1;
                        return PushOutcome::Rejected;
                    }
                }
            }
        }
        let write = state.write;
        state.slots[write].copy_from(buffer);
        state.write = (write + 1) % state.capacity();
        state.len += 1;
        state.stats.pushed += 1;
        outcome
    }

    /// Move the oldest window into `out`. Returns `false` without blocking when
    /// the queue is empty. The slot is back in the pool, empty, on return.
    pub fn pull(&self, out: &mut AudioBuffer) -> bool {
        let mut state = self.lock();
        if state.len == 0 {
            return false;
        }
        let read = state.read;
        out.copy_from(&state.slots[read]);
        state.slots[read].resize(0);
        state.read = (read + 1) % state.capacity();
        state.len -= 1;
        state.stats.pulled += 1;
        drop(state);
        self.space.notify_one();
        true
    }

    /// Discard every pending window and rewind both cursors. Storage is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        for slot in state.slots.iter_mut() {
            slot.resize(0);
        }
        state.read = 0;
        state.write = 0;
        state.len = 0;
        state.interrupted = false;
        state.stats.resets += 1;
        drop(state);
        self.space.notify_all();
    }

    /// Wake a producer blocked on a full queue; it rejects its window.
    /// Stays in effect until `resume` or `reset`.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.space.notify_all();
    }

    pub fn resume(&self) {
        self.lock().interrupted = false;
    }
}
