// src/game/schedule.rs
// Deadline queue polled from the server tick. Replaces "wait N seconds then
// do X" timers: each entry carries its deadline and the action to run.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use super::effects::StatusKind;
use super::ObjectId;

/// Deferred work the server runs on tick
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledAction {
    /// Remove an object from the world (after pickup)
    Despawn { object_id: ObjectId },
    /// Revert a timed trap effect
    ExpireStatus { entity_id: String, status: StatusKind },
}

struct Entry<T> {
    deadline: Instant,
    seq: u64,
    action: T,
}

// Min-heap on (deadline, seq); seq keeps equal deadlines FIFO
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

pub struct DeadlineQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> DeadlineQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, deadline: Instant, action: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { deadline, seq, action });
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration, action: T) -> Instant {
        let deadline = now + delay;
        self.schedule(deadline, action);
        deadline
    }

    /// Remove and return every action whose deadline is `<= now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry.action);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for DeadlineQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
