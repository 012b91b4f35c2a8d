//! The event queue at the heart of the simulation.
//!
//! Events live in a [`BinaryHeap`] whose ordering is reversed so the heap
//! behaves as a min-heap keyed by `(due, sequence)`. The sequence number is
//! taken from a counter that only grows, so two events due at the same
//! instant are popped in the order they were scheduled.

use super::{ProcessId, SimError, WaitId, WakeReason};
use crate::SimTime;
use std::{cmp::Ordering, collections::BinaryHeap};

/// A scheduled resumption of a process.
#[derive(Debug, Clone)]
pub struct Event {
    /// When the event fires.
    pub due: SimTime,
    /// Tie-breaker among events with the same `due` time.
    pub sequence: u64,
    /// The process to resume.
    pub process: ProcessId,
    /// The wait this event completes. Events whose wait has already been
    /// completed or abandoned are stale and get discarded.
    pub wait: WaitId,
    /// Why the process is being resumed.
    pub reason: WakeReason,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the std max-heap pops the earliest event first.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Owns the simulated clock and the queue of pending events.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: SimTime,
    queue: BinaryHeap<Event>,
    next_sequence: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current simulated time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedules `reason` for `process` after `delay` virtual seconds.
    ///
    /// A delay of zero places the event behind everything already due now.
    pub fn schedule_after(
        &mut self,
        delay: f64,
        process: ProcessId,
        wait: WaitId,
        reason: WakeReason,
    ) -> Result<u64, SimError> {
        let due = self
            .now
            .checked_add(delay)
            .ok_or(SimError::InvalidDelay(delay))?;
        Ok(self.push(due, process, wait, reason))
    }

    /// Schedules `reason` for `process` at the current time.
    pub fn schedule_now(&mut self, process: ProcessId, wait: WaitId, reason: WakeReason) -> u64 {
        self.push(self.now, process, wait, reason)
    }

    fn push(&mut self, due: SimTime, process: ProcessId, wait: WaitId, reason: WakeReason) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push(Event {
            due,
            sequence,
            process,
            wait,
            reason,
        });
        sequence
    }

    /// Removes the earliest event and advances the clock to its due time.
    pub fn pop(&mut self) -> Option<Event> {
        let event = self.queue.pop()?;
        debug_assert!(event.due >= self.now, "event scheduled in the past");
        self.now = self.now.max(event.due);
        Some(event)
    }

    /// The earliest pending event, stale or not.
    pub fn peek(&self) -> Option<&Event> {
        self.queue.peek()
    }

    /// Removes the earliest event without touching the clock.
    pub fn discard(&mut self) -> Option<Event> {
        self.queue.pop()
    }

    /// Moves the clock forward to `time`. Never moves it backwards.
    pub fn advance_to(&mut self, time: SimTime) {
        self.now = self.now.max(time);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
