//! FIFO mailboxes between simulated processes.
//!
//! A channel is a queue of messages plus a queue of processes parked on it.
//! [`Sender::put`] never suspends: it either hands the message straight to
//! the oldest parked process, which is then scheduled at the current time, or
//! appends it to the queue. Receiving always suspends, even when a message is
//! already waiting, so that a receive never jumps ahead of events already due
//! at the same instant.

use crate::sim::{Process, ProcessId, SimHandle, WaitId, WaitKind, WaitState, Wake, WakeReason};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};
use thiserror::Error as ThisError;

/// How many queued messages a channel accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Capacity {
    #[default]
    Unbounded,
    Bounded(usize),
}

impl From<Option<usize>> for Capacity {
    fn from(limit: Option<usize>) -> Self {
        match limit {
            Some(limit) => Self::Bounded(limit),
            None => Self::Unbounded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ChannelError {
    #[error("Channel is full ({0} messages queued)")]
    Full(usize),
    #[error("The simulation owning this channel has shut down")]
    Closed,
}

/// Creates a channel whose receivers are woken through `sim`.
pub fn channel<T>(sim: &SimHandle, capacity: Capacity) -> (Sender<T>, Receiver<T>) {
    let inner = Rc::new(RefCell::new(Inner {
        queue: VecDeque::new(),
        waiters: VecDeque::new(),
        capacity,
        sim: sim.clone(),
    }));
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

type Slot<T> = Rc<RefCell<Option<T>>>;

struct Waiter<T> {
    process: ProcessId,
    wait: WaitId,
    slot: Slot<T>,
}

struct Inner<T> {
    queue: VecDeque<T>,
    waiters: VecDeque<Waiter<T>>,
    capacity: Capacity,
    sim: SimHandle,
}

impl<T> Inner<T> {
    /// Gives `message` to the oldest parked process, or returns it.
    fn hand_off(&mut self, message: T) -> Result<(), T> {
        let Some(waiter) = self.waiters.pop_front() else {
            return Err(message);
        };
        *waiter.slot.borrow_mut() = Some(message);
        if let Err(err) = self
            .sim
            .schedule_now(waiter.process, waiter.wait, WakeReason::Message)
        {
            tracing::debug!(process = %waiter.process, "could not wake receiver: {}", err);
        }
        Ok(())
    }

    fn has_room(&self) -> bool {
        match self.capacity {
            Capacity::Unbounded => true,
            Capacity::Bounded(limit) => !self.waiters.is_empty() || self.queue.len() < limit,
        }
    }

    /// Returns a message that was handed over but never consumed to the head
    /// of the queue.
    fn requeue_front(&mut self, message: T) {
        if let Err(message) = self.hand_off(message) {
            self.queue.push_front(message);
        }
    }

    fn forget_waiter(&mut self, wait: WaitId) {
        self.waiters.retain(|waiter| waiter.wait != wait);
    }
}

/// The sending half of a channel.
pub struct Sender<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Sender<T> {
    /// Delivers `message` without suspending.
    pub fn put(&self, message: T) -> Result<(), ChannelError> {
        let mut inner = self.inner.borrow_mut();
        if inner.sim.is_shut_down() {
            return Err(ChannelError::Closed);
        }
        let Err(message) = inner.hand_off(message) else {
            return Ok(());
        };
        if !inner.has_room() {
            return Err(ChannelError::Full(inner.queue.len()));
        }
        inner.queue.push_back(message);
        Ok(())
    }

    /// Whether a `put` would currently be accepted.
    pub fn has_room(&self) -> bool {
        self.inner.borrow().has_room()
    }

    pub fn capacity(&self) -> Capacity {
        self.inner.borrow().capacity
    }

    /// The number of messages queued and not yet received.
    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The receiving half of a channel. Clones share the same queue; each
/// message goes to exactly one receiving process.
pub struct Receiver<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Receiver<T> {
    /// Takes the next queued message without suspending.
    pub fn try_get(&self) -> Option<T> {
        self.inner.borrow_mut().queue.pop_front()
    }

    /// Removes and returns every queued message.
    pub fn drain(&self) -> Vec<T> {
        self.inner.borrow_mut().queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of processes parked on this channel.
    pub fn waiting(&self) -> usize {
        self.inner.borrow().waiters.len()
    }
}

/// Future returned by [`Process::receive`].
pub struct Receive<'a, T> {
    process: Process,
    receiver: &'a Receiver<T>,
    state: WaitState,
    slot: Slot<T>,
}

impl<'a, T> Receive<'a, T> {
    pub(crate) fn new(process: Process, receiver: &'a Receiver<T>) -> Self {
        Self {
            process,
            receiver,
            state: WaitState::Idle,
            slot: Rc::new(RefCell::new(None)),
        }
    }

    fn park(&mut self) {
        let id = self.process.id();
        let handle = self.process.handle();
        let wait = match handle.begin_wait(id, WaitKind::ChannelGet) {
            Ok(wait) => wait,
            Err(err) => return handle.fault(id, err),
        };
        self.state = WaitState::Waiting(wait);

        let mut inner = self.receiver.inner.borrow_mut();
        let ready = if inner.waiters.is_empty() {
            inner.queue.pop_front()
        } else {
            None
        };
        match ready {
            Some(message) => {
                *self.slot.borrow_mut() = Some(message);
                if let Err(err) = handle.schedule_now(id, wait, WakeReason::Message) {
                    handle.fault(id, err);
                }
            }
            None => inner.waiters.push_back(Waiter {
                process: id,
                wait,
                slot: self.slot.clone(),
            }),
        }
    }

    /// Detaches from the channel, returning any message handed over but not
    /// yet consumed.
    fn release(&mut self, wait: WaitId) {
        let mut inner = self.receiver.inner.borrow_mut();
        inner.forget_waiter(wait);
        if let Some(message) = self.slot.borrow_mut().take() {
            inner.requeue_front(message);
        }
    }
}

impl<'a, T> Future for Receive<'a, T> {
    type Output = Wake<T>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this.state {
            WaitState::Idle => {
                this.park();
                Poll::Pending
            }
            WaitState::Waiting(wait) => {
                match this.process.handle().take_wake(this.process.id(), wait) {
                    Some(WakeReason::Interrupt(interrupt)) => {
                        this.release(wait);
                        this.state = WaitState::Done;
                        Poll::Ready(Wake::Interrupted(interrupt))
                    }
                    Some(_) => {
                        let message = this.slot.borrow_mut().take();
                        match message {
                            Some(message) => {
                                this.state = WaitState::Done;
                                Poll::Ready(Wake::Ready(message))
                            }
                            None => {
                                // Woken without a message; wait again.
                                this.state = WaitState::Idle;
                                this.park();
                                Poll::Pending
                            }
                        }
                    }
                    None => Poll::Pending,
                }
            }
            WaitState::Done => Poll::Pending,
        }
    }
}

impl<'a, T> Drop for Receive<'a, T> {
    fn drop(&mut self) {
        if let WaitState::Waiting(wait) = self.state {
            self.process.handle().abandon_wait(self.process.id(), wait);
            self.release(wait);
        }
    }
}
