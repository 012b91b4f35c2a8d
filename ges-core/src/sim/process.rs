use super::{SimError, SimHandle};
use crate::{
    channel::{ChannelError, Receive, Receiver},
    machine::{MachineError, PropertyError},
    tunnel::TunnelError,
    SimTime,
};
use std::{
    fmt::{self, Display},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use thiserror::Error as ThisError;

/// Identifies a process for the lifetime of its simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P#{}", self.0)
    }
}

/// A token naming one particular suspension of a process.
///
/// A process holds at most one live token. Resumption events carry the token
/// they were issued for, and an event whose token no longer matches is
/// discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(u64);

impl WaitId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// What a suspended process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Timeout,
    ChannelGet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Scheduled to start or about to be polled.
    Runnable,
    Suspended(WaitKind),
    /// Returned from its body; never resumes again.
    Terminated,
}

/// Carries the cause of an [`interrupt`](SimHandle::interrupt).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    pub cause: String,
}

impl Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interrupted: {}", self.cause)
    }
}

/// Why an event resumes its process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeReason {
    Start,
    Timeout,
    Message,
    Interrupt(Interrupt),
}

/// The outcome of a suspension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake<T> {
    /// The wait completed normally.
    Ready(T),
    /// Another process interrupted the wait before it completed.
    Interrupted(Interrupt),
}

impl<T> Wake<T> {
    /// Get the contained value if the wait completed.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Interrupted(_) => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

/// Returned by a process body. Any error aborts the run with a
/// [`ProcessFailure`](super::ProcessFailure).
#[derive(Debug, ThisError)]
pub enum ProcessError {
    #[error("Simulation error: {0}")]
    Sim(#[from] SimError),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("Machine error: {0}")]
    Machine(#[from] MachineError),
    #[error("Property error: {0}")]
    Property(#[from] PropertyError),
    #[error("{0}")]
    Other(String),
}

/// The context handed to every process body.
///
/// It knows which process it belongs to and exposes the two ways a process
/// can suspend itself: [`timeout`](Process::timeout) and
/// [`receive`](Process::receive).
#[derive(Clone)]
pub struct Process {
    id: ProcessId,
    handle: SimHandle,
}

impl Process {
    pub(crate) fn new(id: ProcessId, handle: SimHandle) -> Self {
        Self { id, handle }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn now(&self) -> SimTime {
        self.handle.now()
    }

    pub fn handle(&self) -> &SimHandle {
        &self.handle
    }

    /// Returns a future that resumes this process `delay` virtual seconds
    /// from when it is first awaited.
    ///
    /// Negative or non-finite delays are rejected here rather than when the
    /// future is awaited.
    pub fn timeout(&self, delay: f64) -> Result<Timeout, SimError> {
        if !delay.is_finite() || delay < 0.0 {
            return Err(SimError::InvalidDelay(delay));
        }
        Ok(Timeout {
            process: self.clone(),
            delay,
            state: WaitState::Idle,
        })
    }

    /// Returns a future that resumes this process with the next message from
    /// `receiver`.
    ///
    /// Even when a message is already queued the process suspends and resumes
    /// at the same virtual time, behind any events already due.
    pub fn receive<'a, T>(&self, receiver: &'a Receiver<T>) -> Receive<'a, T> {
        Receive::new(self.clone(), receiver)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitState {
    Idle,
    Waiting(WaitId),
    Done,
}

/// Future returned by [`Process::timeout`].
pub struct Timeout {
    process: Process,
    delay: f64,
    state: WaitState,
}

impl Future for Timeout {
    type Output = Wake<()>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let id = this.process.id;
        let handle = &this.process.handle;
        match this.state {
            WaitState::Idle => {
                match handle.begin_wait(id, WaitKind::Timeout) {
                    Ok(wait) => match handle.schedule_after(this.delay, id, wait, WakeReason::Timeout) {
                        Ok(()) => this.state = WaitState::Waiting(wait),
                        Err(err) => handle.fault(id, err),
                    },
                    Err(err) => handle.fault(id, err),
                }
                Poll::Pending
            }
            WaitState::Waiting(wait) => match handle.take_wake(id, wait) {
                Some(WakeReason::Interrupt(interrupt)) => {
                    this.state = WaitState::Done;
                    Poll::Ready(Wake::Interrupted(interrupt))
                }
                Some(_) => {
                    this.state = WaitState::Done;
                    Poll::Ready(Wake::Ready(()))
                }
                None => Poll::Pending,
            },
            WaitState::Done => Poll::Ready(Wake::Ready(())),
        }
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        if let WaitState::Waiting(wait) = self.state {
            self.process.handle.abandon_wait(self.process.id, wait);
        }
    }
}
