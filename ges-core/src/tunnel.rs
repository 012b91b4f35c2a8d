//! Many-to-many publish/subscribe links between machines.
//!
//! A [`Tunnel`] keeps one [`channel`](crate::channel) per subscriber.
//! Sending clones the message onto every subscriber channel, so slow
//! consumers never hold up fast ones and each sees every message in order.

use crate::{
    channel::{channel, Capacity, Receiver, Sender},
    sim::SimHandle,
};
use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    fmt::{self, Display},
    rc::Rc,
};
use thiserror::Error as ThisError;

/// The medium a tunnel models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelKind {
    /// Short-range radio between devices.
    Rf,
    /// Wide-area link to the cloud.
    Wan,
}

impl Display for TunnelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rf => write!(f, "RF"),
            Self::Wan => write!(f, "WAN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum TunnelError {
    #[error("{0} tunnel has no subscribers")]
    NoSubscribers(TunnelKind),
    #[error("{kind} subscriber {subscriber} has no room; nothing was delivered")]
    Congested { kind: TunnelKind, subscriber: usize },
    #[error("{0} tunnel belongs to a simulation that has shut down")]
    Closed(TunnelKind),
}

/// Returned from a successful [`Tunnel::send`]. By the time it is returned
/// every subscriber channel holds the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub subscribers: usize,
}

struct Inner<T> {
    kind: TunnelKind,
    capacity: Capacity,
    sim: SimHandle,
    subscribers: RefCell<Vec<Sender<T>>>,
}

/// A broadcast medium. Clones refer to the same tunnel.
pub struct Tunnel<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Tunnel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Tunnel<T> {
    /// Creates a tunnel whose subscriber channels use the simulation's
    /// configured tunnel capacity.
    pub fn new(kind: TunnelKind, sim: &SimHandle) -> Self {
        let capacity = Capacity::from(sim.config().tunnel_capacity);
        Self::with_capacity(kind, sim, capacity)
    }

    pub fn with_capacity(kind: TunnelKind, sim: &SimHandle, capacity: Capacity) -> Self {
        Self {
            inner: Rc::new(Inner {
                kind,
                capacity,
                sim: sim.clone(),
                subscribers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn kind(&self) -> TunnelKind {
        self.inner.kind
    }

    /// Returns a receiver that will see every message sent from now on.
    pub fn subscribe(&self) -> Receiver<T> {
        let (sender, receiver) = channel(&self.inner.sim, self.inner.capacity);
        self.inner.subscribers.borrow_mut().push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    /// Delivers a clone of `message` to every subscriber, or to none of them.
    pub fn send(&self, message: T) -> Result<Delivery, TunnelError> {
        let kind = self.inner.kind;
        let subscribers = self.inner.subscribers.borrow();
        if subscribers.is_empty() {
            return Err(TunnelError::NoSubscribers(kind));
        }
        if self.inner.sim.is_shut_down() {
            return Err(TunnelError::Closed(kind));
        }
        if let Some(subscriber) = subscribers.iter().position(|sender| !sender.has_room()) {
            return Err(TunnelError::Congested { kind, subscriber });
        }

        let (last, rest) = subscribers
            .split_last()
            .ok_or(TunnelError::NoSubscribers(kind))?;
        for sender in rest {
            sender
                .put(message.clone())
                .map_err(|_| TunnelError::Closed(kind))?;
        }
        last.put(message).map_err(|_| TunnelError::Closed(kind))?;

        tracing::trace!(tunnel = %kind, subscribers = subscribers.len(), "delivered");
        Ok(Delivery {
            subscribers: subscribers.len(),
        })
    }
}
