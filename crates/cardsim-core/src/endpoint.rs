//! Directional message ports.
//!
//! An [`EndPoint`] is created by a component during `initialize` and owned by
//! it. The network only holds clones of the handle to wire peers together.
//! Each endpoint has its own FIFO inbox; sending on an endpoint pushes into
//! the inbox of every peer it was wired to, so order within one connection is
//! preserved.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::message::Message;

/// Allowed data-flow polarity of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Receive only.
    In,
    /// Send only.
    Out,
    /// Send and receive.
    InOut,
}

impl Direction {
    /// Whether an endpoint with this direction may send.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }

    /// Whether an endpoint with this direction may receive.
    pub fn can_receive(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    /// Whether two endpoints with these directions may be connected.
    ///
    /// IN↔OUT and INOUT↔anything connect; IN↔IN and OUT↔OUT do not. The
    /// relation is symmetric.
    pub fn is_compatible_with(self, other: Self) -> bool {
        (self.can_send() && other.can_receive()) || (other.can_send() && self.can_receive())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "IN"),
            Self::Out => write!(f, "OUT"),
            Self::InOut => write!(f, "INOUT"),
        }
    }
}

/// Endpoint usage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// Endpoint has no live peer to deliver to.
    #[error("endpoint '{name}' is not connected")]
    NotConnected {
        /// Endpoint name
        name: String,
    },

    /// Operation not permitted by the endpoint's direction.
    #[error("endpoint '{name}' has direction {direction}, operation not permitted")]
    DirectionViolation {
        /// Endpoint name
        name: String,
        /// Endpoint direction
        direction: Direction,
    },
}

struct Inner {
    name: String,
    direction: Direction,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox_rx: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
    peers: Mutex<Vec<Weak<Inner>>>,
}

/// Named, directional message port.
///
/// Cheap to clone; clones share the same inbox and peer list.
#[derive(Clone)]
pub struct EndPoint {
    inner: Arc<Inner>,
}

impl EndPoint {
    /// Create an unconnected endpoint.
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                direction,
                inbox_tx,
                inbox_rx: AsyncMutex::new(inbox_rx),
                peers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Endpoint name, unique within the owning component.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Endpoint direction.
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Whether at least one live peer is wired to receive from this endpoint.
    pub fn is_connected(&self) -> bool {
        self.peers().iter().any(|peer| peer.strong_count() > 0)
    }

    /// Whether `self` and `other` are the same endpoint.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Send a message to every connected peer.
    ///
    /// # Errors
    ///
    /// - `DirectionViolation` if this is an IN endpoint
    /// - `NotConnected` if no live peer is wired
    pub fn send(&self, message: Message) -> Result<(), EndpointError> {
        if !self.inner.direction.can_send() {
            return Err(self.direction_violation());
        }

        let peers: Vec<Arc<Inner>> = self.peers().iter().filter_map(Weak::upgrade).collect();
        if peers.is_empty() {
            return Err(EndpointError::NotConnected { name: self.inner.name.clone() });
        }

        for peer in peers {
            tracing::trace!(from = %self.inner.name, to = %peer.name, "deliver");
            // Receiver lives in the same Inner as the sender, so send cannot fail.
            let _ = peer.inbox_tx.send(message.clone());
        }
        Ok(())
    }

    /// Wait for the next inbound message.
    ///
    /// # Errors
    ///
    /// `DirectionViolation` if this is an OUT endpoint.
    pub async fn recv(&self) -> Result<Message, EndpointError> {
        if !self.inner.direction.can_receive() {
            return Err(self.direction_violation());
        }

        let mut inbox = self.inner.inbox_rx.lock().await;
        // The inbox sender is owned by `inner`, so the channel never closes
        // while we hold a handle.
        match inbox.recv().await {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }

    /// Next inbound message if one is already queued.
    pub fn try_recv(&self) -> Option<Message> {
        let mut inbox = self.inner.inbox_rx.try_lock().ok()?;
        inbox.try_recv().ok()
    }

    /// Discard every queued inbound message, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.try_recv().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Remove all peers wired from this endpoint.
    pub fn detach_all(&self) {
        self.peers().clear();
    }

    /// Wire `self` and `peer` according to their directions.
    ///
    /// Each side that can send gets the other as a delivery target if the
    /// other can receive. Returns false (and wires nothing) if the directions
    /// are incompatible.
    pub fn link(&self, peer: &Self) -> bool {
        if !self.direction().is_compatible_with(peer.direction()) {
            return false;
        }
        if self.direction().can_send() && peer.direction().can_receive() {
            self.attach(peer);
        }
        if peer.direction().can_send() && self.direction().can_receive() {
            peer.attach(self);
        }
        true
    }

    /// Drop delivery targets pointing at `peer`, in both directions.
    pub fn unlink(&self, peer: &Self) {
        self.peers().retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(&peer.inner)));
        peer.peers().retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(&self.inner)));
    }

    fn attach(&self, peer: &Self) {
        let mut peers = self.peers();
        let target = Arc::as_ptr(&peer.inner);
        if !peers.iter().any(|w| std::ptr::eq(w.as_ptr(), target)) {
            peers.push(Arc::downgrade(&peer.inner));
        }
    }

    fn peers(&self) -> std::sync::MutexGuard<'_, Vec<Weak<Inner>>> {
        self.inner.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn direction_violation(&self) -> EndpointError {
        EndpointError::DirectionViolation {
            name: self.inner.name.clone(),
            direction: self.inner.direction,
        }
    }
}

impl fmt::Debug for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndPoint")
            .field("name", &self.inner.name)
            .field("direction", &self.inner.direction)
            .field("connected", &self.is_connected())
            .finish()
    }
}
