//! Connection handles.
//!
//! A handle is the addressable side of one live transport session: anything
//! holding a clone can push events to that session's writer task.

use rtc_protocol::{ServerEvent, UserId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::trace;

/// Monotonic source of connection ids; never reused within a process.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Receiving half owned by a connection's writer task.
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Process-unique connection identifier (a generation number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw generation number.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Addressable handle to one live connection.
///
/// Cloning is cheap. Two handles are equal only if they refer to the same
/// connection, so a reconnect by the same user yields an unequal handle.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: UserId,
    connected_at: u64,
    sender: mpsc::UnboundedSender<Arc<ServerEvent>>,
}

impl ConnectionHandle {
    /// Create a handle for an authenticated user and the receiver its writer
    /// task drains.
    #[must_use]
    pub fn new(user: UserId) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::next(),
            user,
            connected_at: now_millis(),
            sender,
        };
        (handle, receiver)
    }

    /// The connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The identity that owns this connection.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// When the connection was admitted, in ms since the epoch.
    #[must_use]
    pub fn connected_at(&self) -> u64 {
        self.connected_at
    }

    /// Queue an event for this connection.
    ///
    /// Returns `false` if the connection's writer has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.send_shared(Arc::new(event))
    }

    /// Queue an already shared event, as used by broadcasts.
    pub fn send_shared(&self, event: Arc<ServerEvent>) -> bool {
        trace!(connection = %self.id, user = %self.user, event = event.kind(), "Queue event");
        self.sender.send(event).is_ok()
    }

    /// Check whether the writer side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
