//! Connection lifecycle.
//!
//! Each connection walks `Connecting -> Authenticated -> Active -> Closed`.
//! Entering `Active` registers presence and announces the user online;
//! leaving it deregisters and announces offline. Closing is safe to repeat.

use crate::connection::ConnectionHandle;
use crate::presence::PresenceRegistry;
use crate::store::StatusStore;
use rtc_protocol::{ServerEvent, UserId};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport open, credential not yet checked.
    Connecting,
    /// Credential accepted, presence not yet registered.
    Authenticated,
    /// Registered and exchanging events.
    Active,
    /// Deregistered; terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One authenticated connection and where it is in its lifecycle.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    state: SessionState,
}

impl Session {
    /// Wrap a freshly authenticated connection.
    #[must_use]
    pub fn authenticated(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: SessionState::Authenticated,
        }
    }

    /// The connection handle.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// The authenticated identity.
    #[must_use]
    pub fn user(&self) -> &UserId {
        self.handle.user()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if events may be dispatched for this session.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// Registers and deregisters connections, keeping the durable status flag
/// and every other connection informed.
pub struct LifecycleManager {
    presence: Arc<PresenceRegistry>,
    status: Arc<dyn StatusStore>,
}

impl LifecycleManager {
    /// Create a manager over the shared registry and status store.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>, status: Arc<dyn StatusStore>) -> Self {
        Self { presence, status }
    }

    /// Move an authenticated session to `Active`.
    ///
    /// Registers the connection (replacing any older one for the same user),
    /// writes the durable online flag, and broadcasts `userStatus` online.
    /// A failed flag write is logged; in-memory presence stays authoritative.
    ///
    /// Returns the superseded connection, if any. Calling this on a session
    /// that is not `Authenticated` does nothing.
    pub async fn activate(&self, session: &mut Session) -> Option<ConnectionHandle> {
        if session.state != SessionState::Authenticated {
            warn!(
                user = %session.user(),
                state = %session.state,
                "Activate ignored for session in wrong state"
            );
            return None;
        }

        let user = session.user().clone();
        let superseded = self.presence.register(session.handle.clone());
        session.state = SessionState::Active;

        if let Err(e) = self.status.set_online(&user, true).await {
            warn!(user = %user, error = %e, "Failed to persist online status");
        }

        let reached = self
            .presence
            .broadcast(ServerEvent::user_status(user.clone(), true));
        info!(
            user = %user,
            connection = %session.handle.id(),
            notified = reached,
            "User online"
        );

        superseded
    }

    /// Move a session to `Closed`.
    ///
    /// Only a session that still owns its user's registry entry causes an
    /// offline flag write and broadcast; a superseded connection closes
    /// quietly. If the user reconnects before the offline write completes,
    /// the online flag is written back and no offline broadcast is sent.
    /// Returns `true` if the user went offline.
    pub async fn close(&self, session: &mut Session) -> bool {
        if session.state == SessionState::Closed {
            return false;
        }
        let was_active = session.state == SessionState::Active;
        session.state = SessionState::Closed;

        if !was_active || !self.presence.unregister(&session.handle) {
            debug!(
                user = %session.user(),
                connection = %session.handle.id(),
                "Closed without presence change"
            );
            return false;
        }

        let user = session.user().clone();
        if let Err(e) = self.status.set_online(&user, false).await {
            warn!(user = %user, error = %e, "Failed to persist offline status");
        }

        // A reconnect may have registered while the offline write was in
        // flight; its online write can land before ours.
        if let Some(newer) = self.presence.connection_of(&user) {
            debug!(
                user = %user,
                connection = %session.handle.id(),
                newer = %newer,
                "User reconnected during close"
            );
            if let Err(e) = self.status.set_online(&user, true).await {
                warn!(user = %user, error = %e, "Failed to restore online status");
            }
            return false;
        }

        let reached = self
            .presence
            .broadcast(ServerEvent::user_status(user.clone(), false));
        info!(
            user = %user,
            connection = %session.handle.id(),
            notified = reached,
            "User offline"
        );

        true
    }
}
