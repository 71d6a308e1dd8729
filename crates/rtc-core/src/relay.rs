//! The relay service.
//!
//! [`Relay`] owns one presence registry and wires it into the authenticator,
//! message router, typing notifier, call relay and lifecycle manager. It is
//! built once at startup and shared by every connection task.

use crate::auth::Authenticator;
use crate::connection::{ConnectionHandle, EventReceiver};
use crate::error::RelayError;
use crate::lifecycle::{LifecycleManager, Session, SessionState};
use crate::presence::PresenceRegistry;
use crate::router::{MessageRouter, RouterConfig};
use crate::signaling::CallRelay;
use crate::store::{MessageStore, StatusStore, StoredMessage, UserDirectory};
use crate::typing::TypingNotifier;
use rtc_protocol::{Connected, ServerEvent, UserId, PROTOCOL_VERSION};
use std::sync::Arc;
use tracing::{debug, warn};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Message routing limits.
    pub router: RouterConfig,
    /// Heartbeat interval advertised in `connected`, in milliseconds.
    pub heartbeat_ms: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            heartbeat_ms: 30_000,
        }
    }
}

/// Collaborators the relay depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub messages: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserDirectory>,
    pub status: Arc<dyn StatusStore>,
}

/// Presence and signaling relay.
pub struct Relay {
    pub(crate) auth: Authenticator,
    pub(crate) presence: Arc<PresenceRegistry>,
    pub(crate) router: MessageRouter,
    pub(crate) typing: TypingNotifier,
    pub(crate) calls: CallRelay,
    pub(crate) lifecycle: LifecycleManager,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    config: RelayConfig,
}

impl Relay {
    /// Build a relay with a fresh, empty presence registry.
    #[must_use]
    pub fn new(auth: Authenticator, collaborators: Collaborators, config: RelayConfig) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let Collaborators {
            messages,
            users,
            status,
        } = collaborators;

        Self {
            auth,
            router: MessageRouter::new(
                Arc::clone(&presence),
                Arc::clone(&messages),
                Arc::clone(&users),
                config.router.clone(),
            ),
            typing: TypingNotifier::new(Arc::clone(&presence)),
            calls: CallRelay::new(Arc::clone(&presence)),
            lifecycle: LifecycleManager::new(Arc::clone(&presence), status),
            presence,
            messages,
            users,
            config,
        }
    }

    /// The shared presence registry.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// The message store, for history queries.
    #[must_use]
    pub fn messages(&self) -> &Arc<dyn MessageStore> {
        &self.messages
    }

    /// The user directory.
    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    /// The session authenticator.
    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Check a connection's credential (`Connecting -> Authenticated`).
    ///
    /// On success returns the session and the receiver its writer task must
    /// drain. Nothing is registered yet.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Authentication`] if the credential is missing
    /// or invalid; the connection must then be refused.
    pub fn authenticate(&self, token: Option<&str>) -> Result<(Session, EventReceiver), RelayError> {
        let user = self.auth.verify(token).map_err(|e| {
            warn!(error = %e, "Connection refused");
            RelayError::Authentication(e)
        })?;

        let (handle, receiver) = ConnectionHandle::new(user);
        debug!(
            user = %handle.user(),
            connection = %handle.id(),
            from = %SessionState::Connecting,
            to = %SessionState::Authenticated,
            "Session transition"
        );
        Ok((Session::authenticated(handle), receiver))
    }

    /// Admit an authenticated session (`Authenticated -> Active`).
    ///
    /// Queues `connected` on the session's own connection, then registers
    /// presence and broadcasts the user online. Returns the superseded
    /// connection, if the user was already connected elsewhere.
    pub async fn open(&self, session: &mut Session) -> Option<ConnectionHandle> {
        if session.state() == SessionState::Authenticated {
            session.handle().send(ServerEvent::Connected(Connected {
                user_id: session.user().clone(),
                version: PROTOCOL_VERSION.major,
                heartbeat: self.config.heartbeat_ms,
            }));
        }
        self.lifecycle.activate(session).await
    }

    /// Persist a message outside any live session. Nobody is notified; the
    /// recipient sees it in history.
    ///
    /// # Errors
    ///
    /// Same as [`MessageRouter::store`].
    pub async fn post_message(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<StoredMessage, RelayError> {
        self.router.store(sender, recipient, content).await
    }

    /// Tear a session down (`-> Closed`). Safe to call more than once.
    ///
    /// Returns `true` if this close took the user offline.
    pub async fn close(&self, session: &mut Session) -> bool {
        self.lifecycle.close(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryMessageStore, MemoryUserDirectory};
    use rtc_protocol::{ClientEvent, MessageId};
    use std::time::Duration;

    const SECRET: &[u8] = b"relay-test-secret";

    fn relay() -> Relay {
        let directory = Arc::new(MemoryUserDirectory::new());
        Relay::new(
            Authenticator::new(SECRET),
            Collaborators {
                messages: Arc::new(MemoryMessageStore::new()),
                users: directory.clone(),
                status: directory,
            },
            RelayConfig::default(),
        )
    }

    async fn connect(relay: &Relay, id: &str) -> (Session, EventReceiver) {
        let token = relay
            .authenticator()
            .issue(&UserId::new(id), Duration::from_secs(60))
            .unwrap();
        let (mut session, mut rx) = relay.authenticate(Some(&token)).unwrap();
        relay.open(&mut session).await;
        // Drain connected + own online broadcast.
        while rx.try_recv().is_ok() {}
        (session, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    #[tokio::test]
    async fn test_refuses_bad_credentials() {
        let relay = relay();
        assert!(matches!(
            relay.authenticate(None),
            Err(RelayError::Authentication(_))
        ));
        assert!(matches!(
            relay.authenticate(Some("not.a.jwt")),
            Err(RelayError::Authentication(_))
        ));
        assert!(relay.presence().is_empty());
    }

    #[tokio::test]
    async fn test_open_sends_connected_first() {
        let relay = relay();
        let token = relay
            .authenticator()
            .issue(&UserId::new("u1"), Duration::from_secs(60))
            .unwrap();
        let (mut session, mut rx) = relay.authenticate(Some(&token)).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);

        relay.open(&mut session).await;
        let events = drain(&mut rx);
        assert!(matches!(&events[0], ServerEvent::Connected(c) if c.user_id == UserId::new("u1")));
        assert_eq!(events[1], ServerEvent::user_status(UserId::new("u1"), true));
    }

    #[tokio::test]
    async fn test_message_and_read_receipt_scenario() {
        let relay = relay();
        let (u1, mut u1_rx) = connect(&relay, "u1").await;
        let (u2, mut u2_rx) = connect(&relay, "u2").await;
        drain(&mut u1_rx);

        relay
            .dispatch(&u1, ClientEvent::private_message(UserId::new("u2"), "hi"))
            .await
            .unwrap();

        let delivered = drain(&mut u2_rx);
        assert_eq!(delivered.len(), 1);
        let ServerEvent::NewMessage(received) = &delivered[0] else {
            panic!("Expected NewMessage, got {:?}", delivered[0]);
        };
        assert_eq!(received.content, "hi");
        assert!(!received.read);

        let confirmed = drain(&mut u1_rx);
        assert_eq!(confirmed.len(), 1);
        let ServerEvent::MessageSent(sent) = &confirmed[0] else {
            panic!("Expected MessageSent, got {:?}", confirmed[0]);
        };
        assert_eq!(sent.id, received.id);

        relay
            .dispatch(&u2, ClientEvent::message_read(received.id.clone()))
            .await
            .unwrap();
        assert_eq!(
            drain(&mut u1_rx),
            vec![ServerEvent::MessageReadUpdate(rtc_protocol::ReadReceipt {
                message_id: received.id.clone(),
            })]
        );
    }

    #[tokio::test]
    async fn test_delivery_follows_persistence_order() {
        let relay = relay();
        let (u1, _u1_rx) = connect(&relay, "u1").await;
        let (_u2, mut u2_rx) = connect(&relay, "u2").await;

        for n in 0..5 {
            relay
                .dispatch(
                    &u1,
                    ClientEvent::private_message(UserId::new("u2"), format!("msg {}", n)),
                )
                .await
                .unwrap();
        }

        let delivered: Vec<_> = drain(&mut u2_rx)
            .into_iter()
            .map(|event| match event {
                ServerEvent::NewMessage(m) => (m.id, m.content),
                other => panic!("Expected NewMessage, got {:?}", other),
            })
            .collect();

        let stored: Vec<_> = relay
            .messages()
            .find_by_pair(&UserId::new("u1"), &UserId::new("u2"))
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.id, m.content))
            .collect();

        assert_eq!(delivered.len(), 5);
        assert_eq!(delivered, stored);
        assert_eq!(delivered[4].1, "msg 4");
    }

    #[tokio::test]
    async fn test_offline_recipient_gets_nothing_on_reconnect() {
        let relay = relay();
        let (u1, mut u1_rx) = connect(&relay, "u1").await;

        relay
            .dispatch(&u1, ClientEvent::private_message(UserId::new("u2"), "later"))
            .await
            .unwrap();
        assert!(matches!(&drain(&mut u1_rx)[0], ServerEvent::MessageSent(_)));

        let (_u2, mut u2_rx) = connect(&relay, "u2").await;
        assert!(drain(&mut u2_rx).is_empty());

        let history = relay
            .messages()
            .find_by_pair(&UserId::new("u2"), &UserId::new("u1"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "later");
    }

    #[tokio::test]
    async fn test_disconnect_scenario() {
        let relay = relay();
        let (mut u1, _u1_rx) = connect(&relay, "u1").await;
        let (_u2, mut u2_rx) = connect(&relay, "u2").await;
        let (_u3, mut u3_rx) = connect(&relay, "u3").await;
        drain(&mut u2_rx);

        assert!(relay.close(&mut u1).await);
        assert!(relay.presence().lookup(&UserId::new("u1")).is_none());

        let offline = ServerEvent::user_status(UserId::new("u1"), false);
        assert_eq!(drain(&mut u2_rx), vec![offline.clone()]);
        assert_eq!(drain(&mut u3_rx), vec![offline]);

        assert!(!relay.close(&mut u1).await);
    }

    #[tokio::test]
    async fn test_reconnect_overwrites_presence() {
        let relay = relay();
        let (first, _rx1) = connect(&relay, "u1").await;
        let (second, _rx2) = connect(&relay, "u1").await;

        let current = relay.presence().lookup(&UserId::new("u1")).unwrap();
        assert_eq!(&current, second.handle());
        assert_ne!(&current, first.handle());
    }

    #[tokio::test]
    async fn test_mark_read_by_stranger_leaves_flag() {
        let relay = relay();
        let (u1, mut u1_rx) = connect(&relay, "u1").await;
        let (u3, _u3_rx) = connect(&relay, "u3").await;
        drain(&mut u1_rx);

        relay
            .dispatch(&u1, ClientEvent::private_message(UserId::new("u2"), "for u2"))
            .await
            .unwrap();
        let ServerEvent::MessageSent(sent) = drain(&mut u1_rx).remove(0) else {
            panic!("Expected MessageSent");
        };

        assert!(relay
            .dispatch(&u3, ClientEvent::message_read(sent.id.clone()))
            .await
            .is_err());
        assert!(!relay.messages().find(&sent.id).await.unwrap().unwrap().read);
        assert!(drain(&mut u1_rx).is_empty());

        // Unknown ids are ignored without error.
        assert!(relay
            .dispatch(&u3, ClientEvent::message_read(MessageId::new("missing")))
            .await
            .is_ok());
    }
}
