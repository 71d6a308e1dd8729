//! # rtc-core
//!
//! Presence, messaging and call-signaling relay for rtc-relay.
//!
//! This crate provides the building blocks behind the socket layer:
//!
//! - **Presence** - Which user is reachable on which live connection
//! - **Router** - Persist-then-deliver private messages and read receipts
//! - **Typing** - Ephemeral typing indicators
//! - **Signaling** - Opaque WebRTC offer/answer/ICE forwarding
//! - **Lifecycle** - Session state machine and online/offline broadcasts
//! - **Auth** - HS256 bearer-token verification
//!
//! Persistence sits behind the [`MessageStore`], [`UserDirectory`] and
//! [`StatusStore`] traits; [`memory`] has in-process implementations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│   Router    │──▶ MessageStore
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//!        │            ┌─────────────┐     ┌─────────────┐
//!        └────────────│  Presence   │◀────│  Signaling  │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod auth;
pub mod connection;
mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod presence;
pub mod relay;
pub mod router;
pub mod signaling;
pub mod store;
pub mod typing;

pub use auth::{AuthError, Authenticator, Claims};
pub use connection::{now_millis, ConnectionHandle, ConnectionId, EventReceiver};
pub use error::RelayError;
pub use lifecycle::{LifecycleManager, Session, SessionState};
pub use memory::{MemoryMessageStore, MemoryUserDirectory};
pub use presence::{PresenceEntry, PresenceRegistry};
pub use relay::{Collaborators, Relay, RelayConfig};
pub use router::{MessageRouter, ReadOutcome, RouterConfig, SendOutcome};
pub use signaling::{generate_meeting_id, CallRelay, MEETING_ID_LENGTH};
pub use store::{
    MarkReadOutcome, MessageStore, StatusStore, StoreError, StoredMessage, UserDirectory,
    UserDisplayInfo,
};
pub use typing::TypingNotifier;
