//! Collaborator interfaces consumed by the relay.
//!
//! The relay never owns durable state. Messages live in a [`MessageStore`],
//! display attributes come from a [`UserDirectory`], and the durable online
//! flag is written through a [`StatusStore`].

use async_trait::async_trait;
use rtc_protocol::{ChatMessage, MessageId, SenderInfo, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the write.
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub recipient: UserId,
    pub content: String,
    pub read: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl StoredMessage {
    /// Render the message for clients, attaching sender display attributes.
    #[must_use]
    pub fn to_chat(&self, sender: &UserDisplayInfo) -> ChatMessage {
        ChatMessage {
            id: self.id.clone(),
            sender: SenderInfo {
                id: self.sender.clone(),
                username: sender.username.clone(),
                avatar: sender.avatar.clone(),
            },
            recipient: self.recipient.clone(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            read: self.read,
        }
    }
}

/// Result of a read-flag update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkReadOutcome {
    /// Flag flipped from false to true.
    Marked(StoredMessage),
    /// Flag was already true; nothing changed.
    AlreadyRead(StoredMessage),
    /// No message with that id.
    NotFound,
    /// The reader is not the message's recipient; nothing changed.
    NotRecipient,
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new unread message, assigning its id and timestamp.
    async fn create(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// Load a message by id.
    async fn find(&self, id: &MessageId) -> Result<Option<StoredMessage>, StoreError>;

    /// All messages exchanged between two users, in either direction,
    /// oldest first.
    async fn find_by_pair(&self, a: &UserId, b: &UserId) -> Result<Vec<StoredMessage>, StoreError>;

    /// Mark a message read on behalf of `reader`, who must be its recipient.
    async fn mark_read(
        &self,
        id: &MessageId,
        reader: &UserId,
    ) -> Result<MarkReadOutcome, StoreError>;
}

/// Public attributes shown next to a user's messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDisplayInfo {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserDisplayInfo {
    /// Display info for a user the directory does not know.
    #[must_use]
    pub fn fallback(user: &UserId) -> Self {
        Self {
            username: user.to_string(),
            avatar: None,
        }
    }
}

/// Read access to user profiles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Display attributes for a user, if known.
    async fn display_info(&self, user: &UserId) -> Result<Option<UserDisplayInfo>, StoreError>;
}

/// Durable online/offline flag, kept for clients loading contact lists.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Record the user as online or offline and stamp last-seen.
    async fn set_online(&self, user: &UserId, online: bool) -> Result<(), StoreError>;
}
