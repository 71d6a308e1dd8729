//! In-memory collaborator implementations.
//!
//! These back the standalone server and the test suites. Nothing here
//! survives a restart.

use crate::connection::now_millis;
use crate::store::{
    MarkReadOutcome, MessageStore, StatusStore, StoreError, StoredMessage, UserDisplayInfo,
    UserDirectory,
};
use async_trait::async_trait;
use dashmap::DashMap;
use rtc_protocol::{MessageId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;
use uuid::Uuid;

/// Message plus its insertion sequence, used to order equal timestamps.
#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    message: StoredMessage,
}

/// Message store held in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    rows: DashMap<MessageId, Row>,
    seq: AtomicU64,
}

impl MemoryMessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let message = StoredMessage {
            id: MessageId::new(Uuid::new_v4().to_string()),
            sender: sender.clone(),
            recipient: recipient.clone(),
            content: content.to_string(),
            read: false,
            timestamp: now_millis(),
        };
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        self.rows.insert(
            message.id.clone(),
            Row {
                seq,
                message: message.clone(),
            },
        );
        trace!(message = %message.id, sender = %sender, recipient = %recipient, "Stored message");

        Ok(message)
    }

    async fn find(&self, id: &MessageId) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self.rows.get(id).map(|row| row.message.clone()))
    }

    async fn find_by_pair(&self, a: &UserId, b: &UserId) -> Result<Vec<StoredMessage>, StoreError> {
        let mut rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| {
                let m = &row.message;
                (&m.sender == a && &m.recipient == b) || (&m.sender == b && &m.recipient == a)
            })
            .map(|row| row.value().clone())
            .collect();

        rows.sort_by_key(|row| (row.message.timestamp, row.seq));
        Ok(rows.into_iter().map(|row| row.message).collect())
    }

    async fn mark_read(
        &self,
        id: &MessageId,
        reader: &UserId,
    ) -> Result<MarkReadOutcome, StoreError> {
        let Some(mut row) = self.rows.get_mut(id) else {
            return Ok(MarkReadOutcome::NotFound);
        };

        let message = &mut row.message;
        if &message.recipient != reader {
            return Ok(MarkReadOutcome::NotRecipient);
        }
        if message.read {
            return Ok(MarkReadOutcome::AlreadyRead(message.clone()));
        }

        message.read = true;
        Ok(MarkReadOutcome::Marked(message.clone()))
    }
}

/// Durable-status record kept per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    pub is_online: bool,
    /// Last online/offline transition, in ms since the epoch.
    pub last_seen: u64,
}

/// User directory and status store held in memory.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    profiles: DashMap<UserId, UserDisplayInfo>,
    statuses: DashMap<UserId, StatusRecord>,
}

impl MemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory seeded with profiles.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = (UserId, UserDisplayInfo)>) -> Self {
        let directory = Self::new();
        for (id, info) in users {
            directory.insert(id, info);
        }
        directory
    }

    /// Add or replace a profile.
    pub fn insert(&self, user: UserId, info: UserDisplayInfo) {
        self.profiles.insert(user, info);
    }

    /// Last recorded status for a user.
    #[must_use]
    pub fn status(&self, user: &UserId) -> Option<StatusRecord> {
        self.statuses.get(user).map(|record| *record)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn display_info(&self, user: &UserId) -> Result<Option<UserDisplayInfo>, StoreError> {
        Ok(self.profiles.get(user).map(|info| info.clone()))
    }
}

#[async_trait]
impl StatusStore for MemoryUserDirectory {
    async fn set_online(&self, user: &UserId, online: bool) -> Result<(), StoreError> {
        self.statuses.insert(
            user.clone(),
            StatusRecord {
                is_online: online,
                last_seen: now_millis(),
            },
        );
        Ok(())
    }
}
