//! Direct-message routing.
//!
//! Messages are persisted first and only then delivered. A message that was
//! stored but never delivered (recipient offline, crash in between) is still
//! available through history.

use crate::connection::ConnectionHandle;
use crate::error::RelayError;
use crate::presence::PresenceRegistry;
use crate::store::{MarkReadOutcome, MessageStore, StoredMessage, UserDirectory, UserDisplayInfo};
use rtc_protocol::{ChatMessage, MessageId, ReadReceipt, ServerEvent, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum message length in characters.
    pub max_content_length: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_content_length: 4096,
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// The persisted message as delivered.
    pub message: ChatMessage,
    /// Whether the recipient had a live connection.
    pub delivered: bool,
}

/// Result of a read acknowledgement that passed the recipient check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Flag set and receipt queued for the sender.
    Notified,
    /// Flag set; sender offline so no receipt was sent.
    SenderOffline,
    /// Flag was already set; nothing sent.
    AlreadyRead,
    /// No such message.
    UnknownMessage,
}

/// Routes direct messages and read receipts.
pub struct MessageRouter {
    presence: Arc<PresenceRegistry>,
    messages: Arc<dyn MessageStore>,
    users: Arc<dyn UserDirectory>,
    config: RouterConfig,
}

impl MessageRouter {
    /// Create a router over the shared registry and stores.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
        config: RouterConfig,
    ) -> Self {
        Self {
            presence,
            messages,
            users,
            config,
        }
    }

    /// Validate, persist and deliver a message from `sender`'s connection.
    ///
    /// On success the recipient (if present) receives `newMessage` and the
    /// sending connection always receives `messageSent`. Errors leave no
    /// events behind; reporting them is the caller's job.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] for empty or oversized content and
    /// [`RelayError::Persistence`] if the store fails.
    pub async fn send_message(
        &self,
        sender: &ConnectionHandle,
        recipient: &UserId,
        content: &str,
    ) -> Result<SendOutcome, RelayError> {
        let stored = self.store(sender.user(), recipient, content).await?;

        let info = self.display_info(sender.user()).await;
        let message = stored.to_chat(&info);

        let delivered = self
            .presence
            .send_to(recipient, ServerEvent::NewMessage(message.clone()));
        sender.send(ServerEvent::MessageSent(message.clone()));

        debug!(
            message = %message.id,
            sender = %sender.user(),
            recipient = %recipient,
            delivered,
            "Message routed"
        );

        Ok(SendOutcome { message, delivered })
    }

    /// Validate and persist a message without delivering it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Validation`] for empty or oversized content and
    /// [`RelayError::Persistence`] if the store fails.
    pub async fn store(
        &self,
        sender: &UserId,
        recipient: &UserId,
        content: &str,
    ) -> Result<StoredMessage, RelayError> {
        if content.trim().is_empty() {
            return Err(RelayError::Validation(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.config.max_content_length {
            return Err(RelayError::Validation(format!(
                "Message content exceeds {} characters",
                self.config.max_content_length
            )));
        }

        Ok(self.messages.create(sender, recipient, content).await?)
    }

    /// Mark a message read on behalf of `reader` and notify its sender.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Authorization`] if `reader` is not the
    /// recipient, or [`RelayError::Persistence`] if the store fails. Callers
    /// log these without telling the client.
    pub async fn mark_read(
        &self,
        reader: &UserId,
        message_id: &MessageId,
    ) -> Result<ReadOutcome, RelayError> {
        let outcome = match self.messages.mark_read(message_id, reader).await? {
            MarkReadOutcome::Marked(message) => {
                let receipt = ServerEvent::MessageReadUpdate(ReadReceipt {
                    message_id: message.id.clone(),
                });
                if self.presence.send_to(&message.sender, receipt) {
                    ReadOutcome::Notified
                } else {
                    ReadOutcome::SenderOffline
                }
            }
            MarkReadOutcome::AlreadyRead(_) => ReadOutcome::AlreadyRead,
            MarkReadOutcome::NotFound => ReadOutcome::UnknownMessage,
            MarkReadOutcome::NotRecipient => {
                return Err(RelayError::Authorization(format!(
                    "{} is not the recipient of {}",
                    reader, message_id
                )));
            }
        };

        debug!(message = %message_id, reader = %reader, outcome = ?outcome, "Read receipt");
        Ok(outcome)
    }

    /// Sender display attributes, falling back to the bare id.
    ///
    /// The message is already durable at this point, so a directory failure
    /// must not turn into a delivery failure.
    async fn display_info(&self, user: &UserId) -> UserDisplayInfo {
        match self.users.display_info(user).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                info!(user = %user, "No profile for sender, using id");
                UserDisplayInfo::fallback(user)
            }
            Err(e) => {
                warn!(user = %user, error = %e, "Profile lookup failed, using id");
                UserDisplayInfo::fallback(user)
            }
        }
    }
}
