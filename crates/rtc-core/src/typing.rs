//! Typing indicators.
//!
//! Forward-if-present only: nothing is stored, nothing is acknowledged, and
//! an offline recipient simply never hears about it. Receivers clear stale
//! indicators on their own after about a second.

use crate::presence::PresenceRegistry;
use rtc_protocol::{ServerEvent, TypingIndicator, UserId};
use std::sync::Arc;
use tracing::trace;

/// Forwards typing signals between users.
#[derive(Debug, Clone)]
pub struct TypingNotifier {
    presence: Arc<PresenceRegistry>,
}

impl TypingNotifier {
    /// Create a notifier over the shared registry.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Tell `recipient` whether `sender` is typing.
    ///
    /// Returns `true` if the indicator reached a live connection.
    pub fn set_typing(&self, sender: &UserId, recipient: &UserId, is_typing: bool) -> bool {
        let delivered = self.presence.send_to(
            recipient,
            ServerEvent::UserTyping(TypingIndicator {
                user_id: sender.clone(),
                is_typing,
            }),
        );
        trace!(sender = %sender, recipient = %recipient, is_typing, delivered, "Typing");
        delivered
    }
}
