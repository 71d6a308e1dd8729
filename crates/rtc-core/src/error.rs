//! Relay error taxonomy.

use crate::auth::AuthError;
use crate::store::StoreError;
use rtc_protocol::UserId;
use thiserror::Error;

/// Errors raised while handling a connection's events.
///
/// None of these are fatal to the process, and each stays local to the
/// connection that triggered it.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Credential missing, forged or expired. The connection is refused.
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Request rejected before any side effect.
    #[error("{0}")]
    Validation(String),

    /// The message store could not complete the operation.
    #[error("Failed to send message")]
    Persistence(#[from] StoreError),

    /// The target identity has no live connection.
    #[error("User is offline: {0}")]
    UnreachableTarget(UserId),

    /// The caller is not allowed to act on the resource.
    #[error("Not authorized: {0}")]
    Authorization(String),
}

impl RelayError {
    /// Stable numeric code reported to clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RelayError::Authentication(_) => 4001,
            RelayError::Validation(_) => 4220,
            RelayError::Authorization(_) => 4030,
            RelayError::UnreachableTarget(_) => 4040,
            RelayError::Persistence(_) => 5030,
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Authentication(_) => "authentication",
            RelayError::Validation(_) => "validation",
            RelayError::Authorization(_) => "authorization",
            RelayError::UnreachableTarget(_) => "unreachable",
            RelayError::Persistence(_) => "persistence",
        }
    }
}
