//! Session authentication.
//!
//! Connections present an HS256 JWT issued by the account service. The token
//! is checked once, at connect time, and resolves to the connection's
//! identity.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rtc_protocol::UserId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::connection::now_millis;

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("Missing credential")]
    MissingCredential,

    /// The credential's expiry has passed.
    #[error("Credential expired")]
    Expired,

    /// Bad signature, malformed token or no usable identity.
    #[error("Invalid credential: {0}")]
    Invalid(String),
}

/// Legacy nested identity claim: `{"user": {"id": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaim {
    pub id: String,
}

/// JWT claims accepted by the relay.
///
/// Either the standard `sub` or the nested `user.id` must name the user;
/// `sub` wins when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserClaim>,
    /// Issued at (seconds since epoch).
    #[serde(default)]
    pub iat: i64,
    /// Expiration (seconds since epoch).
    pub exp: i64,
}

impl Claims {
    /// The identity named by these claims.
    #[must_use]
    pub fn identity(&self) -> Option<UserId> {
        self.sub
            .as_deref()
            .or(self.user.as_ref().map(|u| u.id.as_str()))
            .filter(|id| !id.is_empty())
            .map(UserId::new)
    }
}

/// Verifies (and, for the account service and tests, issues) session tokens.
#[derive(Clone)]
pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Authenticator {
    /// Create an authenticator for a shared HS256 secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self::with_leeway(secret, 0)
    }

    /// Create an authenticator that tolerates `leeway_secs` of clock skew.
    #[must_use]
    pub fn with_leeway(secret: &[u8], leeway_secs: u64) -> Self {
        // HS256 only, whatever the token header claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify a credential and resolve it to an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is missing, expired, forged, or
    /// names no user.
    pub fn verify(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        data.claims
            .identity()
            .ok_or_else(|| AuthError::Invalid("token names no user".to_string()))
    }

    /// Issue a token for `user` valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if `ttl` puts the expiry out of range, or if signing
    /// fails.
    pub fn issue(&self, user: &UserId, ttl: Duration) -> Result<String, AuthError> {
        let now = i64::try_from(now_millis() / 1000)
            .map_err(|_| AuthError::Invalid("clock out of range".to_string()))?;
        let exp = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| AuthError::Invalid("token lifetime out of range".to_string()))?;
        let claims = Claims {
            sub: Some(user.to_string()),
            user: None,
            iat: now,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}
