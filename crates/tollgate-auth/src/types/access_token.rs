//! Access token domain type.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A bounded-lifetime bearer access token.
///
/// Several live access tokens may exist for the same client and user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// Opaque token value.
    pub token: String,

    /// Client the token was issued to.
    pub client_id: String,

    /// User the token acts for (None for client_credentials).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Granted scope (space-separated).
    pub scope: String,

    /// When the token was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl AccessToken {
    /// Returns `true` if the token is expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}
