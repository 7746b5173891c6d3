//! Authorization code domain type.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single-use authorization code issued by the authorize step.
///
/// The token core never creates codes for clients; it only looks them up
/// and consumes them. A consumed code is removed from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Opaque, high-entropy code value.
    pub code: String,

    /// Client the code was issued to.
    pub client_id: String,

    /// User who authorized the client.
    pub user_id: String,

    /// Granted scope (space-separated).
    pub scope: String,

    /// Redirect URI presented at authorization time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// When the code was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the code stops being exchangeable.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl AuthorizationCode {
    /// Returns `true` if the code is expired at `now`.
    ///
    /// A code whose expiry equals `now` is already expired.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    #[test]
    fn test_expiry_boundary() {
        let now = datetime!(2024-01-01 12:00 UTC);
        let code = AuthorizationCode {
            code: "abc123".to_string(),
            client_id: "C1".to_string(),
            user_id: "U1".to_string(),
            scope: "read".to_string(),
            redirect_uri: None,
            created_at: now - Duration::minutes(1),
            expires_at: now,
        };

        assert!(code.is_expired_at(now));
        assert!(!code.is_expired_at(now - Duration::seconds(1)));
    }
}
