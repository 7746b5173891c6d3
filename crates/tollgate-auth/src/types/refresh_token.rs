//! Refresh token domain type.
//!
//! Refresh tokens are long-lived and may never expire. Get-or-create keeps
//! at most one usable refresh token per key, see
//! [`RefreshTokenKey`](crate::storage::RefreshTokenKey).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Refresh token stored by the token store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Opaque token value.
    pub token: String,

    /// Client that this token was issued to.
    pub client_id: String,

    /// User that authorized this token (None for client-only grants).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Granted scope (space-separated).
    pub scope: String,

    /// When this token was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When this token expires (None = no expiration).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl RefreshToken {
    /// Returns `true` if this token can still be used at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;

    fn token(expires_at: Option<OffsetDateTime>) -> RefreshToken {
        RefreshToken {
            token: "rt".to_string(),
            client_id: "C1".to_string(),
            user_id: Some("U1".to_string()),
            scope: "read".to_string(),
            created_at: datetime!(2024-01-01 00:00 UTC),
            expires_at,
        }
    }

    #[test]
    fn test_non_expiring_token_is_always_usable() {
        let now = datetime!(2099-01-01 00:00 UTC);
        assert!(token(None).is_usable_at(now));
    }

    #[test]
    fn test_expired_token_is_not_usable() {
        let now = datetime!(2024-06-01 00:00 UTC);
        assert!(!token(Some(now)).is_usable_at(now));
        assert!(token(Some(now + Duration::seconds(1))).is_usable_at(now));
    }

    #[test]
    fn test_serialization_omits_missing_expiry() {
        let json = serde_json::to_value(token(None)).unwrap();
        assert!(json.get("expires_at").is_none());
        assert_eq!(json["created_at"], "2024-01-01T00:00:00Z");
    }
}
