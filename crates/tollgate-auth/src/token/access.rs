//! Access token issuance.

use std::sync::Arc;

use time::Duration;
use tracing::{debug, warn};

use crate::AuthResult;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::storage::TokenRepository;
use crate::token::generator::TokenGenerator;
use crate::types::AccessToken;

/// Issues bounded-lifetime access tokens.
///
/// Each issuance first removes the expired access tokens of the same
/// (client, user) pair. That cleanup is best-effort: its failure is logged
/// and never fails the issuance.
pub struct AccessTokenIssuer {
    generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    lifetime: Duration,
}

impl AccessTokenIssuer {
    /// Creates an issuer producing tokens valid for `lifetime`.
    #[must_use]
    pub fn new(
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
        lifetime: Duration,
    ) -> Self {
        Self {
            generator,
            clock,
            lifetime,
        }
    }

    /// Configured lifetime in whole seconds, as reported in `expires_in`.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        u64::try_from(self.lifetime.whole_seconds()).unwrap_or_default()
    }

    /// Issue and persist a new access token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the expiry overflows and
    /// `AuthError::Storage` if the token could not be persisted. A token
    /// is only returned once it is recorded.
    pub async fn issue<R>(
        &self,
        repo: &R,
        client_id: &str,
        user_id: Option<&str>,
        scope: &str,
    ) -> AuthResult<AccessToken>
    where
        R: TokenRepository + ?Sized,
    {
        let now = self.clock.now();

        match repo
            .delete_expired_access_tokens(client_id, user_id, now)
            .await
        {
            Ok(0) => {}
            Ok(removed) => debug!(client_id, removed, "Removed expired access tokens"),
            Err(e) => warn!(
                client_id,
                error = %e,
                "Failed to remove expired access tokens, continuing"
            ),
        }

        let expires_at = now
            .checked_add(self.lifetime)
            .ok_or_else(|| AuthError::configuration("access token lifetime overflows"))?;

        let token = AccessToken {
            token: self.generator.generate(),
            client_id: client_id.to_string(),
            user_id: user_id.map(str::to_string),
            scope: scope.to_string(),
            created_at: now,
            expires_at,
        };

        repo.create_access_token(&token).await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::InMemoryTokenStore;
    use crate::storage::token::{RefreshTokenInsert, RefreshTokenKey};
    use crate::token::generator::SequentialTokenGenerator;
    use crate::types::{AuthorizationCode, RefreshToken};
    use async_trait::async_trait;
    use time::OffsetDateTime;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-03-01 09:00 UTC);

    fn issuer(clock: Arc<ManualClock>, lifetime: Duration) -> AccessTokenIssuer {
        AccessTokenIssuer::new(Arc::new(SequentialTokenGenerator::new("at")), clock, lifetime)
    }

    fn stored(value: &str, expires_at: OffsetDateTime) -> AccessToken {
        AccessToken {
            token: value.to_string(),
            client_id: "C1".to_string(),
            user_id: Some("U1".to_string()),
            scope: "read".to_string(),
            created_at: expires_at - Duration::hours(1),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_lifetime() {
        let store = InMemoryTokenStore::new();
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), Duration::seconds(3600));

        let token = issuer.issue(&store, "C1", Some("U1"), "read").await.unwrap();

        assert_eq!(issuer.expires_in(), 3600);
        assert_eq!(token.created_at, NOW);
        assert_eq!(token.expires_at, NOW + Duration::seconds(3600));
        assert_eq!(token.scope, "read");
    }

    #[tokio::test]
    async fn test_removes_only_expired_tokens_of_the_pair() {
        let store = InMemoryTokenStore::new();
        store
            .create_access_token(&stored("expired-1", NOW - Duration::minutes(10)))
            .await
            .unwrap();
        store.create_access_token(&stored("expired-2", NOW)).await.unwrap();
        store
            .create_access_token(&stored("live", NOW + Duration::minutes(10)))
            .await
            .unwrap();
        let other_user = AccessToken {
            user_id: Some("U2".to_string()),
            ..stored("other", NOW - Duration::minutes(10))
        };
        store.create_access_token(&other_user).await.unwrap();

        let issuer = issuer(Arc::new(ManualClock::new(NOW)), Duration::hours(1));
        let new = issuer.issue(&store, "C1", Some("U1"), "read").await.unwrap();

        let mut remaining: Vec<_> = store
            .access_tokens_for("C1", Some("U1"))
            .await
            .into_iter()
            .map(|t| t.token)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec![new.token, "live".to_string()]);
        assert_eq!(store.access_tokens_for("C1", Some("U2")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_lifetime_overflow_is_configuration_error() {
        let store = InMemoryTokenStore::new();
        let issuer = issuer(
            Arc::new(ManualClock::new(datetime!(9999-12-31 23:00 UTC))),
            Duration::days(2),
        );

        let err = issuer.issue(&store, "C1", None, "read").await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    /// Store whose expiry cleanup always fails.
    struct FailingCleanup(InMemoryTokenStore);

    #[async_trait]
    impl TokenRepository for FailingCleanup {
        async fn find_code(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
            self.0.find_code(code).await
        }

        async fn consume_code(&self, code: &str, now: OffsetDateTime) -> AuthResult<bool> {
            self.0.consume_code(code, now).await
        }

        async fn delete_expired_access_tokens(
            &self,
            _client_id: &str,
            _user_id: Option<&str>,
            _now: OffsetDateTime,
        ) -> AuthResult<u64> {
            Err(AuthError::storage("cleanup unavailable"))
        }

        async fn create_access_token(&self, token: &AccessToken) -> AuthResult<()> {
            self.0.create_access_token(token).await
        }

        async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
            self.0.find_refresh_token(token).await
        }

        async fn find_usable_refresh_token(
            &self,
            key: &RefreshTokenKey,
            now: OffsetDateTime,
        ) -> AuthResult<Option<RefreshToken>> {
            self.0.find_usable_refresh_token(key, now).await
        }

        async fn create_refresh_token(
            &self,
            token: &RefreshToken,
            key: &RefreshTokenKey,
            now: OffsetDateTime,
        ) -> AuthResult<RefreshTokenInsert> {
            self.0.create_refresh_token(token, key, now).await
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_fail_issuance() {
        let store = FailingCleanup(InMemoryTokenStore::new());
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), Duration::hours(1));

        let token = issuer.issue(&store, "C1", Some("U1"), "read").await.unwrap();
        assert_eq!(store.0.access_tokens_for("C1", Some("U1")).await, vec![token]);
    }
}
