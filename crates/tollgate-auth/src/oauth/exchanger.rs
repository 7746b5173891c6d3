//! Authorization code exchange.

use std::sync::Arc;

use crate::AuthResult;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::storage::TokenRepository;
use crate::types::{AuthorizationCode, Client};

/// Validates and consumes single-use authorization codes.
///
/// The final consumption is a conditional delete in the store, so of any
/// number of concurrent exchanges of one code exactly one succeeds.
pub struct AuthorizationCodeExchanger {
    clock: Arc<dyn Clock>,
}

impl AuthorizationCodeExchanger {
    /// Creates an exchanger.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Exchange `code` presented by `client`.
    ///
    /// On success the code is gone from the store (within `repo`'s unit of
    /// work) and its data is returned for issuance.
    ///
    /// # Errors
    ///
    /// - `InvalidGrant` if the code is unknown, expired, issued to another
    ///   client, or consumed concurrently
    /// - `InvalidRedirectUri` if the code carries a redirect URI and
    ///   `redirect_uri` is missing or differs
    /// - `Storage` if the store fails
    pub async fn exchange<R>(
        &self,
        repo: &R,
        code: &str,
        client: &Client,
        redirect_uri: Option<&str>,
    ) -> AuthResult<AuthorizationCode>
    where
        R: TokenRepository + ?Sized,
    {
        let now = self.clock.now();

        // 1. Look up
        let stored = repo
            .find_code(code)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Authorization code not found"))?;

        // 2. Expiry
        if stored.is_expired_at(now) {
            return Err(AuthError::invalid_grant("Authorization code expired"));
        }

        // 3. Client binding
        if stored.client_id != client.client_id {
            return Err(AuthError::invalid_grant(
                "Authorization code was issued to another client",
            ));
        }

        // 4. Redirect URI, byte-for-byte; only when one was used at authorization
        if let Some(expected) = stored.redirect_uri.as_deref() {
            match redirect_uri.filter(|uri| !uri.is_empty()) {
                Some(presented) if presented == expected => {}
                Some(_) => return Err(AuthError::invalid_redirect_uri("redirect_uri mismatch")),
                None => return Err(AuthError::invalid_redirect_uri("redirect_uri is required")),
            }
        }

        // 5. Conditional delete; losing a race reads as already consumed
        if !repo.consume_code(code, now).await? {
            return Err(AuthError::invalid_grant("Authorization code already used"));
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{InMemoryTokenStore, TokenStore};
    use crate::types::GrantType;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const NOW: OffsetDateTime = datetime!(2024-05-01 10:00 UTC);

    fn client(client_id: &str) -> Client {
        Client {
            client_id: client_id.to_string(),
            name: client_id.to_string(),
            confidential: true,
            active: true,
            redirect_uris: vec!["https://x/cb".to_string()],
            scopes: vec![],
            grant_types: vec![GrantType::AuthorizationCode],
        }
    }

    async fn store_with(redirect_uri: Option<&str>, expires_at: OffsetDateTime) -> InMemoryTokenStore {
        let store = InMemoryTokenStore::new();
        store
            .create_code(&AuthorizationCode {
                code: "abc123".to_string(),
                client_id: "C1".to_string(),
                user_id: "U1".to_string(),
                scope: "read".to_string(),
                redirect_uri: redirect_uri.map(str::to_string),
                created_at: NOW - Duration::minutes(1),
                expires_at,
            })
            .await
            .unwrap();
        store
    }

    fn exchanger() -> AuthorizationCodeExchanger {
        AuthorizationCodeExchanger::new(Arc::new(ManualClock::new(NOW)))
    }

    #[tokio::test]
    async fn test_exchange_consumes_code() {
        let store = store_with(Some("https://x/cb"), NOW + Duration::minutes(5)).await;
        let exchanger = exchanger();

        let code = exchanger
            .exchange(&store, "abc123", &client("C1"), Some("https://x/cb"))
            .await
            .unwrap();
        assert_eq!(code.user_id, "U1");
        assert_eq!(code.scope, "read");

        let err = exchanger
            .exchange(&store, "abc123", &client("C1"), Some("https://x/cb"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_code_expiring_now_is_rejected() {
        let store = store_with(None, NOW).await;

        let err = exchanger()
            .exchange(&store, "abc123", &client("C1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_other_client_cannot_exchange() {
        let store = store_with(None, NOW + Duration::minutes(5)).await;

        let err = exchanger()
            .exchange(&store, "abc123", &client("C2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
        // The legitimate client can still use it.
        assert!(store.find_code("abc123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_redirect_uri_matrix() {
        let cases: [(Option<&str>, Option<&str>, bool); 7] = [
            (Some("https://x/cb"), Some("https://x/cb"), true),
            (Some("https://x/cb"), Some("https://x/cb/"), false),
            (Some("https://x/cb"), Some("HTTPS://x/cb"), false),
            (Some("https://x/cb"), Some(""), false),
            (Some("https://x/cb"), None, false),
            (None, Some("https://anything/else"), true),
            (None, None, true),
        ];

        for (issued, presented, ok) in cases {
            let store = store_with(issued, NOW + Duration::minutes(5)).await;
            let result = exchanger()
                .exchange(&store, "abc123", &client("C1"), presented)
                .await;

            if ok {
                assert!(result.is_ok(), "issued={issued:?} presented={presented:?}");
            } else {
                assert!(
                    matches!(result, Err(AuthError::InvalidRedirectUri { .. })),
                    "issued={issued:?} presented={presented:?}"
                );
                assert!(store.find_code("abc123").await.unwrap().is_some());
            }
        }
    }
}
