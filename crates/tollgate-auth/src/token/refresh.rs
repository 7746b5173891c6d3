//! Refresh token get-or-create.

use std::sync::Arc;

use time::Duration;
use tracing::debug;

use crate::AuthResult;
use crate::clock::Clock;
use crate::config::RefreshTokenScoping;
use crate::error::AuthError;
use crate::storage::{RefreshTokenInsert, RefreshTokenKey, TokenRepository};
use crate::token::generator::TokenGenerator;
use crate::types::RefreshToken;

/// Returns the usable refresh token for a key, creating it if absent.
///
/// A usable token is returned unchanged: same value, same timestamps.
/// When two callers race to create the first token, the store reports a
/// conflict to the loser, which then re-reads and returns the winner's token.
pub struct RefreshTokenIssuer {
    generator: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    lifetime: Option<Duration>,
    scoping: RefreshTokenScoping,
}

impl RefreshTokenIssuer {
    /// Creates an issuer. `lifetime = None` issues non-expiring tokens.
    #[must_use]
    pub fn new(
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
        lifetime: Option<Duration>,
        scoping: RefreshTokenScoping,
    ) -> Self {
        Self {
            generator,
            clock,
            lifetime,
            scoping,
        }
    }

    /// Uniqueness key for a (client, user, scope) triple.
    #[must_use]
    pub fn key(&self, client_id: &str, user_id: Option<&str>, scope: &str) -> RefreshTokenKey {
        RefreshTokenKey::new(client_id, user_id, scope, self.scoping)
    }

    /// Get the usable refresh token for (client, user, scope) or create one.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails, or reports a conflict
    /// without a usable token to re-read.
    pub async fn get_or_create<R>(
        &self,
        repo: &R,
        client_id: &str,
        user_id: Option<&str>,
        scope: &str,
    ) -> AuthResult<RefreshToken>
    where
        R: TokenRepository + ?Sized,
    {
        let now = self.clock.now();
        let key = self.key(client_id, user_id, scope);

        if let Some(existing) = repo.find_usable_refresh_token(&key, now).await? {
            return Ok(existing);
        }

        let expires_at = self
            .lifetime
            .map(|lifetime| {
                now.checked_add(lifetime)
                    .ok_or_else(|| AuthError::configuration("refresh token lifetime overflows"))
            })
            .transpose()?;

        let token = RefreshToken {
            token: self.generator.generate(),
            client_id: client_id.to_string(),
            user_id: user_id.map(str::to_string),
            scope: scope.to_string(),
            created_at: now,
            expires_at,
        };

        match repo.create_refresh_token(&token, &key, now).await? {
            RefreshTokenInsert::Created => Ok(token),
            RefreshTokenInsert::Conflict => {
                debug!(client_id, "Refresh token created concurrently, re-reading");
                repo.find_usable_refresh_token(&key, now)
                    .await?
                    .ok_or_else(|| {
                        AuthError::storage("refresh token conflict without a usable token")
                    })
            }
        }
    }
}
