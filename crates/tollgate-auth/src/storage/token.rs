//! Token store traits.
//!
//! The token store owns authorization codes, access tokens and refresh
//! tokens. It is the only shared mutable resource of the token core, so every
//! write that depends on a prior read is a single conditional operation:
//! compare-and-delete for codes, compare-and-create for refresh tokens.
//!
//! Grant handling runs inside a unit of work obtained from
//! [`TokenStore::begin`]. Writes made through a [`TokenTransaction`] become
//! visible only on [`TokenTransaction::commit`]; dropping the transaction
//! discards them.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::AuthResult;
use crate::config::RefreshTokenScoping;
use crate::types::{AccessToken, AuthorizationCode, RefreshToken};

// =============================================================================
// Refresh Token Key
// =============================================================================

/// Uniqueness key for refresh-token get-or-create.
///
/// `scope` is only populated under [`RefreshTokenScoping::ClientUserScope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshTokenKey {
    /// Owning client.
    pub client_id: String,
    /// Owning user, if any.
    pub user_id: Option<String>,
    /// Scope, when scope participates in the key.
    pub scope: Option<String>,
}

impl RefreshTokenKey {
    /// Builds the key for a (client, user, scope) triple under `scoping`.
    #[must_use]
    pub fn new(
        client_id: &str,
        user_id: Option<&str>,
        scope: &str,
        scoping: RefreshTokenScoping,
    ) -> Self {
        let scope = match scoping {
            RefreshTokenScoping::ClientUser => None,
            RefreshTokenScoping::ClientUserScope => Some(scope.to_string()),
        };

        Self {
            client_id: client_id.to_string(),
            user_id: user_id.map(str::to_string),
            scope,
        }
    }

    /// Returns `true` if `token` falls under this key.
    #[must_use]
    pub fn matches(&self, token: &RefreshToken) -> bool {
        token.client_id == self.client_id
            && token.user_id == self.user_id
            && self.scope.as_ref().is_none_or(|scope| *scope == token.scope)
    }
}

/// Outcome of a conditional refresh-token insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenInsert {
    /// The token was stored.
    Created,
    /// A usable token with the same key already exists; nothing was stored.
    Conflict,
}

/// Row counts removed by [`TokenStore::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    /// Expired authorization codes removed.
    pub codes: u64,
    /// Expired access tokens removed.
    pub access_tokens: u64,
    /// Expired refresh tokens removed.
    pub refresh_tokens: u64,
}

impl PurgeStats {
    /// Total number of removed records.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.codes + self.access_tokens + self.refresh_tokens
    }
}

// =============================================================================
// Token Repository
// =============================================================================

/// Data operations on authorization codes, access tokens and refresh tokens.
///
/// Implemented both by a [`TokenStore`] (each call is its own unit) and by a
/// [`TokenTransaction`] (calls share one unit of work). Issuers and the code
/// exchanger are written against this trait so they run unchanged in either.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Find an authorization code by value.
    ///
    /// Returns the code even if it is expired; expiry is the caller's check.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_code(&self, code: &str) -> AuthResult<Option<AuthorizationCode>>;

    /// Atomically delete an authorization code if it is present and unexpired.
    ///
    /// Returns `true` only for the caller whose delete removed the row. Of N
    /// concurrent callers on the same value at most one observes `true`.
    ///
    /// # Atomicity
    ///
    /// This MUST be a single conditional operation, for example:
    ///
    /// ```sql
    /// DELETE FROM oauth_authorization_code
    /// WHERE code = $1 AND expires_at > $2
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn consume_code(&self, code: &str, now: OffsetDateTime) -> AuthResult<bool>;

    /// Delete access tokens for (client, user) whose expiry is at or before `now`.
    ///
    /// `user_id = None` targets the client's user-less tokens. Returns the
    /// number of removed tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired_access_tokens(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<u64>;

    /// Persist a new access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token value already exists or the storage
    /// operation fails.
    async fn create_access_token(&self, token: &AccessToken) -> AuthResult<()>;

    /// Find a refresh token by value, usable or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>>;

    /// Find the usable refresh token stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_usable_refresh_token(
        &self,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshToken>>;

    /// Store `token` under `key` unless a usable token already holds the key.
    ///
    /// Tokens under `key` that are no longer usable at `now` do not block
    /// the insert and may be replaced.
    ///
    /// # Atomicity
    ///
    /// The existence check and the insert MUST be one operation, backed by a
    /// uniqueness constraint on the key:
    ///
    /// ```sql
    /// INSERT INTO oauth_refresh_token (...) VALUES (...)
    /// ON CONFLICT (client_id, user_key, scope_key) DO NOTHING
    /// RETURNING token
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails. A uniqueness
    /// conflict is not an error; it is reported as
    /// [`RefreshTokenInsert::Conflict`].
    async fn create_refresh_token(
        &self,
        token: &RefreshToken,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<RefreshTokenInsert>;
}

// =============================================================================
// Token Store / Unit of Work
// =============================================================================

/// A token store that can open units of work.
#[async_trait]
pub trait TokenStore: TokenRepository {
    /// Begin a unit of work.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot start a transaction.
    async fn begin(&self) -> AuthResult<Box<dyn TokenTransaction>>;

    /// Persist an authorization code produced by the authorize step.
    ///
    /// # Errors
    ///
    /// Returns an error if the code value already exists or the storage
    /// operation fails.
    async fn create_code(&self, code: &AuthorizationCode) -> AuthResult<()>;

    /// Remove every expired code, access token and refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn purge_expired(&self, now: OffsetDateTime) -> AuthResult<PurgeStats>;
}

/// A unit of work over the token store.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait TokenTransaction: TokenRepository {
    /// Make all writes of this unit durable and visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; no write is then visible.
    async fn commit(self: Box<Self>) -> AuthResult<()>;

    /// Discard all writes of this unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    async fn rollback(self: Box<Self>) -> AuthResult<()>;
}
