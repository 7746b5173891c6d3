//! In-process storage backends.
//!
//! [`InMemoryTokenStore`] keeps all tables behind one async mutex. Single
//! operations lock it briefly. A transaction holds the lock for its whole
//! lifetime and writes to the shared tables in place, journaling each change.
//! Commit forgets the journal; rollback and drop replay it backwards.
//! Transactions are therefore fully serialized, which is what gives
//! single-use codes and unique refresh tokens here.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::client::ClientStorage;
use crate::storage::token::{
    PurgeStats, RefreshTokenInsert, RefreshTokenKey, TokenRepository, TokenStore,
    TokenTransaction,
};
use crate::storage::user::UserStorage;
use crate::types::{AccessToken, AuthorizationCode, Client, RefreshToken, User};

// =============================================================================
// Tables
// =============================================================================

/// (client_id, user_id) pair owning a set of access tokens.
type Owner = (String, Option<String>);

fn owner(client_id: &str, user_id: Option<&str>) -> Owner {
    (client_id.to_string(), user_id.map(str::to_string))
}

#[derive(Debug, Clone)]
struct StoredRefreshToken {
    key: RefreshTokenKey,
    token: RefreshToken,
}

/// A single write, recorded so it can be undone.
#[derive(Debug)]
enum Change {
    CodeRemoved(AuthorizationCode),
    AccessTokenAdded(String),
    AccessTokenRemoved(AccessToken),
    RefreshTokenAdded(String),
    RefreshTokenRemoved(StoredRefreshToken),
}

/// Token tables plus the secondary indexes grants look up by.
///
/// A refresh key maps to at most one stored token: creation removes every
/// stale token under the key before inserting.
#[derive(Debug, Default)]
struct TokenTables {
    codes: HashMap<String, AuthorizationCode>,
    access_tokens: HashMap<String, AccessToken>,
    access_by_owner: HashMap<Owner, HashSet<String>>,
    refresh_tokens: HashMap<String, StoredRefreshToken>,
    refresh_by_key: HashMap<RefreshTokenKey, String>,
}

impl TokenTables {
    fn insert_access_token(&mut self, token: AccessToken) {
        self.access_by_owner
            .entry(owner(&token.client_id, token.user_id.as_deref()))
            .or_default()
            .insert(token.token.clone());
        self.access_tokens.insert(token.token.clone(), token);
    }

    fn remove_access_token(&mut self, value: &str) -> Option<AccessToken> {
        let token = self.access_tokens.remove(value)?;
        let owner = owner(&token.client_id, token.user_id.as_deref());
        if let Some(tokens) = self.access_by_owner.get_mut(&owner) {
            tokens.remove(value);
            if tokens.is_empty() {
                self.access_by_owner.remove(&owner);
            }
        }
        Some(token)
    }

    fn insert_refresh_token(&mut self, stored: StoredRefreshToken) {
        self.refresh_by_key
            .insert(stored.key.clone(), stored.token.token.clone());
        self.refresh_tokens.insert(stored.token.token.clone(), stored);
    }

    fn remove_refresh_token(&mut self, value: &str) -> Option<StoredRefreshToken> {
        let stored = self.refresh_tokens.remove(value)?;
        if self.refresh_by_key.get(&stored.key).map(String::as_str) == Some(value) {
            self.refresh_by_key.remove(&stored.key);
        }
        Some(stored)
    }

    fn revert(&mut self, change: Change) {
        match change {
            Change::CodeRemoved(code) => {
                self.codes.insert(code.code.clone(), code);
            }
            Change::AccessTokenAdded(value) => {
                self.remove_access_token(&value);
            }
            Change::AccessTokenRemoved(token) => self.insert_access_token(token),
            Change::RefreshTokenAdded(value) => {
                self.remove_refresh_token(&value);
            }
            Change::RefreshTokenRemoved(stored) => self.insert_refresh_token(stored),
        }
    }

    fn find_code(&self, code: &str) -> Option<AuthorizationCode> {
        self.codes.get(code).cloned()
    }

    fn consume_code(
        &mut self,
        code: &str,
        now: OffsetDateTime,
        journal: &mut Vec<Change>,
    ) -> bool {
        match self.codes.get(code) {
            Some(stored) if !stored.is_expired_at(now) => match self.codes.remove(code) {
                Some(removed) => {
                    journal.push(Change::CodeRemoved(removed));
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    fn delete_expired_access_tokens(
        &mut self,
        client_id: &str,
        user_id: Option<&str>,
        now: OffsetDateTime,
        journal: &mut Vec<Change>,
    ) -> u64 {
        let Some(tokens) = self.access_by_owner.get(&owner(client_id, user_id)) else {
            return 0;
        };
        let expired: Vec<String> = tokens
            .iter()
            .filter(|value| {
                self.access_tokens
                    .get(value.as_str())
                    .is_some_and(|token| token.is_expired_at(now))
            })
            .cloned()
            .collect();

        let mut deleted = 0;
        for value in expired {
            if let Some(token) = self.remove_access_token(&value) {
                journal.push(Change::AccessTokenRemoved(token));
                deleted += 1;
            }
        }
        deleted
    }

    fn create_access_token(
        &mut self,
        token: &AccessToken,
        journal: &mut Vec<Change>,
    ) -> AuthResult<()> {
        if self.access_tokens.contains_key(&token.token) {
            return Err(AuthError::storage("access token value already exists"));
        }
        self.insert_access_token(token.clone());
        journal.push(Change::AccessTokenAdded(token.token.clone()));
        Ok(())
    }

    fn find_refresh_token(&self, token: &str) -> Option<RefreshToken> {
        self.refresh_tokens.get(token).map(|stored| stored.token.clone())
    }

    fn find_usable_refresh_token(
        &self,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> Option<RefreshToken> {
        self.refresh_by_key
            .get(key)
            .and_then(|value| self.refresh_tokens.get(value))
            .filter(|stored| stored.token.is_usable_at(now))
            .map(|stored| stored.token.clone())
    }

    fn create_refresh_token(
        &mut self,
        token: &RefreshToken,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
        journal: &mut Vec<Change>,
    ) -> AuthResult<RefreshTokenInsert> {
        if self.find_usable_refresh_token(key, now).is_some() {
            return Ok(RefreshTokenInsert::Conflict);
        }
        if self.refresh_tokens.contains_key(&token.token) {
            return Err(AuthError::storage("refresh token value already exists"));
        }

        // A stale token under the same key gives way to the new one.
        if let Some(stale) = self.refresh_by_key.get(key).cloned()
            && let Some(stored) = self.remove_refresh_token(&stale)
        {
            journal.push(Change::RefreshTokenRemoved(stored));
        }
        self.insert_refresh_token(StoredRefreshToken {
            key: key.clone(),
            token: token.clone(),
        });
        journal.push(Change::RefreshTokenAdded(token.token.clone()));
        Ok(RefreshTokenInsert::Created)
    }

    fn purge_expired(&mut self, now: OffsetDateTime) -> PurgeStats {
        let codes = self.codes.len();
        self.codes.retain(|_, code| !code.is_expired_at(now));

        let expired_access: Vec<String> = self
            .access_tokens
            .values()
            .filter(|token| token.is_expired_at(now))
            .map(|token| token.token.clone())
            .collect();
        for value in &expired_access {
            self.remove_access_token(value);
        }

        let stale_refresh: Vec<String> = self
            .refresh_tokens
            .values()
            .filter(|stored| !stored.token.is_usable_at(now))
            .map(|stored| stored.token.token.clone())
            .collect();
        for value in &stale_refresh {
            self.remove_refresh_token(value);
        }

        PurgeStats {
            codes: (codes - self.codes.len()) as u64,
            access_tokens: expired_access.len() as u64,
            refresh_tokens: stale_refresh.len() as u64,
        }
    }
}

// =============================================================================
// Token Store
// =============================================================================

/// In-memory token store.
///
/// Cloning yields another handle to the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenStore {
    tables: Arc<AsyncMutex<TokenTables>>,
}

impl InMemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all access tokens of a (client, user) pair, expired or not.
    pub async fn access_tokens_for(
        &self,
        client_id: &str,
        user_id: Option<&str>,
    ) -> Vec<AccessToken> {
        let tables = self.tables.lock().await;
        tables
            .access_by_owner
            .get(&owner(client_id, user_id))
            .into_iter()
            .flatten()
            .filter_map(|value| tables.access_tokens.get(value))
            .cloned()
            .collect()
    }

    /// Returns all refresh tokens of a (client, user) pair, usable or not.
    pub async fn refresh_tokens_for(
        &self,
        client_id: &str,
        user_id: Option<&str>,
    ) -> Vec<RefreshToken> {
        let tables = self.tables.lock().await;
        tables
            .refresh_tokens
            .values()
            .map(|stored| &stored.token)
            .filter(|t| t.client_id == client_id && t.user_id.as_deref() == user_id)
            .cloned()
            .collect()
    }
}

// Outside a transaction every write commits at once, so changes are not kept.
#[async_trait]
impl TokenRepository for InMemoryTokenStore {
    async fn find_code(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        Ok(self.tables.lock().await.find_code(code))
    }

    async fn consume_code(&self, code: &str, now: OffsetDateTime) -> AuthResult<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .consume_code(code, now, &mut Vec::new()))
    }

    async fn delete_expired_access_tokens(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<u64> {
        Ok(self.tables.lock().await.delete_expired_access_tokens(
            client_id,
            user_id,
            now,
            &mut Vec::new(),
        ))
    }

    async fn create_access_token(&self, token: &AccessToken) -> AuthResult<()> {
        self.tables
            .lock()
            .await
            .create_access_token(token, &mut Vec::new())
    }

    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.tables.lock().await.find_refresh_token(token))
    }

    async fn find_usable_refresh_token(
        &self,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshToken>> {
        Ok(self.tables.lock().await.find_usable_refresh_token(key, now))
    }

    async fn create_refresh_token(
        &self,
        token: &RefreshToken,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<RefreshTokenInsert> {
        self.tables
            .lock()
            .await
            .create_refresh_token(token, key, now, &mut Vec::new())
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn begin(&self) -> AuthResult<Box<dyn TokenTransaction>> {
        let tables = Arc::clone(&self.tables).lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            state: Mutex::new(TransactionState {
                tables,
                journal: Vec::new(),
            }),
        }))
    }

    async fn create_code(&self, code: &AuthorizationCode) -> AuthResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.codes.contains_key(&code.code) {
            return Err(AuthError::storage("authorization code already exists"));
        }
        tables.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> AuthResult<PurgeStats> {
        Ok(self.tables.lock().await.purge_expired(now))
    }
}

// =============================================================================
// Transaction
// =============================================================================

struct TransactionState {
    tables: OwnedMutexGuard<TokenTables>,
    journal: Vec<Change>,
}

impl TransactionState {
    fn undo(&mut self) {
        while let Some(change) = self.journal.pop() {
            self.tables.revert(change);
        }
    }
}

/// Unit of work over [`InMemoryTokenStore`].
///
/// Holds the store lock until committed, rolled back or dropped. Dropping
/// without a commit undoes every write.
pub struct InMemoryTransaction {
    state: Mutex<TransactionState>,
}

impl InMemoryTransaction {
    fn with_state<T>(&self, f: impl FnOnce(&mut TransactionState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .undo();
    }
}

#[async_trait]
impl TokenRepository for InMemoryTransaction {
    async fn find_code(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        Ok(self.with_state(|s| s.tables.find_code(code)))
    }

    async fn consume_code(&self, code: &str, now: OffsetDateTime) -> AuthResult<bool> {
        Ok(self.with_state(|s| s.tables.consume_code(code, now, &mut s.journal)))
    }

    async fn delete_expired_access_tokens(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<u64> {
        Ok(self.with_state(|s| {
            s.tables
                .delete_expired_access_tokens(client_id, user_id, now, &mut s.journal)
        }))
    }

    async fn create_access_token(&self, token: &AccessToken) -> AuthResult<()> {
        self.with_state(|s| s.tables.create_access_token(token, &mut s.journal))
    }

    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.with_state(|s| s.tables.find_refresh_token(token)))
    }

    async fn find_usable_refresh_token(
        &self,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshToken>> {
        Ok(self.with_state(|s| s.tables.find_usable_refresh_token(key, now)))
    }

    async fn create_refresh_token(
        &self,
        token: &RefreshToken,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<RefreshTokenInsert> {
        self.with_state(|s| {
            s.tables
                .create_refresh_token(token, key, now, &mut s.journal)
        })
    }
}

#[async_trait]
impl TokenTransaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> AuthResult<()> {
        self.with_state(|s| s.journal.clear());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        self.with_state(TransactionState::undo);
        Ok(())
    }
}

// =============================================================================
// Client and User Storage
// =============================================================================

#[derive(Debug, Clone)]
struct ClientEntry {
    client: Client,
    secret: Option<String>,
}

/// Fixed set of clients held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryClientStorage {
    clients: HashMap<String, ClientEntry>,
}

impl InMemoryClientStorage {
    /// Creates an empty client registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client. `secret` is ignored for public clients.
    #[must_use]
    pub fn with_client(mut self, client: Client, secret: Option<&str>) -> Self {
        let secret = if client.confidential {
            secret.map(str::to_string)
        } else {
            None
        };
        self.clients
            .insert(client.client_id.clone(), ClientEntry { client, secret });
        self
    }
}

#[async_trait]
impl ClientStorage for InMemoryClientStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.clients.get(client_id).map(|entry| entry.client.clone()))
    }

    async fn verify_secret(&self, client_id: &str, secret: &str) -> AuthResult<bool> {
        let Some(expected) = self
            .clients
            .get(client_id)
            .and_then(|entry| entry.secret.as_deref())
        else {
            return Ok(false);
        };
        Ok(expected.as_bytes().ct_eq(secret.as_bytes()).into())
    }
}

#[derive(Debug, Clone)]
struct UserEntry {
    user: User,
    password: String,
}

/// Fixed set of users held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStorage {
    users: HashMap<String, UserEntry>,
}

impl InMemoryUserStorage {
    /// Creates an empty user registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user with a plaintext password.
    #[must_use]
    pub fn with_user(mut self, user: User, password: impl Into<String>) -> Self {
        self.users.insert(
            user.id.clone(),
            UserEntry {
                user,
                password: password.into(),
            },
        );
        self
    }
}

#[async_trait]
impl UserStorage for InMemoryUserStorage {
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<User>> {
        Ok(self.users.get(user_id).map(|entry| entry.user.clone()))
    }

    async fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<User>> {
        let Some(entry) = self.users.values().find(|e| e.user.username == username) else {
            return Ok(None);
        };
        let matches: bool = entry.password.as_bytes().ct_eq(password.as_bytes()).into();
        Ok(matches.then(|| entry.user.clone()))
    }
}
