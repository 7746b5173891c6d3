//! `TokenStore` implementation over a PostgreSQL pool.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::pool::PoolConnection;
use sqlx_core::query::query;
use sqlx_postgres::{PgConnection, PgTransaction, Postgres};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tollgate_auth::{
    AccessToken, AuthResult, AuthorizationCode, PurgeStats, RefreshToken, RefreshTokenInsert,
    RefreshTokenKey, TokenRepository, TokenStore, TokenTransaction,
};

use crate::pool::{PostgresConfig, create_pool};
use crate::{PgPool, StorageError, StorageResult, queries, schema};

// =============================================================================
// Store
// =============================================================================

/// PostgreSQL-backed token store.
///
/// Calls made directly on the store run on a pooled connection, one
/// statement (or one short transaction) per call. Grant handling goes
/// through [`TokenStore::begin`].
#[derive(Debug, Clone)]
pub struct PostgresTokenStore {
    pool: Arc<PgPool>,
}

impl PostgresTokenStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a store by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let config = PostgresConfig {
            url: database_url.to_string(),
            ..PostgresConfig::default()
        };
        Self::from_config(&config).await
    }

    /// Create a store from connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the token tables if they do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn create_tables_if_not_exist(&self) -> StorageResult<()> {
        schema::create_tables_if_not_exist(&self.pool).await
    }

    async fn acquire(&self) -> StorageResult<PoolConnection<Postgres>> {
        Ok(self.pool.acquire().await?)
    }
}

#[async_trait]
impl TokenRepository for PostgresTokenStore {
    async fn find_code(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        let mut conn = self.acquire().await?;
        Ok(queries::find_code(&mut conn, code).await?)
    }

    async fn consume_code(&self, code: &str, now: OffsetDateTime) -> AuthResult<bool> {
        let mut conn = self.acquire().await?;
        Ok(queries::consume_code(&mut conn, code, now).await?)
    }

    async fn delete_expired_access_tokens(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<u64> {
        let mut conn = self.acquire().await?;
        Ok(queries::delete_expired_access_tokens(&mut conn, client_id, user_id, now).await?)
    }

    async fn create_access_token(&self, token: &AccessToken) -> AuthResult<()> {
        let mut conn = self.acquire().await?;
        Ok(queries::insert_access_token(&mut conn, token).await?)
    }

    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
        let mut conn = self.acquire().await?;
        Ok(queries::find_refresh_token(&mut conn, token).await?)
    }

    async fn find_usable_refresh_token(
        &self,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshToken>> {
        let mut conn = self.acquire().await?;
        Ok(queries::find_usable_refresh_token(&mut conn, key, now).await?)
    }

    async fn create_refresh_token(
        &self,
        token: &RefreshToken,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<RefreshTokenInsert> {
        // Stale-token cleanup and insert commit together
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        let outcome = queries::insert_refresh_token(&mut tx, token, key, now).await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(outcome)
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn begin(&self) -> AuthResult<Box<dyn TokenTransaction>> {
        let tx = self.pool.begin().await.map_err(StorageError::from)?;
        Ok(Box::new(PostgresTokenTransaction::new(tx)))
    }

    async fn create_code(&self, code: &AuthorizationCode) -> AuthResult<()> {
        let mut conn = self.acquire().await?;
        Ok(queries::insert_code(&mut conn, code).await?)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> AuthResult<PurgeStats> {
        let mut conn = self.acquire().await?;
        Ok(queries::purge_expired(&mut conn, now).await?)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A database transaction used as a token-store unit of work.
///
/// The sqlx transaction rolls back when dropped uncommitted.
pub struct PostgresTokenTransaction {
    /// `None` once committed or rolled back.
    tx: Mutex<Option<Box<PgTransaction<'static>>>>,
}

impl PostgresTokenTransaction {
    /// Wraps an open sqlx transaction.
    #[must_use]
    pub fn new(tx: PgTransaction<'static>) -> Self {
        Self {
            tx: Mutex::new(Some(Box::new(tx))),
        }
    }
}

fn completed() -> StorageError {
    StorageError::transaction("Transaction already completed (committed or rolled back)")
}

/// Runs a query on the open transaction's connection.
macro_rules! with_tx {
    ($self:ident, |$conn:ident| $body:expr) => {{
        let mut guard = $self.tx.lock().await;
        let tx = guard.as_deref_mut().ok_or_else(completed)?;
        let $conn: &mut PgConnection = &mut **tx;
        Ok($body.await?)
    }};
}

#[async_trait]
impl TokenRepository for PostgresTokenTransaction {
    async fn find_code(&self, code: &str) -> AuthResult<Option<AuthorizationCode>> {
        with_tx!(self, |conn| queries::find_code(conn, code))
    }

    async fn consume_code(&self, code: &str, now: OffsetDateTime) -> AuthResult<bool> {
        with_tx!(self, |conn| queries::consume_code(conn, code, now))
    }

    /// Runs under a savepoint; a failed cleanup leaves the transaction usable.
    async fn delete_expired_access_tokens(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<u64> {
        with_tx!(self, |conn| delete_under_savepoint(
            conn, client_id, user_id, now
        ))
    }

    async fn create_access_token(&self, token: &AccessToken) -> AuthResult<()> {
        with_tx!(self, |conn| queries::insert_access_token(conn, token))
    }

    async fn find_refresh_token(&self, token: &str) -> AuthResult<Option<RefreshToken>> {
        with_tx!(self, |conn| queries::find_refresh_token(conn, token))
    }

    async fn find_usable_refresh_token(
        &self,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<Option<RefreshToken>> {
        with_tx!(self, |conn| queries::find_usable_refresh_token(conn, key, now))
    }

    async fn create_refresh_token(
        &self,
        token: &RefreshToken,
        key: &RefreshTokenKey,
        now: OffsetDateTime,
    ) -> AuthResult<RefreshTokenInsert> {
        with_tx!(self, |conn| queries::insert_refresh_token(
            conn, token, key, now
        ))
    }
}

#[async_trait]
impl TokenTransaction for PostgresTokenTransaction {
    async fn commit(self: Box<Self>) -> AuthResult<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await.map_err(|e| {
                StorageError::transaction(format!("Failed to commit transaction: {e}"))
            })?;
            debug!("Token transaction committed");
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await.map_err(|e| {
                StorageError::transaction(format!("Failed to rollback transaction: {e}"))
            })?;
            debug!("Token transaction rolled back");
        }
        Ok(())
    }
}

impl Drop for PostgresTokenTransaction {
    fn drop(&mut self) {
        if self.tx.get_mut().is_some() {
            warn!("PostgresTokenTransaction dropped without commit/rollback - will auto-rollback");
        }
    }
}

async fn delete_under_savepoint(
    conn: &mut PgConnection,
    client_id: &str,
    user_id: Option<&str>,
    now: OffsetDateTime,
) -> StorageResult<u64> {
    query("SAVEPOINT expired_access_tokens")
        .execute(&mut *conn)
        .await?;

    match queries::delete_expired_access_tokens(conn, client_id, user_id, now).await {
        Ok(removed) => {
            query("RELEASE SAVEPOINT expired_access_tokens")
                .execute(&mut *conn)
                .await?;
            Ok(removed)
        }
        Err(e) => {
            query("ROLLBACK TO SAVEPOINT expired_access_tokens")
                .execute(&mut *conn)
                .await?;
            Err(e)
        }
    }
}
