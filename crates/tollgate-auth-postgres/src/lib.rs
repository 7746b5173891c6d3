//! PostgreSQL token store for Tollgate
//!
//! Persists the three token-core tables:
//!
//! - `oauth_authorization_code` - single-use authorization codes
//! - `oauth_access_token` - bearer access tokens
//! - `oauth_refresh_token` - refresh tokens, unique per refresh key
//!
//! Grant handling runs in a database transaction opened by
//! [`TokenStore::begin`](tollgate_auth::TokenStore::begin). Code consumption
//! is a conditional `DELETE` and refresh-token creation is an
//! `INSERT ... ON CONFLICT DO NOTHING` against a unique index, so both stay
//! correct across server instances sharing one database.
//!
//! # Example
//!
//! ```ignore
//! use tollgate_auth_postgres::PostgresTokenStore;
//!
//! let store = PostgresTokenStore::connect("postgres://localhost/tollgate").await?;
//! store.create_tables_if_not_exist().await?;
//! ```

pub mod pool;
pub mod queries;
pub mod schema;
pub mod store;

use tollgate_auth::AuthError;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use pool::{PostgresConfig, create_pool};
pub use store::{PostgresTokenStore, PostgresTokenTransaction};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// A unique constraint rejected the insert.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The transaction was already committed or rolled back.
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl StorageError {
    // -------------------------------------------------------------------------
    // Constructor Methods
    // -------------------------------------------------------------------------

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a `Transaction` error.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction(message.into())
    }

    // -------------------------------------------------------------------------
    // Predicate Methods
    // -------------------------------------------------------------------------

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if this is a database error.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    /// Maps a unique violation to `Conflict`, anything else to `Database`.
    pub(crate) fn from_insert(error: sqlx_core::Error, what: &str) -> Self {
        if let sqlx_core::Error::Database(ref db_err) = error
            && db_err.is_unique_violation()
        {
            return Self::conflict(format!("{what} already exists"));
        }
        Self::from(error)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Every storage failure surfaces to the token core as an infrastructure
/// error; the driver message is kept for logs, never sent to clients.
impl From<StorageError> for AuthError {
    fn from(error: StorageError) -> Self {
        AuthError::storage(error.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_auth::TokenErrorCode;

    #[test]
    fn test_error_classification() {
        assert!(StorageError::conflict("token").is_conflict());
        assert!(!StorageError::conflict("token").is_database_error());
        assert!(!StorageError::transaction("done").is_conflict());
        assert!(StorageError::from(sqlx_core::Error::PoolTimedOut).is_database_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            StorageError::conflict("Access token already exists").to_string(),
            "Conflict: Access token already exists"
        );
    }

    #[test]
    fn test_non_unique_insert_error_is_database() {
        let err = StorageError::from_insert(sqlx_core::Error::PoolClosed, "Access token");
        assert!(err.is_database_error());
    }

    #[test]
    fn test_converts_to_storage_auth_error() {
        let err: AuthError = StorageError::from(sqlx_core::Error::PoolTimedOut).into();
        assert!(matches!(err, AuthError::Storage { .. }));
        assert!(err.is_server_error());
        assert_eq!(TokenErrorCode::from(&err).http_status(), 500);
    }
}
