//! Table bootstrap.

use sqlx_core::query::query;
use tracing::{info, instrument};

use crate::{PgPool, StorageResult};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS oauth_authorization_code (
        code TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        scope TEXT NOT NULL,
        redirect_uri TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_oauth_authorization_code_expires_at
    ON oauth_authorization_code(expires_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS oauth_access_token (
        token TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT,
        scope TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    // Expiry cleanup on issuance filters by owner
    r#"
    CREATE INDEX IF NOT EXISTS idx_oauth_access_token_owner
    ON oauth_access_token(client_id, user_id, expires_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_oauth_access_token_expires_at
    ON oauth_access_token(expires_at)
    "#,
    // user_key / scope_key are the non-null key columns; '' stands for "absent"
    r#"
    CREATE TABLE IF NOT EXISTS oauth_refresh_token (
        token TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        user_id TEXT,
        scope TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ,
        user_key TEXT NOT NULL,
        scope_key TEXT NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_oauth_refresh_token_key
    ON oauth_refresh_token(client_id, user_key, scope_key)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_oauth_refresh_token_expires_at
    ON oauth_refresh_token(expires_at)
    WHERE expires_at IS NOT NULL
    "#,
];

/// Create the token tables and their indexes.
///
/// Idempotent; called during server bootstrap.
///
/// # Errors
///
/// Returns an error if any DDL statement fails.
#[instrument(skip(pool))]
pub async fn create_tables_if_not_exist(pool: &PgPool) -> StorageResult<()> {
    for statement in STATEMENTS {
        query(statement).execute(pool).await?;
    }

    info!("OAuth token tables created");

    Ok(())
}
