//! SQL for the token tables.
//!
//! Every function takes a plain connection so the same statement runs on a
//! pooled connection or inside a transaction.

use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgConnection;
use time::OffsetDateTime;

use tollgate_auth::{
    AccessToken, AuthorizationCode, PurgeStats, RefreshToken, RefreshTokenInsert, RefreshTokenKey,
};

use crate::{StorageError, StorageResult};

type CodeRow = (
    String,
    String,
    String,
    String,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
);

type RefreshRow = (
    String,
    String,
    Option<String>,
    String,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

fn code_from_row(row: CodeRow) -> AuthorizationCode {
    AuthorizationCode {
        code: row.0,
        client_id: row.1,
        user_id: row.2,
        scope: row.3,
        redirect_uri: row.4,
        created_at: row.5,
        expires_at: row.6,
    }
}

fn refresh_from_row(row: RefreshRow) -> RefreshToken {
    RefreshToken {
        token: row.0,
        client_id: row.1,
        user_id: row.2,
        scope: row.3,
        created_at: row.4,
        expires_at: row.5,
    }
}

/// Non-null key column for an optional user.
fn user_key(key: &RefreshTokenKey) -> &str {
    key.user_id.as_deref().unwrap_or("")
}

/// Non-null key column for an optional scope.
fn scope_key(key: &RefreshTokenKey) -> &str {
    key.scope.as_deref().unwrap_or("")
}

// =============================================================================
// Authorization Codes
// =============================================================================

pub async fn find_code(
    conn: &mut PgConnection,
    code: &str,
) -> StorageResult<Option<AuthorizationCode>> {
    let row: Option<CodeRow> = query_as(
        r#"
        SELECT code, client_id, user_id, scope, redirect_uri, created_at, expires_at
        FROM oauth_authorization_code
        WHERE code = $1
        "#,
    )
    .bind(code)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(code_from_row))
}

/// Conditional delete; `true` only for the statement that removed the row.
pub async fn consume_code(
    conn: &mut PgConnection,
    code: &str,
    now: OffsetDateTime,
) -> StorageResult<bool> {
    let result = query(
        r#"
        DELETE FROM oauth_authorization_code
        WHERE code = $1 AND expires_at > $2
        "#,
    )
    .bind(code)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn insert_code(conn: &mut PgConnection, code: &AuthorizationCode) -> StorageResult<()> {
    query(
        r#"
        INSERT INTO oauth_authorization_code
            (code, client_id, user_id, scope, redirect_uri, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&code.code)
    .bind(&code.client_id)
    .bind(&code.user_id)
    .bind(&code.scope)
    .bind(&code.redirect_uri)
    .bind(code.created_at)
    .bind(code.expires_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| StorageError::from_insert(e, "Authorization code"))?;

    Ok(())
}

// =============================================================================
// Access Tokens
// =============================================================================

pub async fn delete_expired_access_tokens(
    conn: &mut PgConnection,
    client_id: &str,
    user_id: Option<&str>,
    now: OffsetDateTime,
) -> StorageResult<u64> {
    let result = query(
        r#"
        DELETE FROM oauth_access_token
        WHERE client_id = $1
          AND user_id IS NOT DISTINCT FROM $2
          AND expires_at <= $3
        "#,
    )
    .bind(client_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert_access_token(conn: &mut PgConnection, token: &AccessToken) -> StorageResult<()> {
    query(
        r#"
        INSERT INTO oauth_access_token
            (token, client_id, user_id, scope, created_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&token.token)
    .bind(&token.client_id)
    .bind(&token.user_id)
    .bind(&token.scope)
    .bind(token.created_at)
    .bind(token.expires_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| StorageError::from_insert(e, "Access token"))?;

    Ok(())
}

// =============================================================================
// Refresh Tokens
// =============================================================================

pub async fn find_refresh_token(
    conn: &mut PgConnection,
    token: &str,
) -> StorageResult<Option<RefreshToken>> {
    let row: Option<RefreshRow> = query_as(
        r#"
        SELECT token, client_id, user_id, scope, created_at, expires_at
        FROM oauth_refresh_token
        WHERE token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(refresh_from_row))
}

pub async fn find_usable_refresh_token(
    conn: &mut PgConnection,
    key: &RefreshTokenKey,
    now: OffsetDateTime,
) -> StorageResult<Option<RefreshToken>> {
    let row: Option<RefreshRow> = query_as(
        r#"
        SELECT token, client_id, user_id, scope, created_at, expires_at
        FROM oauth_refresh_token
        WHERE client_id = $1
          AND user_key = $2
          AND scope_key = $3
          AND (expires_at IS NULL OR expires_at > $4)
        "#,
    )
    .bind(&key.client_id)
    .bind(user_key(key))
    .bind(scope_key(key))
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(refresh_from_row))
}

/// Clears stale tokens under `key`, then inserts unless the key is taken.
///
/// A concurrent inserter holding the same key blocks on the unique index
/// until the winner commits; the loser then sees the conflict.
pub async fn insert_refresh_token(
    conn: &mut PgConnection,
    token: &RefreshToken,
    key: &RefreshTokenKey,
    now: OffsetDateTime,
) -> StorageResult<RefreshTokenInsert> {
    query(
        r#"
        DELETE FROM oauth_refresh_token
        WHERE client_id = $1
          AND user_key = $2
          AND scope_key = $3
          AND expires_at IS NOT NULL
          AND expires_at <= $4
        "#,
    )
    .bind(&key.client_id)
    .bind(user_key(key))
    .bind(scope_key(key))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let inserted: Option<(String,)> = query_as(
        r#"
        INSERT INTO oauth_refresh_token
            (token, client_id, user_id, scope, created_at, expires_at, user_key, scope_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (client_id, user_key, scope_key) DO NOTHING
        RETURNING token
        "#,
    )
    .bind(&token.token)
    .bind(&token.client_id)
    .bind(&token.user_id)
    .bind(&token.scope)
    .bind(token.created_at)
    .bind(token.expires_at)
    .bind(user_key(key))
    .bind(scope_key(key))
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| StorageError::from_insert(e, "Refresh token"))?;

    Ok(match inserted {
        Some(_) => RefreshTokenInsert::Created,
        None => RefreshTokenInsert::Conflict,
    })
}

// =============================================================================
// Housekeeping
// =============================================================================

pub async fn purge_expired(conn: &mut PgConnection, now: OffsetDateTime) -> StorageResult<PurgeStats> {
    let codes = query("DELETE FROM oauth_authorization_code WHERE expires_at <= $1")
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let access_tokens = query("DELETE FROM oauth_access_token WHERE expires_at <= $1")
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let refresh_tokens = query(
        "DELETE FROM oauth_refresh_token WHERE expires_at IS NOT NULL AND expires_at <= $1",
    )
    .bind(now)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok(PurgeStats {
        codes,
        access_tokens,
        refresh_tokens,
    })
}
