//! Grant dispatch for the token endpoint.
//!
//! [`GrantCoordinator`] authenticates the client, picks the handler for the
//! grant type and runs it. Grants that consume something (a code) or issue a
//! refresh token run inside one unit of work: either every write commits or
//! none does.
//!
//! # Usage
//!
//! ```ignore
//! use tollgate_auth::oauth::{ClientCredentials, GrantCoordinator};
//!
//! let coordinator = GrantCoordinator::new(store, clients, config)?;
//! let credentials = ClientCredentials::extract(authorization, &request)?;
//! let response = coordinator.grant(&credentials, &request).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::AuthResult;
use crate::clock::{Clock, SystemClock};
use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::oauth::client_auth::{ClientCredentials, authenticate_client};
use crate::oauth::exchanger::AuthorizationCodeExchanger;
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::storage::{ClientStorage, TokenStore, TokenTransaction, UserStorage};
use crate::token::{AccessTokenIssuer, RefreshTokenIssuer, SecureTokenGenerator, TokenGenerator};
use crate::types::{Client, GrantType};

/// Top-level token endpoint logic.
pub struct GrantCoordinator {
    store: Arc<dyn TokenStore>,
    clients: Arc<dyn ClientStorage>,
    users: Option<Arc<dyn UserStorage>>,
    exchanger: AuthorizationCodeExchanger,
    access: AccessTokenIssuer,
    refresh: RefreshTokenIssuer,
    clock: Arc<dyn Clock>,
    config: OAuthConfig,
}

impl GrantCoordinator {
    /// Creates a coordinator with the system clock and secure token values.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `config` is invalid.
    pub fn new(
        store: Arc<dyn TokenStore>,
        clients: Arc<dyn ClientStorage>,
        config: OAuthConfig,
    ) -> AuthResult<Self> {
        Self::with_collaborators(
            store,
            clients,
            config,
            Arc::new(SecureTokenGenerator),
            Arc::new(SystemClock),
        )
    }

    /// Creates a coordinator with an explicit token generator and clock.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if `config` is invalid.
    pub fn with_collaborators(
        store: Arc<dyn TokenStore>,
        clients: Arc<dyn ClientStorage>,
        config: OAuthConfig,
        generator: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let access_lifetime = to_time_duration(config.access_token_lifetime)?;
        let refresh_lifetime = config
            .refresh_token_lifetime
            .map(to_time_duration)
            .transpose()?;

        Ok(Self {
            store,
            clients,
            users: None,
            exchanger: AuthorizationCodeExchanger::new(clock.clone()),
            access: AccessTokenIssuer::new(generator.clone(), clock.clone(), access_lifetime),
            refresh: RefreshTokenIssuer::new(
                generator,
                clock.clone(),
                refresh_lifetime,
                config.refresh_token_scoping,
            ),
            clock,
            config,
        })
    }

    /// Enables the password grant and active-user checks.
    #[must_use]
    pub fn with_user_storage(mut self, users: Arc<dyn UserStorage>) -> Self {
        self.users = Some(users);
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Process a token request.
    ///
    /// The whole grant, client authentication included, is bounded by
    /// `store_timeout`; running out of time is a storage error and any
    /// open unit of work is discarded.
    ///
    /// # Errors
    ///
    /// Returns the classified [`AuthError`] of the first failing step.
    pub async fn grant(
        &self,
        credentials: &ClientCredentials,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        match tokio::time::timeout(self.config.store_timeout, self.dispatch(credentials, request))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    client_id = %credentials.client_id,
                    grant_type = %request.grant_type,
                    "Token request timed out"
                );
                Err(AuthError::storage("Token store timed out"))
            }
        }
    }

    async fn dispatch(
        &self,
        credentials: &ClientCredentials,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        // 1. Authenticate client
        let client = authenticate_client(credentials, self.clients.as_ref()).await?;

        // 2. Resolve grant type
        let grant_type = GrantType::parse(&request.grant_type)
            .filter(|grant_type| self.config.is_grant_type_enabled(*grant_type))
            .ok_or_else(|| AuthError::unsupported_grant_type(&request.grant_type))?;

        if !client.is_grant_type_allowed(grant_type) {
            return Err(AuthError::unauthorized_client(format!(
                "Client is not allowed to use the {grant_type} grant"
            )));
        }

        debug!(
            client_id = %client.client_id,
            grant_type = %grant_type,
            auth_method = %credentials.method,
            "Processing token request"
        );

        // 3. Run the grant
        let response = match grant_type {
            GrantType::AuthorizationCode => self.authorization_code(&client, request).await?,
            GrantType::RefreshToken => self.refresh_token(&client, request).await?,
            GrantType::ClientCredentials => self.client_credentials(&client, request).await?,
            GrantType::Password => self.password(&client, request).await?,
        };

        info!(
            client_id = %client.client_id,
            grant_type = %grant_type,
            refresh_token = response.refresh_token.is_some(),
            "Issued access token"
        );

        Ok(response)
    }

    // =========================================================================
    // Grant handlers
    // =========================================================================

    async fn authorization_code(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let code = required(request.code.as_deref(), "code")?;

        let tx = self.store.begin().await?;
        let result = async {
            let granted = self
                .exchanger
                .exchange(&*tx, code, client, request.redirect_uri.as_deref())
                .await?;
            self.ensure_user_active(&granted.user_id).await?;
            self.issue_pair(&*tx, client, Some(&granted.user_id), &granted.scope)
                .await
        }
        .await;
        finish(tx, result).await
    }

    async fn refresh_token(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        let value = required(request.refresh_token.as_deref(), "refresh_token")?;

        let tx = self.store.begin().await?;
        let result = async {
            let stored = tx
                .find_refresh_token(value)
                .await?
                .ok_or_else(|| AuthError::invalid_grant("Refresh token not found"))?;

            if !stored.is_usable_at(self.clock.now()) {
                return Err(AuthError::invalid_grant("Refresh token expired"));
            }
            if stored.client_id != client.client_id {
                return Err(AuthError::invalid_grant(
                    "Refresh token was issued to another client",
                ));
            }
            if let Some(user_id) = stored.user_id.as_deref() {
                self.ensure_user_active(user_id).await?;
            }

            let scope = determine_refresh_scope(&stored.scope, request.scope.as_deref())?;
            self.issue_pair(&*tx, client, stored.user_id.as_deref(), &scope)
                .await
        }
        .await;
        finish(tx, result).await
    }

    async fn client_credentials(
        &self,
        client: &Client,
        request: &TokenRequest,
    ) -> AuthResult<TokenResponse> {
        if !client.confidential {
            return Err(AuthError::unauthorized_client(
                "Public clients cannot use the client_credentials grant",
            ));
        }

        let scope = requested_scope(client, request.scope.as_deref())?;
        let token = self
            .access
            .issue(self.store.as_ref(), &client.client_id, None, &scope)
            .await?;

        Ok(TokenResponse::new(token.token, self.access.expires_in(), token.scope))
    }

    async fn password(&self, client: &Client, request: &TokenRequest) -> AuthResult<TokenResponse> {
        let users = self
            .users
            .as_ref()
            .ok_or_else(|| AuthError::unsupported_grant_type(GrantType::Password.as_str()))?;
        let username = required(request.username.as_deref(), "username")?;
        let password = required(request.password.as_deref(), "password")?;

        let user = users
            .verify_credentials(username, password)
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| AuthError::invalid_grant("Invalid resource owner credentials"))?;

        let scope = requested_scope(client, request.scope.as_deref())?;

        let tx = self.store.begin().await?;
        let result = self
            .issue_pair(&*tx, client, Some(&user.id), &scope)
            .await;
        finish(tx, result).await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Issues an access token, plus a refresh token when the client may
    /// use the refresh_token grant.
    async fn issue_pair(
        &self,
        repo: &dyn TokenTransaction,
        client: &Client,
        user_id: Option<&str>,
        scope: &str,
    ) -> AuthResult<TokenResponse> {
        let client_id = client.client_id.as_str();
        let access = self.access.issue(repo, client_id, user_id, scope).await?;
        let response = TokenResponse::new(access.token, self.access.expires_in(), access.scope);

        if !self.config.is_grant_type_enabled(GrantType::RefreshToken)
            || !client.is_grant_type_allowed(GrantType::RefreshToken)
        {
            return Ok(response);
        }

        let refresh = self
            .refresh
            .get_or_create(repo, client_id, user_id, scope)
            .await?;
        Ok(response.with_refresh_token(refresh.token))
    }

    async fn ensure_user_active(&self, user_id: &str) -> AuthResult<()> {
        let Some(users) = &self.users else {
            return Ok(());
        };

        match users.find_by_id(user_id).await? {
            Some(user) if user.active => Ok(()),
            _ => Err(AuthError::invalid_grant("User is not active")),
        }
    }
}

/// Commits on success, rolls back on failure.
async fn finish(
    tx: Box<dyn TokenTransaction>,
    result: AuthResult<TokenResponse>,
) -> AuthResult<TokenResponse> {
    match result {
        Ok(response) => {
            tx.commit().await?;
            Ok(response)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back token transaction");
            }
            Err(err)
        }
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> AuthResult<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("Missing required parameter: {name}")))
}

/// Requested scope for grants that start from the client registration.
fn requested_scope(client: &Client, requested: Option<&str>) -> AuthResult<String> {
    let scope = match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(requested) => requested.to_string(),
        None => client.default_scope(),
    };

    if !client.is_scope_allowed(&scope) {
        return Err(AuthError::invalid_scope(
            "Requested scope is not allowed for this client",
        ));
    }

    Ok(scope)
}

/// A refresh may narrow the original scope, never widen it.
fn determine_refresh_scope(original: &str, requested: Option<&str>) -> AuthResult<String> {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(original.to_string()),
        Some(requested) => {
            let original_scopes: HashSet<&str> = original.split_whitespace().collect();
            let requested_scopes: HashSet<&str> = requested.split_whitespace().collect();

            if !requested_scopes.is_subset(&original_scopes) {
                return Err(AuthError::invalid_scope(
                    "Requested scope exceeds original grant",
                ));
            }

            Ok(requested.to_string())
        }
    }
}

fn to_time_duration(duration: std::time::Duration) -> AuthResult<time::Duration> {
    time::Duration::try_from(duration)
        .map_err(|_| AuthError::configuration("token lifetime out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_refresh_scope() {
        assert_eq!(determine_refresh_scope("read write", None).unwrap(), "read write");
        assert_eq!(determine_refresh_scope("read write", Some("  ")).unwrap(), "read write");
        assert_eq!(determine_refresh_scope("read write", Some("read")).unwrap(), "read");
        assert!(matches!(
            determine_refresh_scope("read", Some("read admin")),
            Err(AuthError::InvalidScope { .. })
        ));
    }

    #[test]
    fn test_required_treats_empty_as_missing() {
        assert_eq!(required(Some("abc"), "code").unwrap(), "abc");
        let err = required(Some(""), "code").unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: Missing required parameter: code");
        assert!(required(None, "code").is_err());
    }

    #[test]
    fn test_requested_scope_defaults_to_client_scopes() {
        let client = Client {
            client_id: "svc".to_string(),
            name: "Service".to_string(),
            confidential: true,
            active: true,
            redirect_uris: vec![],
            scopes: vec!["read".to_string(), "write".to_string()],
            grant_types: vec![GrantType::ClientCredentials],
        };
        assert_eq!(requested_scope(&client, None).unwrap(), "read write");
        assert_eq!(requested_scope(&client, Some("write")).unwrap(), "write");
        assert!(matches!(
            requested_scope(&client, Some("admin")),
            Err(AuthError::InvalidScope { .. })
        ));
    }
}
