//! OAuth token lifecycle configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! access_token_lifetime = "1h"
//! refresh_token_lifetime = "90d"
//! refresh_token_scoping = "client_user"
//! grant_types = ["authorization_code", "refresh_token"]
//! store_timeout = "5s"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::GrantType;

/// Upper bound accepted for any configured token lifetime (10 years).
const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// How refresh tokens are keyed for get-or-create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTokenScoping {
    /// One usable refresh token per (client, user); scope is carried along
    /// but does not distinguish tokens.
    #[default]
    ClientUser,
    /// One usable refresh token per (client, user, scope).
    ClientUserScope,
}

/// OAuth 2.0 token lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Access token lifetime, reported to clients as `expires_in`.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime. `None` issues non-expiring refresh tokens.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Option<Duration>,

    /// Uniqueness key used by refresh-token get-or-create.
    pub refresh_token_scoping: RefreshTokenScoping,

    /// Grant types accepted by the token endpoint.
    pub grant_types: Vec<GrantType>,

    /// Upper bound on the storage work of a single grant request.
    #[serde(with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: None,
            refresh_token_scoping: RefreshTokenScoping::default(),
            grant_types: vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::ClientCredentials,
                GrantType::Password,
            ],
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl OAuthConfig {
    /// Returns `true` if the grant type is enabled.
    #[must_use]
    pub fn is_grant_type_enabled(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a lifetime or timeout is zero
    /// or exceeds ten years, and `ConfigError::Missing` if no grant type is
    /// enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_lifetime("access_token_lifetime", self.access_token_lifetime)?;

        if let Some(lifetime) = self.refresh_token_lifetime {
            check_lifetime("refresh_token_lifetime", lifetime)?;
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "store_timeout must be > 0".to_string(),
            ));
        }

        if self.grant_types.is_empty() {
            return Err(ConfigError::Missing("grant_types".to_string()));
        }

        Ok(())
    }
}

fn check_lifetime(name: &str, lifetime: Duration) -> Result<(), ConfigError> {
    if lifetime.is_zero() {
        return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
    }
    if lifetime > MAX_LIFETIME {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must not exceed 10 years"
        )));
    }
    Ok(())
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}
