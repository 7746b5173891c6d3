//! # tollgate-auth
//!
//! Token-issuance core of the Tollgate OAuth 2.0 authorization server.
//!
//! This crate turns a validated grant into access credentials:
//!
//! - single-use authorization code exchange
//! - bounded-lifetime access tokens with expiry cleanup
//! - idempotent refresh-token get-or-create
//! - grant dispatch with client authentication
//!
//! ## Modules
//!
//! - [`config`] - Token lifecycle configuration
//! - [`oauth`] - Grant coordinator, code exchanger, client authentication, wire types
//! - [`token`] - Access and refresh token issuers, token value generation
//! - [`storage`] - Token store contract (with unit of work) and in-memory backends
//! - [`clock`] - Injectable time source
//! - [`http`] - Axum handler for the token endpoint

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod storage;
pub mod token;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, OAuthConfig, RefreshTokenScoping};
pub use error::{AuthError, ErrorCategory};
pub use http::{TokenState, oauth_router, token_handler};
pub use oauth::{
    AuthorizationCodeExchanger, ClientCredentials, GrantCoordinator, TokenError, TokenErrorCode,
    TokenRequest, TokenResponse,
};
pub use storage::{
    ClientStorage, InMemoryClientStorage, InMemoryTokenStore, InMemoryUserStorage, PurgeStats,
    RefreshTokenInsert, RefreshTokenKey, TokenRepository, TokenStore, TokenTransaction,
    UserStorage,
};
pub use token::{
    AccessTokenIssuer, RefreshTokenIssuer, SecureTokenGenerator, SequentialTokenGenerator,
    TokenGenerator,
};
pub use types::{AccessToken, AuthorizationCode, Client, GrantType, RefreshToken, User};

/// Type alias for token-core results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tollgate_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::OAuthConfig;
    pub use crate::error::AuthError;
    pub use crate::oauth::{ClientCredentials, GrantCoordinator, TokenRequest, TokenResponse};
    pub use crate::storage::{ClientStorage, TokenRepository, TokenStore, UserStorage};
    pub use crate::types::{Client, GrantType, User};
}
