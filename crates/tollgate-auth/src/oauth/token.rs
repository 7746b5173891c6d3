//! Token endpoint wire types.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` - exchange a single-use code for tokens
//! - `refresh_token` - obtain a new access token
//! - `client_credentials` - machine-to-machine access
//! - `password` - resource owner credentials

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuthError;

/// Token request parameters, as posted to the token endpoint.
///
/// Required fields depend on `grant_type`:
///
/// - `authorization_code`: code, redirect_uri (if used at authorization)
/// - `refresh_token`: refresh_token, (optional) scope
/// - `client_credentials`: (optional) scope
/// - `password`: username, password, (optional) scope
///
/// Clients authenticate with HTTP Basic (not in this struct), with
/// `client_id` + `client_secret` in the body, or with `client_id` alone
/// when public.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    pub grant_type: String,

    /// Authorization code (for authorization_code grant).
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI (must match authorization request).
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Client ID (for public clients or client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (for client_secret_post authentication).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Refresh token (for refresh_token grant).
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,

    /// Username (for password grant).
    #[serde(default)]
    pub username: Option<String>,

    /// Password (for password grant).
    #[serde(default)]
    pub password: Option<String>,
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "2YotnFZFEjr1zCsicMWpAA",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "read",
///   "refresh_token": "tGzv3JOkF0XG5Qx2TlKWIA"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scope.
    pub scope: String,

    /// Refresh token, when the grant yields one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    /// Creates a bearer token response without a refresh token.
    #[must_use]
    pub fn new(access_token: String, expires_in: u64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
        }
    }

    /// Adds a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }
}

/// Token error response.
///
/// ```json
/// {
///   "error": "invalid_grant",
///   "error_description": "Authorization code expired"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenError {
    /// OAuth 2.0 error code.
    pub error: TokenErrorCode,

    /// Human-readable error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenError {
    /// Creates a new token error with description.
    #[must_use]
    pub fn with_description(error: TokenErrorCode, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
        }
    }

}

impl From<&AuthError> for TokenError {
    /// Server-side failures are reported without their internal detail.
    fn from(err: &AuthError) -> Self {
        let error = TokenErrorCode::from(err);
        let description = match err {
            AuthError::InvalidClient { message }
            | AuthError::InvalidGrant { message }
            | AuthError::InvalidRedirectUri { message }
            | AuthError::InvalidRequest { message }
            | AuthError::InvalidScope { message }
            | AuthError::UnauthorizedClient { message } => message.clone(),
            AuthError::UnsupportedGrantType { grant_type } => {
                format!("Unsupported grant type: {grant_type}")
            }
            AuthError::Storage { .. } | AuthError::Configuration { .. } => {
                "The server could not complete the request".to_string()
            }
        };
        Self::with_description(error, description)
    }
}

/// OAuth 2.0 token error codes (RFC 6749 Section 5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorCode {
    /// The request is missing a required parameter or is otherwise malformed.
    /// Also used for a redirect URI mismatch.
    InvalidRequest,

    /// Client authentication failed.
    InvalidClient,

    /// The grant is invalid, expired, already used, or was issued to another
    /// client.
    InvalidGrant,

    /// The authenticated client may not use this grant type.
    UnauthorizedClient,

    /// The grant type is not supported by the server.
    UnsupportedGrantType,

    /// The requested scope is invalid or exceeds what was granted.
    InvalidScope,

    /// The server failed to process the request.
    ServerError,
}

impl TokenErrorCode {
    /// Returns the string representation of the error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::ServerError => "server_error",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ServerError => 500,
            Self::InvalidRequest
            | Self::InvalidClient
            | Self::InvalidGrant
            | Self::UnauthorizedClient
            | Self::UnsupportedGrantType
            | Self::InvalidScope => 400,
        }
    }
}

impl From<&AuthError> for TokenErrorCode {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::InvalidClient { .. } => Self::InvalidClient,
            AuthError::InvalidGrant { .. } => Self::InvalidGrant,
            AuthError::InvalidRedirectUri { .. } | AuthError::InvalidRequest { .. } => {
                Self::InvalidRequest
            }
            AuthError::InvalidScope { .. } => Self::InvalidScope,
            AuthError::UnauthorizedClient { .. } => Self::UnauthorizedClient,
            AuthError::UnsupportedGrantType { .. } => Self::UnsupportedGrantType,
            AuthError::Storage { .. } | AuthError::Configuration { .. } => Self::ServerError,
        }
    }
}

impl fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_request_deserialization() {
        let json = r#"{
            "grant_type": "authorization_code",
            "code": "abc123",
            "redirect_uri": "https://x/cb",
            "client_id": "C1"
        }"#;

        let request: TokenRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.grant_type, "authorization_code");
        assert_eq!(request.code.as_deref(), Some("abc123"));
        assert_eq!(request.redirect_uri.as_deref(), Some("https://x/cb"));
        assert!(request.refresh_token.is_none());
    }

    #[test]
    fn test_token_response_serialization() {
        let response = TokenResponse::new("at".to_string(), 3600, "read".to_string());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["token_type"], "Bearer");
        assert_eq!(json["expires_in"], 3600);
        assert!(json.get("refresh_token").is_none());

        let json = serde_json::to_value(response.with_refresh_token("rt".to_string())).unwrap();
        assert_eq!(json["refresh_token"], "rt");
    }

    #[test]
    fn test_error_mapping() {
        let err = TokenError::from(&AuthError::invalid_redirect_uri("redirect_uri mismatch"));
        assert_eq!(err.error, TokenErrorCode::InvalidRequest);
        assert_eq!(err.error.http_status(), 400);
        assert_eq!(err.error_description.as_deref(), Some("redirect_uri mismatch"));

        let err = TokenError::from(&AuthError::storage("connection refused to 10.0.0.5"));
        assert_eq!(err.error, TokenErrorCode::ServerError);
        assert_eq!(err.error.http_status(), 500);
        assert!(!err.error_description.unwrap_or_default().contains("10.0.0.5"));
    }

    #[test]
    fn test_http_status_by_error_class() {
        let status = |err: AuthError| TokenErrorCode::from(&err).http_status();
        assert_eq!(status(AuthError::invalid_client("x")), 400);
        assert_eq!(status(AuthError::unauthorized_client("x")), 400);
        assert_eq!(status(AuthError::unsupported_grant_type("x")), 400);
        assert_eq!(status(AuthError::configuration("x")), 500);
    }

    #[test]
    fn test_error_serialization() {
        let err = TokenError::from(&AuthError::unsupported_grant_type("device_code"));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""error":"unsupported_grant_type""#));
    }
}
