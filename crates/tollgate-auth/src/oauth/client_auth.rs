//! Client authentication for the token endpoint.
//!
//! # Authentication Methods
//!
//! - `none` - public clients (client_id only)
//! - `client_secret_basic` - HTTP Basic Auth with client_id:client_secret
//! - `client_secret_post` - client_id and client_secret in request body
//!
//! Presenting more than one method in the same request is rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::token::TokenRequest;
use crate::storage::ClientStorage;
use crate::types::Client;

/// Token endpoint authentication methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// No client authentication (public clients).
    None,

    /// Client secret via HTTP Basic Auth.
    ClientSecretBasic,

    /// Client secret in request body.
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    /// Returns the string representation of the auth method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials presented by a client, before verification.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Claimed client id.
    pub client_id: String,

    /// Presented secret, if any.
    pub client_secret: Option<String>,

    /// How the credentials were presented.
    pub method: TokenEndpointAuthMethod,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("method", &self.method)
            .finish()
    }
}

impl ClientCredentials {
    /// Credentials presented with HTTP Basic Auth.
    #[must_use]
    pub fn basic(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            method: TokenEndpointAuthMethod::ClientSecretBasic,
        }
    }

    /// Credentials presented in the request body.
    #[must_use]
    pub fn post(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            method: TokenEndpointAuthMethod::ClientSecretPost,
        }
    }

    /// A public client identifying itself by id only.
    #[must_use]
    pub fn public(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            method: TokenEndpointAuthMethod::None,
        }
    }

    /// Extracts client credentials from an `Authorization` header value and
    /// the request body.
    ///
    /// Priority: HTTP Basic, then client_secret_post, then client_id alone.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClient` if the header is malformed or no client id is
    /// present, and `InvalidRequest` if both Basic and body secrets are
    /// presented or the ids disagree.
    pub fn extract(authorization: Option<&str>, request: &TokenRequest) -> AuthResult<Self> {
        if let Some(header) = authorization {
            let (client_id, client_secret) = parse_basic_auth(header)
                .ok_or_else(|| AuthError::invalid_client("Malformed Authorization header"))?;

            if request.client_secret.is_some() {
                return Err(AuthError::invalid_request(
                    "Multiple client authentication methods",
                ));
            }
            if request
                .client_id
                .as_deref()
                .is_some_and(|body_id| body_id != client_id)
            {
                return Err(AuthError::invalid_request(
                    "client_id does not match Authorization header",
                ));
            }

            return Ok(Self::basic(client_id, client_secret));
        }

        match (&request.client_id, &request.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Self::post(client_id, client_secret)),
            (Some(client_id), None) => Ok(Self::public(client_id)),
            (None, _) => Err(AuthError::invalid_client("No client credentials provided")),
        }
    }
}

/// Authenticates a client.
///
/// # Errors
///
/// Returns `InvalidClient` if:
/// - The client is not found or inactive
/// - A confidential client presents no secret or a wrong one
/// - A public client presents a secret
pub async fn authenticate_client(
    credentials: &ClientCredentials,
    client_storage: &dyn ClientStorage,
) -> AuthResult<Client> {
    let client = client_storage
        .find_by_client_id(&credentials.client_id)
        .await?
        .ok_or_else(|| AuthError::invalid_client("Unknown client"))?;

    if !client.active {
        return Err(AuthError::invalid_client("Client is inactive"));
    }

    match (&credentials.client_secret, client.confidential) {
        (Some(secret), true) => {
            if !client_storage
                .verify_secret(&credentials.client_id, secret)
                .await?
            {
                return Err(AuthError::invalid_client("Invalid client secret"));
            }
        }
        (None, true) => {
            return Err(AuthError::invalid_client(
                "Confidential clients must authenticate with a secret",
            ));
        }
        (Some(_), false) => {
            return Err(AuthError::invalid_client(
                "Public clients cannot authenticate with a secret",
            ));
        }
        (None, false) => {}
    }

    Ok(client)
}

/// Parses HTTP Basic Auth credentials from an Authorization header value.
///
/// Returns `None` if the header is not valid Basic Auth.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    // Split on first colon (secret may contain colons)
    let (client_id, client_secret) = credentials.split_once(':')?;
    if client_id.is_empty() {
        return None;
    }

    Some((client_id.to_string(), client_secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryClientStorage;
    use crate::types::GrantType;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn storage() -> InMemoryClientStorage {
        let confidential = Client {
            client_id: "C1".to_string(),
            name: "Confidential".to_string(),
            confidential: true,
            active: true,
            redirect_uris: vec![],
            scopes: vec![],
            grant_types: vec![GrantType::AuthorizationCode],
        };
        let public = Client {
            client_id: "P1".to_string(),
            confidential: false,
            ..confidential.clone()
        };
        let inactive = Client {
            client_id: "OLD".to_string(),
            active: false,
            ..confidential.clone()
        };
        InMemoryClientStorage::new()
            .with_client(confidential, Some("s3cret"))
            .with_client(public, None)
            .with_client(inactive, Some("s3cret"))
    }

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{id}:{secret}")))
    }

    #[test]
    fn test_parse_basic_auth() {
        assert_eq!(
            parse_basic_auth(&basic("C1", "pa:ss")),
            Some(("C1".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic_auth("Bearer abc"), None);
        assert_eq!(parse_basic_auth("Basic !!!"), None);
    }

    #[test]
    fn test_extract_priority() {
        let request = TokenRequest {
            client_id: Some("C1".to_string()),
            ..TokenRequest::default()
        };
        let creds = ClientCredentials::extract(Some(&basic("C1", "s3cret")), &request).unwrap();
        assert_eq!(creds.method, TokenEndpointAuthMethod::ClientSecretBasic);

        let creds = ClientCredentials::extract(None, &request).unwrap();
        assert_eq!(creds, ClientCredentials::public("C1"));

        let request = TokenRequest {
            client_id: Some("C1".to_string()),
            client_secret: Some("s3cret".to_string()),
            ..TokenRequest::default()
        };
        let creds = ClientCredentials::extract(None, &request).unwrap();
        assert_eq!(creds.method, TokenEndpointAuthMethod::ClientSecretPost);

        let err = ClientCredentials::extract(Some(&basic("C1", "s3cret")), &request).unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[test]
    fn test_extract_requires_client_id() {
        let err = ClientCredentials::extract(None, &TokenRequest::default()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));
    }

    #[tokio::test]
    async fn test_authenticate_confidential() {
        let storage = storage();
        let client = authenticate_client(&ClientCredentials::basic("C1", "s3cret"), &storage)
            .await
            .unwrap();
        assert_eq!(client.client_id, "C1");

        for creds in [
            ClientCredentials::post("C1", "wrong"),
            ClientCredentials::public("C1"),
            ClientCredentials::basic("OLD", "s3cret"),
            ClientCredentials::public("nobody"),
        ] {
            let err = authenticate_client(&creds, &storage).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidClient { .. }), "{creds:?}");
        }
    }

    #[tokio::test]
    async fn test_authenticate_public() {
        let storage = storage();
        assert!(
            authenticate_client(&ClientCredentials::public("P1"), &storage)
                .await
                .is_ok()
        );
        let err = authenticate_client(&ClientCredentials::post("P1", "x"), &storage)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClient { .. }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", ClientCredentials::post("C1", "s3cret"));
        assert!(!debug.contains("s3cret"));
    }
}
