//! OAuth 2.0 client domain types.
//!
//! Clients are registered and mutated by an external client-management
//! collaborator. The token core only reads them.

use serde::{Deserialize, Serialize};

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types understood by the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
    /// Client Credentials flow (confidential clients only).
    ClientCredentials,
    /// Resource Owner Password Credentials flow.
    Password,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
        }
    }

    /// Parses a grant_type parameter value. Returns `None` for unknown values.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            "client_credentials" => Some(Self::ClientCredentials),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// A registered OAuth 2.0 client application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier used in OAuth flows.
    pub client_id: String,

    /// Human-readable display name.
    #[serde(default)]
    pub name: String,

    /// Whether this is a confidential client (authenticates with a secret).
    #[serde(default)]
    pub confidential: bool,

    /// Whether this client is currently active and can be used.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Registered redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Scopes this client may request. Empty list means all scopes are allowed.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Grant types this client may use.
    pub grant_types: Vec<GrantType>,
}

fn default_active() -> bool {
    true
}

impl Client {
    /// Validates the client registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the client id is empty or no grant type is allowed.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.grant_types.is_empty() {
            return Err(ClientValidationError::NoGrantTypes);
        }

        if !self.confidential && self.grant_types.contains(&GrantType::ClientCredentials) {
            return Err(ClientValidationError::PublicClientCredentials);
        }

        Ok(())
    }

    /// Checks if every space-separated scope in `scope` is allowed.
    ///
    /// Membership only: scope strings are opaque to this crate.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        if self.scopes.is_empty() {
            return true;
        }

        scope
            .split_whitespace()
            .all(|requested| self.scopes.iter().any(|allowed| allowed == requested))
    }

    /// Checks if the client may use the given grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Space-joined allowed scopes, used when a client_credentials request
    /// does not name a scope.
    #[must_use]
    pub fn default_scope(&self) -> String {
        self.scopes.join(" ")
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Errors returned by [`Client::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientValidationError {
    /// The client id is empty.
    #[error("client_id must not be empty")]
    EmptyClientId,

    /// No grant types are configured.
    #[error("client must allow at least one grant type")]
    NoGrantTypes,

    /// A public client was given the client_credentials grant.
    #[error("public clients cannot use the client_credentials grant")]
    PublicClientCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client {
            client_id: "C1".to_string(),
            name: "Test".to_string(),
            confidential: true,
            active: true,
            redirect_uris: vec!["https://x/cb".to_string()],
            scopes: vec!["read".to_string(), "write".to_string()],
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        }
    }

    #[test]
    fn test_grant_type_parse() {
        assert_eq!(
            GrantType::parse("authorization_code"),
            Some(GrantType::AuthorizationCode)
        );
        assert_eq!(GrantType::parse("password"), Some(GrantType::Password));
        assert_eq!(GrantType::parse("urn:device_code"), None);
        assert_eq!(GrantType::RefreshToken.to_string(), "refresh_token");
    }

    #[test]
    fn test_scope_allowed() {
        let c = client();
        assert!(c.is_scope_allowed("read"));
        assert!(c.is_scope_allowed("read write"));
        assert!(!c.is_scope_allowed("read admin"));

        let open = Client {
            scopes: vec![],
            ..client()
        };
        assert!(open.is_scope_allowed("anything at all"));
    }

    #[test]
    fn test_validate() {
        assert!(client().validate().is_ok());

        let public_cc = Client {
            confidential: false,
            grant_types: vec![GrantType::ClientCredentials],
            ..client()
        };
        assert_eq!(
            public_cc.validate(),
            Err(ClientValidationError::PublicClientCredentials)
        );

        let empty = Client {
            client_id: String::new(),
            ..client()
        };
        assert_eq!(empty.validate(), Err(ClientValidationError::EmptyClientId));
    }

    #[test]
    fn test_default_scope() {
        assert_eq!(client().default_scope(), "read write");
    }
}
