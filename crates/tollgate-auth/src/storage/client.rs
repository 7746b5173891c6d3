//! Client storage trait.
//!
//! Client registration is owned by an external collaborator; the token core
//! only looks clients up and asks for secret verification.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Client;

/// Read-only access to registered OAuth 2.0 clients.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by its OAuth client_id.
    ///
    /// Returns `None` if the client doesn't exist. Inactive clients are
    /// returned; the caller decides what to do with them.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Verify a client secret.
    ///
    /// Returns `false` for unknown clients, public clients and wrong secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn verify_secret(&self, client_id: &str, secret: &str) -> AuthResult<bool>;
}
