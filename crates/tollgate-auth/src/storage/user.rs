//! User storage trait.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::User;

/// Lookup and credential verification for resource owners.
///
/// Password hashing and account management live behind this trait.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Find a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<User>>;

    /// Verify a username and password.
    ///
    /// Returns the user on success and `None` on unknown user or wrong
    /// password.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn verify_credentials(&self, username: &str, password: &str)
    -> AuthResult<Option<User>>;
}
