//! Resource owner reference.

use serde::{Deserialize, Serialize};

/// A resource owner known to the user-management collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique user identifier.
    pub id: String,

    /// Login name.
    pub username: String,

    /// Inactive users cannot obtain new tokens.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}
