//! Domain types for the token-issuance core.

pub mod access_token;
pub mod authorization_code;
pub mod client;
pub mod refresh_token;
pub mod user;

pub use access_token::AccessToken;
pub use authorization_code::AuthorizationCode;
pub use client::{Client, ClientValidationError, GrantType};
pub use refresh_token::RefreshToken;
pub use user::User;
