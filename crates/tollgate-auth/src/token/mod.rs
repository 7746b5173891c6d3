//! Token issuance.
//!
//! - [`AccessTokenIssuer`] - bounded-lifetime access tokens with expiry cleanup
//! - [`RefreshTokenIssuer`] - idempotent refresh-token get-or-create
//! - [`TokenGenerator`] - opaque token values

pub mod access;
pub mod generator;
pub mod refresh;

pub use access::AccessTokenIssuer;
pub use generator::{SecureTokenGenerator, SequentialTokenGenerator, TokenGenerator};
pub use refresh::RefreshTokenIssuer;
