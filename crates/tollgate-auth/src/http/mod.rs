//! HTTP handlers for the token endpoint.
//!
//! - [`token`] - `POST /oauth/token`

pub mod token;

pub use token::{TokenState, oauth_router, token_handler};
