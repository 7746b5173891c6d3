//! OAuth 2.0 token endpoint logic.
//!
//! - [`coordinator`] - grant dispatch and unit-of-work boundaries
//! - [`exchanger`] - single-use authorization code exchange
//! - [`client_auth`] - client authentication
//! - [`token`] - request, response and error wire types

pub mod client_auth;
pub mod coordinator;
pub mod exchanger;
pub mod token;

pub use client_auth::{
    ClientCredentials, TokenEndpointAuthMethod, authenticate_client, parse_basic_auth,
};
pub use coordinator::GrantCoordinator;
pub use exchanger::AuthorizationCodeExchanger;
pub use token::{TokenError, TokenErrorCode, TokenRequest, TokenResponse};
