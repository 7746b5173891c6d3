//! Tollgate token endpoint server.
//!
//! Loads [`config::AppConfig`], opens the configured token store and serves
//! `POST /oauth/token` backed by [`tollgate_auth::GrantCoordinator`].

pub mod config;
pub mod observability;
pub mod server;

pub use server::{ServerBuilder, TollgateServer, build_app, build_coordinator, build_store};
