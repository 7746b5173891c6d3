//! Storage traits for the token core.
//!
//! - [`TokenStore`] / [`TokenTransaction`] - codes, access and refresh tokens
//! - [`ClientStorage`] - registered clients
//! - [`UserStorage`] - resource owners
//!
//! # Implementations
//!
//! - [`memory`] - in-process store for development and tests
//! - `tollgate-auth-postgres` - PostgreSQL storage backend

pub mod client;
pub mod memory;
pub mod token;
pub mod user;

pub use client::ClientStorage;
pub use memory::{InMemoryClientStorage, InMemoryTokenStore, InMemoryUserStorage};
pub use token::{
    PurgeStats, RefreshTokenInsert, RefreshTokenKey, TokenRepository, TokenStore,
    TokenTransaction,
};
pub use user::UserStorage;
