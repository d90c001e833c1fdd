//! Bearer-token lifecycle for weft.
//!
//! [`AuthManager`] keeps the session in one of three storage backends,
//! refreshes it before expiry, follows changes made by other holders of the
//! same storage, and implements [`weft_core::TokenProvider`] so the request
//! executor can attach and refresh tokens.

pub mod config;
pub mod error;
pub mod jwt;
pub mod manager;
pub mod storage;

pub use config::{AuthConfig, StorageBackend};
pub use error::AuthError;
pub use jwt::token_expiry_ms;
pub use manager::{AuthEvent, AuthManager, Clock};
pub use storage::AuthStorage;
