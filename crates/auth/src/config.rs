use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the auth record is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory only; lost on restart.
    #[default]
    Memory,
    /// Persistent key-value store, falling back to memory when unavailable.
    Local,
    /// Percent-encoded record in a cookie jar, expiring with the token.
    Cookie,
}

/// Configuration for the [`AuthManager`](crate::AuthManager).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub storage: StorageBackend,
    /// Key (or cookie name) holding the record.
    pub storage_key: String,
    /// Endpoint exchanging a refresh token for a new access token.
    pub token_endpoint: Option<String>,
    /// Endpoint returning the signed-in user's profile.
    pub profile_endpoint: Option<String>,
    /// How often the background task checks the remaining lifetime.
    pub refresh_interval: Duration,
    /// A token is treated as expired this long before its actual expiry.
    pub expiry_margin: Duration,
    /// Lifetime assumed when neither the token nor the caller gives one.
    pub default_lifetime: Duration,
    /// Redirect to `login_path` when the session ends.
    pub requires_auth: bool,
    pub login_path: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            storage_key: "weft:auth".into(),
            token_endpoint: None,
            profile_endpoint: None,
            refresh_interval: Duration::from_secs(120),
            expiry_margin: Duration::from_secs(5 * 60),
            default_lifetime: Duration::from_secs(3600),
            requires_auth: false,
            login_path: "/login".into(),
        }
    }
}
