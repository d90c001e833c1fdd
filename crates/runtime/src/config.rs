use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use weft_auth::{AuthConfig, StorageBackend};
use weft_core::{ActionError, AuthDescriptor, BackoffStrategy, DataSource, RetryPolicy};
use weft_datasource::{DataSourceRegistry, GlobalConfig};
use weft_dispatcher::DispatcherConfig;
use weft_executor::ExecutorConfig;
use weft_offline::OfflineConfig;

/// Errors raised while loading or validating a [`WeftConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown store backend '{0}', expected \"memory\" or \"file\"")]
    UnknownBackend(String),

    #[error("the file store backend requires store.path")]
    MissingStorePath,

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<ConfigError> for ActionError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Top-level configuration, loaded from a TOML file.
///
/// Every section is optional; an empty file yields a memory-only runtime
/// with default retry, offline and auth behaviour.
///
/// # Example
///
/// ```toml
/// [runtime]
/// base_url = "https://api.example.com"
/// post_login_redirect = "/home"
///
/// [retry]
/// attempts = 4
/// delay_ms = 500
/// strategy = "jitter"
///
/// [store]
/// backend = "file"
/// path = "weft-store.json"
///
/// [auth]
/// storage = "local"
/// token_endpoint = "https://api.example.com/auth/refresh"
///
/// [[data_sources]]
/// id = "todos"
/// path = "/todos"
///
/// [headers]
/// X-Client = "weft"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub offline: OfflineSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Globally registered data sources.
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    /// Auth applied by base-URL prefix to data sources that declare none.
    #[serde(default)]
    pub endpoint_auth: BTreeMap<String, AuthDescriptor>,
    /// Headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
    pub login_path: String,
    pub post_login_redirect: Option<String>,
    pub post_logout_redirect: Option<String>,
    pub max_depth: usize,
    /// Attach the session token to data sources without their own auth.
    pub inject_session_token: bool,
    pub error_toast: bool,
    pub cache_reads: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        let executor = ExecutorConfig::default();
        let dispatcher = DispatcherConfig::default();
        Self {
            base_url: None,
            request_timeout_ms: u64::try_from(executor.request_timeout.as_millis())
                .unwrap_or(u64::MAX),
            login_path: executor.login_path,
            post_login_redirect: None,
            post_logout_redirect: None,
            max_depth: dispatcher.max_depth,
            inject_session_token: false,
            error_toast: dispatcher.error_toast,
            cache_reads: executor.cache_reads,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub attempts: u32,
    pub delay_ms: u64,
    pub strategy: BackoffStrategy,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            delay_ms: policy.delay_ms,
            strategy: policy.strategy,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineSection {
    pub enabled: bool,
    pub queue_key: String,
    pub cache_prefix: String,
    pub throttle_ms: u64,
    pub replay_on_reconnect: bool,
}

impl Default for OfflineSection {
    fn default() -> Self {
        let offline = OfflineConfig::default();
        Self {
            enabled: offline.enabled,
            queue_key: offline.queue_key,
            cache_prefix: offline.cache_prefix,
            throttle_ms: u64::try_from(offline.throttle.as_millis()).unwrap_or(u64::MAX),
            replay_on_reconnect: offline.replay_on_reconnect,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub storage: StorageBackend,
    pub storage_key: String,
    pub token_endpoint: Option<String>,
    pub profile_endpoint: Option<String>,
    pub refresh_interval_secs: u64,
    pub default_lifetime_secs: u64,
    pub requires_auth: bool,
}

impl Default for AuthSection {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            storage: auth.storage,
            storage_key: auth.storage_key,
            token_endpoint: None,
            profile_endpoint: None,
            refresh_interval_secs: auth.refresh_interval.as_secs(),
            default_lifetime_secs: auth.default_lifetime.as_secs(),
            requires_auth: auth.requires_auth,
        }
    }
}

/// Key-value store backing the offline queue and persistent auth storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// `"memory"` or `"file"`.
    pub backend: String,
    /// JSON file for the `"file"` backend.
    pub path: Option<PathBuf>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_owned(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

impl WeftConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.store.backend.as_str() {
            "memory" => {}
            "file" if self.store.path.is_none() => return Err(ConfigError::MissingStorePath),
            "file" => {}
            other => return Err(ConfigError::UnknownBackend(other.to_owned())),
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.attempts",
                reason: "must be at least 1".into(),
            });
        }
        if self.runtime.max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "runtime.max_depth",
                reason: "must be at least 1".into(),
            });
        }
        if self.auth.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "auth.refresh_interval_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.auth.token_endpoint.is_none()
            && (self.auth.requires_auth || self.auth.storage != StorageBackend::Memory)
        {
            warn!("auth.token_endpoint is not set; sessions will end instead of refreshing");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_millis(self.retry.delay_ms),
            self.retry.strategy,
        )
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retry: self.retry_policy(),
            request_timeout: Duration::from_millis(self.runtime.request_timeout_ms),
            login_path: self.runtime.login_path.clone(),
            cache_reads: self.runtime.cache_reads,
            ..ExecutorConfig::default()
        }
    }

    pub fn offline_config(&self) -> OfflineConfig {
        OfflineConfig {
            enabled: self.offline.enabled,
            queue_key: self.offline.queue_key.clone(),
            cache_prefix: self.offline.cache_prefix.clone(),
            throttle: Duration::from_millis(self.offline.throttle_ms),
            replay_on_reconnect: self.offline.replay_on_reconnect,
            ..OfflineConfig::default()
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            storage: self.auth.storage,
            storage_key: self.auth.storage_key.clone(),
            token_endpoint: self.auth.token_endpoint.clone(),
            profile_endpoint: self.auth.profile_endpoint.clone(),
            refresh_interval: Duration::from_secs(self.auth.refresh_interval_secs),
            default_lifetime: Duration::from_secs(self.auth.default_lifetime_secs),
            requires_auth: self.auth.requires_auth,
            login_path: self.runtime.login_path.clone(),
            ..AuthConfig::default()
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_depth: self.runtime.max_depth,
            post_login_redirect: self.runtime.post_login_redirect.clone(),
            post_logout_redirect: self.runtime.post_logout_redirect.clone(),
            error_toast: self.runtime.error_toast,
        }
    }

    pub fn global_config(&self) -> GlobalConfig {
        GlobalConfig {
            base_url: self.runtime.base_url.clone(),
            headers: self.headers.clone(),
            endpoint_auth: self.endpoint_auth.clone(),
            inject_session_token: self.runtime.inject_session_token,
            default_timeout: Some(Duration::from_millis(self.runtime.request_timeout_ms)),
            default_retry: Some(self.retry_policy()),
        }
    }

    pub fn registry(&self) -> DataSourceRegistry {
        let mut registry = DataSourceRegistry::default();
        for source in &self.data_sources {
            registry.register(source.clone());
        }
        registry
    }
}
