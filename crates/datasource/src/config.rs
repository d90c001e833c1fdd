use std::collections::BTreeMap;
use std::time::Duration;

use weft_core::{AuthDescriptor, RetryPolicy};

/// Settings shared by every data source.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    /// Prefix for relative data-source paths without their own base URL.
    pub base_url: Option<String>,
    /// Headers sent with every request; descriptor headers win.
    pub headers: BTreeMap<String, String>,
    /// Auth registered per base-URL prefix. The longest matching prefix wins.
    pub endpoint_auth: BTreeMap<String, AuthDescriptor>,
    /// Attach the live session token to requests that declare no auth.
    pub inject_session_token: bool,
    pub default_timeout: Option<Duration>,
    pub default_retry: Option<RetryPolicy>,
}

impl GlobalConfig {
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_endpoint_auth(mut self, prefix: impl Into<String>, auth: AuthDescriptor) -> Self {
        self.endpoint_auth.insert(prefix.into(), auth);
        self
    }

    /// Endpoint auth for `url`, by longest registered prefix.
    pub fn endpoint_auth_for(&self, url: &str) -> Option<&AuthDescriptor> {
        self.endpoint_auth
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, auth)| auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let config = GlobalConfig::default()
            .with_endpoint_auth("https://api.example.com", AuthDescriptor::bearer("outer"))
            .with_endpoint_auth("https://api.example.com/admin", AuthDescriptor::bearer("inner"));

        let auth = config
            .endpoint_auth_for("https://api.example.com/admin/users")
            .unwrap();
        assert_eq!(auth.value.as_deref(), Some("inner"));

        let auth = config.endpoint_auth_for("https://api.example.com/todos").unwrap();
        assert_eq!(auth.value.as_deref(), Some("outer"));

        assert!(config.endpoint_auth_for("https://other.example.com").is_none());
    }
}
