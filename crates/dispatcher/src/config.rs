/// Configuration for the [`ActionDispatcher`](crate::ActionDispatcher).
///
/// # Examples
///
/// ```
/// use weft_dispatcher::DispatcherConfig;
///
/// let config = DispatcherConfig::default();
/// assert_eq!(config.max_depth, 8);
/// assert!(config.error_toast);
/// ```
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deepest allowed sub-handler nesting, the top-level handler counting
    /// as one.
    pub max_depth: usize,
    /// Navigation target after a login-shaped response.
    pub post_login_redirect: Option<String>,
    /// Navigation target after a logout-shaped response.
    pub post_logout_redirect: Option<String>,
    /// Surface every failed action as an error toast.
    pub error_toast: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            post_login_redirect: None,
            post_logout_redirect: None,
            error_toast: true,
        }
    }
}
