use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use weft_core::{
    ActionError, HttpMethod, RequestBody, ResolvedRequest, RuntimeCallbacks, StoredAuth,
    TokenProvider,
};
use weft_executor::HttpTransport;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::jwt::token_expiry_ms;
use crate::storage::AuthStorage;

const EVENT_CAPACITY: usize = 16;
const AUTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Current time in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn { expires_at: Option<i64> },
    Refreshed { expires_at: Option<i64> },
    LoggedOut,
}

/// Owns the bearer token: login, expiry tracking, refresh, logout,
/// cross-tab synchronisation and profile loading.
///
/// The in-memory session is always updated before storage is written, so
/// the change notification for our own write is recognised and ignored by
/// [`spawn_sync`](Self::spawn_sync).
pub struct AuthManager {
    config: AuthConfig,
    storage: AuthStorage,
    transport: Option<Arc<dyn HttpTransport>>,
    runtime: Option<Arc<dyn RuntimeCallbacks>>,
    session: RwLock<Option<StoredAuth>>,
    /// Profile and the token it was loaded with.
    profile: RwLock<Option<(String, Value)>>,
    refresh_lock: Mutex<()>,
    events: broadcast::Sender<AuthEvent>,
    clock: Clock,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("session", &*self.session.read())
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn new(config: AuthConfig, storage: AuthStorage) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            storage,
            transport: None,
            runtime: None,
            session: RwLock::new(None),
            profile: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            events,
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Transport used for the token and profile endpoints.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn RuntimeCallbacks>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn storage(&self) -> &AuthStorage {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    fn now_ms(&self) -> i64 {
        (self.clock)()
    }

    fn margin_ms(&self) -> i64 {
        i64::try_from(self.config.expiry_margin.as_millis()).unwrap_or(i64::MAX)
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Adopt whatever record storage already holds, e.g. after a restart.
    pub async fn restore(&self) -> Result<Option<StoredAuth>, AuthError> {
        let record = self.storage.load().await?;
        if let Some(record) = &record {
            debug!(expires_at = ?record.expires_at, "restored session from storage");
            *self.session.write() = Some(record.clone());
        }
        Ok(record)
    }

    /// Start a session.
    ///
    /// The expiry comes from the token's `exp` claim when it has one, else
    /// from `expires_in`, else from the configured default lifetime.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<Duration>,
    ) -> Result<StoredAuth, AuthError> {
        let record = self.record_for(token, refresh_token.map(str::to_owned), expires_in);
        self.store(&record).await?;
        *self.profile.write() = None;
        info!(expires_at = ?record.expires_at, "logged in");
        self.emit(AuthEvent::LoggedIn {
            expires_at: record.expires_at,
        });
        Ok(record)
    }

    fn record_for(
        &self,
        token: &str,
        refresh_token: Option<String>,
        expires_in: Option<Duration>,
    ) -> StoredAuth {
        let expires_at = token_expiry_ms(token).unwrap_or_else(|| {
            let lifetime = expires_in.unwrap_or(self.config.default_lifetime);
            self.now_ms()
                .saturating_add(i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX))
        });
        StoredAuth {
            token: token.to_owned(),
            refresh_token,
            expires_at: Some(expires_at),
        }
    }

    async fn store(&self, record: &StoredAuth) -> Result<(), AuthError> {
        *self.session.write() = Some(record.clone());
        self.storage.save(record, self.now_ms()).await
    }

    /// A token is present and not within the expiry margin.
    pub fn is_logged_in(&self) -> bool {
        let now = self.now_ms();
        let margin = self.margin_ms();
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.expires_at.is_none_or(|exp| now < exp.saturating_sub(margin)))
    }

    pub fn token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.token.clone())
    }

    pub fn session(&self) -> Option<StoredAuth> {
        self.session.read().clone()
    }

    /// The session can be refreshed and its remaining lifetime is below the
    /// expiry margin.
    pub fn needs_refresh(&self) -> bool {
        let now = self.now_ms();
        self.session.read().as_ref().is_some_and(|s| {
            s.refresh_token.is_some()
                && s.remaining_ms(now).is_some_and(|left| left < self.margin_ms())
        })
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// Concurrent callers share a single exchange. On failure the session
    /// is ended and, when the context requires auth, the user is sent to
    /// the login path.
    pub async fn refresh(&self) -> Result<String, AuthError> {
        self.refresh_session(self.config.requires_auth).await
    }

    #[instrument(skip(self))]
    async fn refresh_session(&self, redirect_on_failure: bool) -> Result<String, AuthError> {
        let seen = self.token();
        let _guard = self.refresh_lock.lock().await;

        // Another caller refreshed while we were waiting.
        if let Some(current) = self.token() {
            if seen.as_ref() != Some(&current) && self.is_logged_in() {
                debug!("reusing token from concurrent refresh");
                return Ok(current);
            }
        }

        match self.exchange().await {
            Ok(record) => {
                self.store(&record).await?;
                info!(expires_at = ?record.expires_at, "token refreshed");
                self.emit(AuthEvent::Refreshed {
                    expires_at: record.expires_at,
                });
                Ok(record.token)
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, ending session");
                if let Err(e) = self.logout(redirect_on_failure).await {
                    warn!(error = %e, "failed to clear auth storage");
                }
                Err(err)
            }
        }
    }

    async fn exchange(&self) -> Result<StoredAuth, AuthError> {
        let refresh_token = self
            .session
            .read()
            .as_ref()
            .and_then(|s| s.refresh_token.clone())
            .ok_or(AuthError::NoRefreshToken)?;
        let (Some(endpoint), Some(transport)) = (&self.config.token_endpoint, &self.transport)
        else {
            return Err(AuthError::NoTokenEndpoint);
        };

        let mut request = ResolvedRequest::new("auth:refresh", HttpMethod::Post, endpoint.clone())
            .with_body(RequestBody::Json(json!({"refreshToken": refresh_token})));
        request.set_header("Content-Type", "application/json");
        request.timeout = Some(AUTH_REQUEST_TIMEOUT);

        let response = transport.send(&request).await?;
        if !(200..300).contains(&response.status) {
            return Err(AuthError::Refresh(format!(
                "token endpoint returned {}",
                response.status
            )));
        }
        let body: Value =
            serde_json::from_slice(&response.body).map_err(|e| AuthError::Refresh(e.to_string()))?;

        let token = first_str(&body, &["token", "accessToken", "access_token"])
            .ok_or_else(|| AuthError::Refresh("response carried no token".into()))?;
        let next_refresh =
            first_str(&body, &["refreshToken", "refresh_token"]).unwrap_or(refresh_token);
        let expires_in = ["expiresIn", "expires_in"]
            .iter()
            .find_map(|k| body.get(*k).and_then(Value::as_u64))
            .map(Duration::from_secs);

        Ok(self.record_for(&token, Some(next_refresh), expires_in))
    }

    /// End the session. When `requires_auth` is set the user is sent to the
    /// login path.
    #[instrument(skip(self))]
    pub async fn logout(&self, requires_auth: bool) -> Result<(), AuthError> {
        let had_session = self.session.write().take().is_some();
        *self.profile.write() = None;
        let cleared = self.storage.clear().await;

        if had_session {
            info!("logged out");
            self.emit(AuthEvent::LoggedOut);
        }
        if requires_auth {
            self.redirect_to_login();
        }
        cleared
    }

    fn redirect_to_login(&self) {
        if let Some(runtime) = &self.runtime {
            runtime.navigate(&self.config.login_path, true);
        }
    }

    /// Profile loaded for the current token, if any.
    pub fn profile(&self) -> Option<Value> {
        let token = self.token()?;
        self.profile
            .read()
            .as_ref()
            .filter(|(t, _)| *t == token)
            .map(|(_, p)| p.clone())
    }

    /// Fetch the profile. Once loaded for a token it is reused unless
    /// `force` is set. A 401 ends the session.
    #[instrument(skip(self))]
    pub async fn load_profile(&self, force: bool) -> Result<Option<Value>, AuthError> {
        let (Some(endpoint), Some(transport)) = (&self.config.profile_endpoint, &self.transport)
        else {
            return Ok(None);
        };
        let token = self.token().ok_or(AuthError::NotLoggedIn)?;
        if !force {
            if let Some(profile) = self.profile() {
                return Ok(Some(profile));
            }
        }

        let mut request = ResolvedRequest::new("auth:profile", HttpMethod::Get, endpoint.clone());
        request.set_header("Authorization", format!("Bearer {token}"));
        request.timeout = Some(AUTH_REQUEST_TIMEOUT);
        let response = transport.send(&request).await?;

        match response.status {
            401 => {
                warn!("profile request unauthorized, ending session");
                self.logout(self.config.requires_auth).await?;
                Err(AuthError::Unauthorized)
            }
            status if !(200..300).contains(&status) => Err(AuthError::Request(ActionError::network(
                status,
                "profile request failed",
            ))),
            _ => {
                let profile: Value = serde_json::from_slice(&response.body)
                    .map_err(|e| AuthError::Request(ActionError::Serialization(e.to_string())))?;
                *self.profile.write() = Some((token, profile.clone()));
                Ok(Some(profile))
            }
        }
    }

    /// Periodically refresh the session once it nears expiry.
    pub fn spawn_refresh_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if self.needs_refresh() {
                    debug!("session near expiry, refreshing");
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "background refresh failed");
                    }
                }
            }
            debug!("refresh loop stopped");
        })
    }

    /// Follow changes made to the stored record by other holders of the
    /// same storage (other tabs or processes).
    pub fn spawn_sync(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let mut changes = self.storage.subscribe();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(change) if change.key == self.storage.key() => {
                        self.apply_external(change.value.as_deref());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "auth sync lagged, re-reading storage");
                        match self.storage.load().await {
                            Ok(Some(record)) => self.adopt_external(record),
                            Ok(None) => self.apply_external(None),
                            Err(e) => warn!(error = %e, "failed to re-read auth storage"),
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("auth sync stopped");
        })
    }

    fn apply_external(&self, raw: Option<&str>) {
        match raw {
            Some(raw) => match self.storage.decode(raw) {
                Ok(record) => self.adopt_external(record),
                Err(e) => warn!(error = %e, "ignoring unreadable auth record"),
            },
            None => {
                if self.session.write().take().is_some() {
                    *self.profile.write() = None;
                    info!("session ended elsewhere");
                    self.emit(AuthEvent::LoggedOut);
                    if self.config.requires_auth {
                        self.redirect_to_login();
                    }
                }
            }
        }
    }

    fn adopt_external(&self, record: StoredAuth) {
        let had_session = {
            let mut session = self.session.write();
            if session.as_ref() == Some(&record) {
                return;
            }
            session.replace(record.clone()).is_some()
        };
        *self.profile.write() = None;
        info!(expires_at = ?record.expires_at, "adopted session from storage");
        self.emit(if had_session {
            AuthEvent::Refreshed {
                expires_at: record.expires_at,
            }
        } else {
            AuthEvent::LoggedIn {
                expires_at: record.expires_at,
            }
        });
    }
}

fn first_str(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_owned)
}

#[async_trait]
impl TokenProvider for AuthManager {
    fn access_token(&self) -> Option<String> {
        self.token()
    }

    fn can_refresh(&self) -> bool {
        self.transport.is_some()
            && self.config.token_endpoint.is_some()
            && self
                .session
                .read()
                .as_ref()
                .is_some_and(|s| s.refresh_token.is_some())
    }

    /// The caller decides where to send the user on failure.
    async fn refresh_token(&self) -> Result<String, ActionError> {
        self.refresh_session(false).await.map_err(Into::into)
    }
}
