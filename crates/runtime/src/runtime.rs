use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weft_auth::{AuthManager, AuthStorage};
use weft_core::{
    DeviceBridge, MemoryAppState, RuntimeCallbacks, Screen, ScriptEngine, StateContainer,
    Telemetry, TokenProvider, Translator,
};
use weft_dispatcher::ActionDispatcher;
use weft_executor::{
    HttpTransport, ReqwestTransport, RequestExecutor, SocketConnector, SubscriptionManager,
    TungsteniteConnector,
};
use weft_offline::OfflineQueue;
use weft_store::KeyValueStore;
use weft_store_file::FileStore;
use weft_store_memory::MemoryStore;

use crate::config::{StoreSection, WeftConfig};
use crate::error::RuntimeError;
use crate::host::ConsoleHost;

/// Builder wiring every weft component from a [`WeftConfig`].
///
/// Collaborators left unset get production defaults: reqwest for HTTP,
/// tungstenite for sockets, the configured store, an in-memory state
/// container and a [`ConsoleHost`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: WeftConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    connector: Option<Arc<dyn SocketConnector>>,
    store: Option<Arc<dyn KeyValueStore>>,
    state: Option<Arc<dyn StateContainer>>,
    host: Option<Arc<dyn RuntimeCallbacks>>,
    telemetry: Option<Arc<dyn Telemetry>>,
    translator: Option<Arc<dyn Translator>>,
    scripts: Option<Arc<dyn ScriptEngine>>,
    devices: Option<Arc<dyn DeviceBridge>>,
    background: bool,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("background", &self.background)
            .finish_non_exhaustive()
    }
}

impl RuntimeBuilder {
    pub fn new(config: WeftConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Override the store selected by `[store]`.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn state(mut self, state: Arc<dyn StateContainer>) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn host(mut self, host: Arc<dyn RuntimeCallbacks>) -> Self {
        self.host = Some(host);
        self
    }

    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    #[must_use]
    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    #[must_use]
    pub fn scripts(mut self, scripts: Arc<dyn ScriptEngine>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    #[must_use]
    pub fn devices(mut self, devices: Arc<dyn DeviceBridge>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Spawn the token refresh loop and storage sync task.
    #[must_use]
    pub fn background(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    pub async fn build(self) -> Result<Runtime, RuntimeError> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&config.store),
        };
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(reqwest::Client::new())),
        };
        let connector: Arc<dyn SocketConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TungsteniteConnector),
        };
        let host: Arc<dyn RuntimeCallbacks> = match self.host {
            Some(host) => host,
            None => Arc::new(ConsoleHost::default()),
        };
        let state: Arc<dyn StateContainer> = match self.state {
            Some(state) => state,
            None => Arc::new(MemoryAppState::default()),
        };

        let offline = Arc::new(OfflineQueue::new(Arc::clone(&store), config.offline_config()));

        let auth_config = config.auth_config();
        let storage = AuthStorage::open(
            auth_config.storage,
            auth_config.storage_key.clone(),
            Some(Arc::clone(&store)),
        )
        .await;
        let auth = Arc::new(
            AuthManager::new(auth_config, storage)
                .with_transport(Arc::clone(&transport))
                .with_runtime(Arc::clone(&host)),
        );
        if let Err(e) = auth.restore().await {
            warn!(error = %e, "could not restore the stored session");
        }

        let executor_config = config.executor_config();
        let executor = Arc::new(
            RequestExecutor::new(transport, executor_config.clone())
                .with_tokens(Arc::clone(&auth) as Arc<dyn TokenProvider>)
                .with_runtime(Arc::clone(&host))
                .with_offline(Arc::clone(&offline)),
        );
        let subscriptions = Arc::new(SubscriptionManager::new(connector, executor_config));

        let mut builder = ActionDispatcher::builder()
            .registry(Arc::new(config.registry()))
            .global(config.global_config())
            .executor(Arc::clone(&executor))
            .subscriptions(subscriptions)
            .state(Arc::clone(&state))
            .runtime(host)
            .auth(Arc::clone(&auth))
            .config(config.dispatcher_config());
        if let Some(telemetry) = self.telemetry {
            builder = builder.telemetry(telemetry);
        }
        if let Some(translator) = self.translator {
            builder = builder.translator(translator);
        }
        if let Some(scripts) = self.scripts {
            builder = builder.scripts(scripts);
        }
        if let Some(devices) = self.devices {
            builder = builder.devices(devices);
        }
        let dispatcher = Arc::new(builder.build()?);
        dispatcher.install_replayer();

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        if self.background {
            tasks.push(Arc::clone(&auth).spawn_refresh_loop(cancel.child_token()));
            tasks.push(Arc::clone(&auth).spawn_sync(cancel.child_token()));
        }

        info!(
            store = %config.store.backend,
            data_sources = config.data_sources.len(),
            background = self.background,
            "runtime ready"
        );

        Ok(Runtime {
            config,
            store,
            state,
            offline,
            auth,
            executor,
            dispatcher,
            cancel,
            tasks,
        })
    }
}

fn open_store(section: &StoreSection) -> Arc<dyn KeyValueStore> {
    match (section.backend.as_str(), &section.path) {
        ("file", Some(path)) => Arc::new(FileStore::new(path.clone())),
        _ => Arc::new(MemoryStore::new()),
    }
}

/// A fully wired set of weft components.
pub struct Runtime {
    config: WeftConfig,
    store: Arc<dyn KeyValueStore>,
    state: Arc<dyn StateContainer>,
    offline: Arc<OfflineQueue>,
    auth: Arc<AuthManager>,
    executor: Arc<RequestExecutor>,
    dispatcher: Arc<ActionDispatcher>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("dispatcher", &self.dispatcher)
            .field("offline", &self.offline)
            .field("background_tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn builder(config: WeftConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn state(&self) -> &Arc<dyn StateContainer> {
        &self.state
    }

    pub fn offline(&self) -> &Arc<OfflineQueue> {
        &self.offline
    }

    pub fn auth(&self) -> &Arc<AuthManager> {
        &self.auth
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Read a screen schema and seed state with its initial values.
    pub fn load_screen(&self, path: &Path) -> Result<Screen, RuntimeError> {
        let screen_error = |reason: String| RuntimeError::Screen {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| screen_error(e.to_string()))?;
        let screen = Screen::from_json(&raw).map_err(|e| screen_error(e.to_string()))?;
        if let serde_json::Value::Object(initial) = &screen.initial_state {
            for (key, value) in initial {
                self.state.set_state(key, value.clone());
            }
        }
        Ok(screen)
    }

    /// Cancel in-flight work and stop background tasks.
    pub async fn shutdown(self) {
        self.dispatcher.cancel_all();
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("runtime stopped");
    }
}
