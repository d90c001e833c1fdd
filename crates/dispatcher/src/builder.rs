use std::sync::Arc;

use weft_auth::AuthManager;
use weft_core::{
    ActionKind, BindingResolver, DeviceBridge, IdentityTranslator, NoScriptEngine,
    RuntimeCallbacks, ScriptEngine, StateContainer, Telemetry, TemplateBindingResolver,
    TokenProvider, TracingTelemetry, Translator, UnsupportedDevices,
};
use weft_datasource::{DataSourceRegistry, DataSourceResolver, GlobalConfig};
use weft_executor::{RequestExecutor, SubscriptionManager};

use crate::config::DispatcherConfig;
use crate::dispatcher::ActionDispatcher;
use crate::error::DispatchError;
use crate::strategy::{ActionStrategy, StrategyTable};

/// Builder for constructing an [`ActionDispatcher`].
///
/// The executor, state container and runtime callbacks are required.
/// Everything else has a default: an empty registry, template bindings,
/// identity translation, tracing telemetry, no script engine and no
/// device bridge.
#[derive(Default)]
pub struct DispatcherBuilder {
    registry: Option<Arc<DataSourceRegistry>>,
    global: GlobalConfig,
    resolver: Option<DataSourceResolver>,
    executor: Option<Arc<RequestExecutor>>,
    subscriptions: Option<Arc<SubscriptionManager>>,
    state: Option<Arc<dyn StateContainer>>,
    bindings: Option<Arc<dyn BindingResolver>>,
    translator: Option<Arc<dyn Translator>>,
    runtime: Option<Arc<dyn RuntimeCallbacks>>,
    telemetry: Option<Arc<dyn Telemetry>>,
    scripts: Option<Arc<dyn ScriptEngine>>,
    devices: Option<Arc<dyn DeviceBridge>>,
    auth: Option<Arc<AuthManager>>,
    strategies: StrategyTable,
    config: DispatcherConfig,
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("has_executor", &self.executor.is_some())
            .field("has_state", &self.state.is_some())
            .field("has_runtime", &self.runtime.is_some())
            .field("has_auth", &self.auth.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DispatcherBuilder {
    #[must_use]
    pub fn registry(mut self, registry: Arc<DataSourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn global(mut self, global: GlobalConfig) -> Self {
        self.global = global;
        self
    }

    /// Use a preconfigured resolver instead of one built from the bindings,
    /// translator and auth manager.
    #[must_use]
    pub fn resolver(mut self, resolver: DataSourceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Arc<RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn subscriptions(mut self, subscriptions: Arc<SubscriptionManager>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    #[must_use]
    pub fn state(mut self, state: Arc<dyn StateContainer>) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn bindings(mut self, bindings: Arc<dyn BindingResolver>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    #[must_use]
    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    #[must_use]
    pub fn runtime(mut self, runtime: Arc<dyn RuntimeCallbacks>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
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

    /// Enable the login/logout response hooks and, unless a resolver is
    /// supplied, session tokens for bearer data sources.
    #[must_use]
    pub fn auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Replace the strategy for one action kind.
    #[must_use]
    pub fn strategy(mut self, kind: ActionKind, strategy: Arc<dyn ActionStrategy>) -> Self {
        self.strategies.register(kind, strategy);
        self
    }

    #[must_use]
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] when the executor, state
    /// container or runtime callbacks are missing, or when `max_depth` is
    /// zero.
    pub fn build(self) -> Result<ActionDispatcher, DispatchError> {
        let executor = self
            .executor
            .ok_or_else(|| DispatchError::Configuration("a request executor is required".into()))?;
        let state = self
            .state
            .ok_or_else(|| DispatchError::Configuration("a state container is required".into()))?;
        let runtime = self
            .runtime
            .ok_or_else(|| DispatchError::Configuration("runtime callbacks are required".into()))?;
        if self.config.max_depth == 0 {
            return Err(DispatchError::Configuration("max_depth must be at least 1".into()));
        }

        let bindings: Arc<dyn BindingResolver> = match self.bindings {
            Some(bindings) => bindings,
            None => Arc::new(TemplateBindingResolver),
        };
        let translator: Arc<dyn Translator> = match self.translator {
            Some(translator) => translator,
            None => Arc::new(IdentityTranslator),
        };
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => {
                let resolver =
                    DataSourceResolver::new(Arc::clone(&bindings), Arc::clone(&translator));
                match &self.auth {
                    Some(auth) => resolver.with_tokens(Arc::clone(auth) as Arc<dyn TokenProvider>),
                    None => resolver,
                }
            }
        };
        let telemetry: Arc<dyn Telemetry> = match self.telemetry {
            Some(telemetry) => telemetry,
            None => Arc::new(TracingTelemetry),
        };
        let scripts: Arc<dyn ScriptEngine> = match self.scripts {
            Some(scripts) => scripts,
            None => Arc::new(NoScriptEngine),
        };
        let devices: Arc<dyn DeviceBridge> = match self.devices {
            Some(devices) => devices,
            None => Arc::new(UnsupportedDevices),
        };

        Ok(ActionDispatcher::from_parts(
            self.registry.unwrap_or_default(),
            self.global,
            resolver,
            executor,
            self.subscriptions,
            state,
            bindings,
            translator,
            runtime,
            telemetry,
            scripts,
            devices,
            self.auth,
            self.strategies,
            self.config,
        ))
    }
}
