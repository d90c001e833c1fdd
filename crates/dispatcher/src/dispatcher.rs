use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use weft_auth::AuthManager;
use weft_core::{
    ActionError, ActionKind, BindingResolver, DeviceBridge, EventHandler, InvocationId,
    ResultMapping, RuntimeCallbacks, Screen, ScriptEngine, StateContainer, StatePatch, Telemetry,
    TelemetryEvent, ToastVariant, Transition, Translator, path,
};
use weft_datasource::{DataSourceRegistry, DataSourceResolver, GlobalConfig};
use weft_executor::{RequestExecutor, SubscriptionManager};

use crate::actions::network::QUEUED_KEY;
use crate::builder::DispatcherBuilder;
use crate::config::DispatcherConfig;
use crate::context::{ActionContext, Invocation};
use crate::error::DispatchError;
use crate::outcome::{DispatchReport, Outcome, Phase};
use crate::strategy::StrategyTable;

const ID_PLACEHOLDER: &str = "{id}";

/// Drives event handlers through
/// `Idle → Before → Executing → Success | Error → Finally → Done`.
///
/// Every dispatch gets its own [`InvocationId`] and cancellation token,
/// registered for the duration of the call. Invocations are not serialized
/// against each other: two concurrent handlers writing the same state path
/// race, and the later-completing write wins.
pub struct ActionDispatcher {
    pub(crate) registry: Arc<DataSourceRegistry>,
    pub(crate) global: GlobalConfig,
    pub(crate) resolver: DataSourceResolver,
    pub(crate) executor: Arc<RequestExecutor>,
    pub(crate) subscriptions: Option<Arc<SubscriptionManager>>,
    pub(crate) state: Arc<dyn StateContainer>,
    pub(crate) bindings: Arc<dyn BindingResolver>,
    pub(crate) translator: Arc<dyn Translator>,
    pub(crate) runtime: Arc<dyn RuntimeCallbacks>,
    pub(crate) telemetry: Arc<dyn Telemetry>,
    pub(crate) scripts: Arc<dyn ScriptEngine>,
    pub(crate) devices: Arc<dyn DeviceBridge>,
    pub(crate) auth: Option<Arc<AuthManager>>,
    pub(crate) strategies: StrategyTable,
    pub(crate) config: DispatcherConfig,
    invocations: DashMap<InvocationId, CancellationToken>,
    /// Streams that outlive their dispatch, keyed by the invocation that
    /// opened them.
    pub(crate) streams: Arc<DashMap<InvocationId, CancellationToken>>,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("config", &self.config)
            .field("strategies", &self.strategies)
            .field("in_flight", &self.invocations.len())
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

/// Removes an invocation's token when the dispatch ends, however it ends.
struct Registration<'a> {
    map: &'a DashMap<InvocationId, CancellationToken>,
    id: InvocationId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

/// The remaining chain was cancelled.
struct Interrupted;

struct Run {
    phases: Vec<Phase>,
    result: Result<Value, ActionError>,
}

impl Run {
    fn cancelled(mut phases: Vec<Phase>) -> Self {
        phases.push(Phase::Done);
        Self {
            phases,
            result: Err(ActionError::Cancelled),
        }
    }
}

impl ActionDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        registry: Arc<DataSourceRegistry>,
        global: GlobalConfig,
        resolver: DataSourceResolver,
        executor: Arc<RequestExecutor>,
        subscriptions: Option<Arc<SubscriptionManager>>,
        state: Arc<dyn StateContainer>,
        bindings: Arc<dyn BindingResolver>,
        translator: Arc<dyn Translator>,
        runtime: Arc<dyn RuntimeCallbacks>,
        telemetry: Arc<dyn Telemetry>,
        scripts: Arc<dyn ScriptEngine>,
        devices: Arc<dyn DeviceBridge>,
        auth: Option<Arc<AuthManager>>,
        strategies: StrategyTable,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            global,
            resolver,
            executor,
            subscriptions,
            state,
            bindings,
            translator,
            runtime,
            telemetry,
            scripts,
            devices,
            auth,
            strategies,
            config,
            invocations: DashMap::new(),
            streams: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn registry(&self) -> &DataSourceRegistry {
        &self.registry
    }

    pub fn auth(&self) -> Option<&Arc<AuthManager>> {
        self.auth.as_ref()
    }

    /// Dispatch `handler` with `payload` as the `event` in scope.
    pub async fn dispatch(&self, handler: &EventHandler, payload: Value) -> DispatchReport {
        self.dispatch_with(InvocationId::generate(), None, handler, payload)
            .await
    }

    /// Dispatch the screen's handler `name`. Screen-local data sources take
    /// precedence over the global registry.
    pub async fn dispatch_screen(
        &self,
        screen: &Screen,
        name: &str,
        payload: Value,
    ) -> Result<DispatchReport, DispatchError> {
        let handler = screen
            .handler(name)
            .ok_or_else(|| DispatchError::HandlerNotFound(name.to_owned()))?;
        Ok(self
            .dispatch_with(InvocationId::generate(), Some(screen), handler, payload)
            .await)
    }

    /// Dispatch under a caller-chosen invocation id, so the caller can
    /// [`cancel`](Self::cancel) it while it runs.
    #[instrument(
        name = "dispatcher.dispatch",
        skip_all,
        fields(invocation_id = %id, action = %handler.action)
    )]
    pub async fn dispatch_with(
        &self,
        id: InvocationId,
        screen: Option<&Screen>,
        handler: &EventHandler,
        payload: Value,
    ) -> DispatchReport {
        let cancel = CancellationToken::new();
        self.invocations.insert(id.clone(), cancel.clone());
        let _registration = Registration {
            map: &self.invocations,
            id: id.clone(),
        };

        let invocation = Invocation {
            id: id.clone(),
            cancel,
            local: screen.map_or(&[][..], |s| s.data_sources.as_slice()),
            requires_auth: screen.is_some_and(|s| s.requires_auth),
        };
        let mut context = Map::new();
        context.insert("event".into(), payload);

        let started = Instant::now();
        let run = self.run(&invocation, handler, context, 1).await;
        let outcome = Outcome::from_result(&run.result);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let label = match &outcome {
            Outcome::Succeeded(_) => "succeeded",
            Outcome::Failed(_) => "failed",
            Outcome::Cancelled => "cancelled",
        };
        info!(outcome = label, elapsed_ms, "dispatch finished");
        self.telemetry.track(TelemetryEvent::new(
            "action_dispatched",
            json!({
                "action": handler.action,
                "invocationId": id,
                "outcome": label,
                "durationMs": elapsed_ms,
            }),
        ));

        DispatchReport {
            invocation_id: id,
            phases: run.phases,
            outcome,
        }
    }

    /// Cancel an in-flight invocation and tear down any stream it opened.
    /// Returns whether anything was found under `id`.
    pub fn cancel(&self, id: &InvocationId) -> bool {
        let mut found = false;
        if let Some(token) = self.invocations.get(id) {
            token.cancel();
            found = true;
        }
        if let Some((_, token)) = self.streams.remove(id) {
            token.cancel();
            found = true;
        }
        if found {
            info!(invocation_id = %id, "invocation cancelled");
        }
        found
    }

    /// Cancel every in-flight invocation and open stream.
    pub fn cancel_all(&self) {
        for entry in &self.invocations {
            entry.value().cancel();
        }
        self.streams.retain(|_, token| {
            token.cancel();
            false
        });
    }

    /// Invocations currently in flight or holding an open stream.
    pub fn active(&self) -> Vec<InvocationId> {
        let mut ids: Vec<InvocationId> = self
            .invocations
            .iter()
            .map(|e| e.key().clone())
            .chain(self.streams.iter().map(|e| e.key().clone()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Current state with `context` layered on top.
    pub(crate) fn scope(&self, context: &Map<String, Value>) -> Value {
        let mut scope = match self.state.snapshot() {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("state".into(), other);
                map
            }
        };
        for (key, value) in context {
            scope.insert(key.clone(), value.clone());
        }
        Value::Object(scope)
    }

    pub(crate) fn resolve(&self, expr: &Value, scope: &Value) -> Value {
        self.bindings.resolve(expr, scope, &*self.translator)
    }

    pub(crate) fn resolve_str(&self, template: &str, scope: &Value) -> String {
        match self.resolve(&Value::String(template.to_owned()), scope) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn run<'a>(
        &'a self,
        invocation: &'a Invocation<'a>,
        handler: &'a EventHandler,
        context: Map<String, Value>,
        depth: usize,
    ) -> BoxFuture<'a, Run> {
        self.run_handler(invocation, handler, context, depth).boxed()
    }

    async fn run_handler(
        &self,
        invocation: &Invocation<'_>,
        handler: &EventHandler,
        mut context: Map<String, Value>,
        depth: usize,
    ) -> Run {
        let mut phases = vec![Phase::Idle];
        if depth > self.config.max_depth {
            warn!(depth, action = %handler.action, "handler nesting too deep, not executing");
            phases.push(Phase::Done);
            return Run {
                phases,
                result: Err(ActionError::Validation(format!(
                    "handler nesting exceeds {} levels",
                    self.config.max_depth
                ))),
            };
        }

        if !handler.before.is_empty() {
            phases.push(Phase::Before);
            if self
                .run_children(invocation, &handler.before, &context, depth, false)
                .await
                .is_err()
            {
                return Run::cancelled(phases);
            }
        }

        self.apply_patches(&handler.optimistic, &context);

        phases.push(Phase::Executing);
        let (result, errored) = match self.execute_main(invocation, handler, &context).await {
            Ok(value) => {
                phases.push(Phase::Success);
                match self
                    .success_branch(invocation, handler, value, &mut context, depth)
                    .await
                {
                    Ok(value) => (Ok(value), false),
                    Err(Interrupted) => return Run::cancelled(phases),
                }
            }
            Err(ActionError::Cancelled) => {
                debug!(action = %handler.action, "main action cancelled");
                return Run::cancelled(phases);
            }
            Err(err) => {
                phases.push(Phase::Error);
                if self
                    .error_branch(invocation, handler, &err, &mut context, depth)
                    .await
                    .is_err()
                {
                    return Run::cancelled(phases);
                }
                (Err(err), true)
            }
        };

        phases.push(Phase::Finally);
        if self
            .run_children(invocation, &handler.finally, &context, depth, errored)
            .await
            .is_err()
        {
            return Run::cancelled(phases);
        }
        phases.push(Phase::Done);
        Run { phases, result }
    }

    async fn execute_main(
        &self,
        invocation: &Invocation<'_>,
        handler: &EventHandler,
        context: &Map<String, Value>,
    ) -> Result<Value, ActionError> {
        if invocation.cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }
        let strategy = self.strategies.get(handler.action).ok_or_else(|| {
            ActionError::Unsupported(format!("no strategy registered for {}", handler.action))
        })?;
        let cx = ActionContext {
            dispatcher: self,
            invocation,
            handler,
            context,
        };
        tokio::select! {
            biased;
            () = invocation.cancel.cancelled() => Err(ActionError::Cancelled),
            result = strategy.execute(&cx) => result,
        }
    }

    async fn success_branch(
        &self,
        invocation: &Invocation<'_>,
        handler: &EventHandler,
        value: Value,
        context: &mut Map<String, Value>,
        depth: usize,
    ) -> Result<Value, Interrupted> {
        let value = self.apply_response(handler, value, context);
        self.auth_hooks(invocation, handler, &value).await;
        context.insert("result".into(), value.clone());

        let message = match &handler.success_message {
            Some(template) => Some(self.resolve_str(template, &self.scope(context))),
            // Nothing was created yet while the request waits in the queue.
            None if is_queued(&value) => None,
            None => handler.action.default_success_message().map(str::to_owned),
        };
        if let Some(message) = message {
            self.runtime.toast(&message, ToastVariant::Success);
        }

        self.run_children(invocation, &handler.success, context, depth, false)
            .await?;
        if let Some(transition) = &handler.success_transition {
            self.apply_transition(transition, context);
        }
        Ok(value)
    }

    async fn error_branch(
        &self,
        invocation: &Invocation<'_>,
        handler: &EventHandler,
        err: &ActionError,
        context: &mut Map<String, Value>,
        depth: usize,
    ) -> Result<(), Interrupted> {
        let info = err.info();
        warn!(action = %handler.action, code = err.code(), error = %err, "action failed");
        context.insert(
            "error".into(),
            json!({"message": info.message, "status": info.status}),
        );

        if self.config.error_toast {
            let message = match &handler.error_message {
                Some(template) => self.resolve_str(template, &self.scope(context)),
                None => info.message,
            };
            self.runtime.toast(&message, ToastVariant::Error);
        }

        self.run_children(invocation, &handler.error, context, depth, false)
            .await?;
        if let Some(transition) = &handler.error_transition {
            self.apply_transition(transition, context);
        }
        Ok(())
    }

    /// Run sub-handlers in order. A failing sub-handler has already run its
    /// own error branch and does not stop its siblings; cancellation stops
    /// the rest of the chain.
    ///
    /// `after_error` marks the finally list of a handler whose main action
    /// failed: navigation sub-handlers are skipped there so the user stays
    /// on the error state, while every other sub-handler still runs.
    async fn run_children(
        &self,
        invocation: &Invocation<'_>,
        children: &[EventHandler],
        context: &Map<String, Value>,
        depth: usize,
        after_error: bool,
    ) -> Result<(), Interrupted> {
        for child in children {
            if invocation.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            if after_error && child.action == ActionKind::Navigation {
                debug!("skipping finally navigation after an error");
                continue;
            }
            let run = self.run(invocation, child, context.clone(), depth + 1).await;
            match run.result {
                Err(ActionError::Cancelled) => return Err(Interrupted),
                Err(err) => debug!(action = %child.action, error = %err, "sub-handler failed"),
                Ok(_) => {}
            }
        }
        Ok(())
    }

    /// Apply patches in order, re-reading state before each one.
    fn apply_patches(&self, patches: &[StatePatch], context: &Map<String, Value>) {
        for patch in patches {
            let scope = self.scope(context);
            let path = self.resolve_str(&patch.path, &scope);
            let value = self.resolve(&patch.value, &scope);
            self.state.set_state(&path, value);
        }
    }

    fn apply_transition(&self, transition: &Transition, context: &Map<String, Value>) {
        self.apply_patches(&transition.set_state, context);
        let scope = self.scope(context);
        if let Some(id) = &transition.close_modal {
            self.runtime.close_modal(&self.resolve_str(id, &scope));
        }
        if let Some(id) = &transition.open_modal {
            self.runtime.open_modal(&self.resolve_str(id, &scope));
        }
        if let Some(nav) = &transition.navigate {
            self.runtime
                .navigate(&self.resolve_str(&nav.href, &scope), nav.replace);
        }
    }

    /// Map the result and bind it to the response state path.
    ///
    /// A failing mapping script never fails the action: the result becomes
    /// `{ok: false, error}` so state consumers always see a well-shaped value.
    fn apply_response(
        &self,
        handler: &EventHandler,
        value: Value,
        context: &Map<String, Value>,
    ) -> Value {
        let Some(response) = &handler.response else {
            return value;
        };
        if handler.action == ActionKind::GraphqlSubscription || is_queued(&value) {
            return value;
        }

        let mapped = match &response.result_mapping {
            None => value,
            Some(ResultMapping::Paths(paths)) => Value::Object(
                paths
                    .iter()
                    .map(|(key, p)| {
                        let picked = path::get(&value, p).cloned().unwrap_or(Value::Null);
                        (key.clone(), picked)
                    })
                    .collect(),
            ),
            Some(ResultMapping::Script(script)) => {
                let input = json!({"result": value, "state": self.state.snapshot()});
                match self.scripts.evaluate(script, &input) {
                    Ok(mapped) => mapped,
                    Err(e) => {
                        let err = ActionError::Transform(e.to_string());
                        warn!(error = %err, "result mapping failed");
                        json!({"ok": false, "error": err.to_string()})
                    }
                }
            }
        };

        if let Some(template) = &response.state_path {
            let scope = self.scope(context);
            let mut target = self.resolve_str(template, &scope);
            if target.contains(ID_PLACEHOLDER) {
                let id = placeholder_id(context.get("event"), &scope);
                target = target.replace(ID_PLACEHOLDER, &id);
            }
            debug!(path = %target, "binding response to state");
            self.state.set_state(&target, mapped.clone());
        }
        mapped
    }

    /// Start or end the session after a login- or logout-shaped response.
    async fn auth_hooks(&self, invocation: &Invocation<'_>, handler: &EventHandler, value: &Value) {
        let Some(auth) = &self.auth else {
            return;
        };
        let name = handler
            .data_source_id
            .as_ref()
            .and_then(|id| self.registry.find(id, invocation.local).ok())
            .map(|ds| ds.display_name().to_ascii_lowercase())
            .unwrap_or_default();
        let logout = handler.is_logout || name.contains("logout");
        let login = !logout
            && (handler.is_login || name.contains("login") || name.contains("register"));

        if logout {
            let redirect = self.config.post_logout_redirect.as_deref();
            if let Err(e) = auth.logout(invocation.requires_auth && redirect.is_none()).await {
                warn!(error = %e, "logout failed");
            }
            if let Some(to) = redirect {
                self.runtime.navigate(to, true);
            }
        } else if login {
            let Some(session) = login_session(value) else {
                warn!(action = %handler.action, "login response carried no token");
                return;
            };
            match auth
                .login(&session.token, session.refresh.as_deref(), session.expires_in)
                .await
            {
                Ok(_) => {
                    if let Some(to) = &self.config.post_login_redirect {
                        self.runtime.navigate(to, true);
                    }
                }
                Err(e) => warn!(error = %e, "failed to start session from login response"),
            }
        }
    }
}

struct LoginSession {
    token: String,
    refresh: Option<String>,
    expires_in: Option<Duration>,
}

/// Token fields from a login response body or its `data` envelope.
fn login_session(value: &Value) -> Option<LoginSession> {
    std::iter::once(value)
        .chain(value.get("data"))
        .find_map(|body| {
            let token = first_str(body, &["token", "accessToken", "access_token"])?;
            Some(LoginSession {
                token,
                refresh: first_str(body, &["refreshToken", "refresh_token"]),
                expires_in: ["expiresIn", "expires_in"]
                    .iter()
                    .find_map(|k| body.get(*k).and_then(Value::as_u64))
                    .map(Duration::from_secs),
            })
        })
}

fn first_str(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_owned)
}

fn is_queued(value: &Value) -> bool {
    value.get(QUEUED_KEY).and_then(Value::as_bool) == Some(true)
}

/// Id substituted for `{id}`: the payload's event, own, node or item id,
/// then the payload itself when scalar, then `selectedId` from state.
fn placeholder_id(payload: Option<&Value>, scope: &Value) -> String {
    fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    payload
        .and_then(|p| {
            ["event.id", "id", "node.id", "item.id"]
                .iter()
                .find_map(|k| path::get(p, k).and_then(scalar))
                .or_else(|| scalar(p))
        })
        .or_else(|| path::get(scope, "selectedId").and_then(scalar))
        .unwrap_or_else(|| "unknown".to_owned())
}
