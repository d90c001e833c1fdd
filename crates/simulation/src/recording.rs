//! Recording implementations of the host collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use weft_core::{
    ActionError, ActionKind, DeviceBridge, MemoryAppState, RuntimeCallbacks, StateContainer,
    Telemetry, TelemetryEvent, ToastVariant, TokenProvider,
};

/// One call made on [`RecordingRuntime`].
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Toast { message: String, variant: ToastVariant },
    Navigate { href: String, replace: bool },
    OpenModal(String),
    CloseModal(String),
    Download { filename: String, content_type: String, data: Vec<u8> },
}

/// [`RuntimeCallbacks`] that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    pub fn toasts(&self) -> Vec<(String, ToastVariant)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Toast { message, variant } => Some((message.clone(), *variant)),
                _ => None,
            })
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Navigate { href, .. } => Some(href.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn downloads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Download {
                    filename,
                    content_type,
                    data,
                } => Some((filename.clone(), content_type.clone(), data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// # Panics
    ///
    /// Panics unless some toast has exactly this message.
    pub fn assert_toast(&self, message: &str) {
        let toasts = self.toasts();
        assert!(
            toasts.iter().any(|(m, _)| m == message),
            "expected toast '{message}', got {toasts:?}"
        );
    }

    /// # Panics
    ///
    /// Panics if any toast was shown.
    pub fn assert_no_toasts(&self) {
        let toasts = self.toasts();
        assert!(toasts.is_empty(), "expected no toasts, got {toasts:?}");
    }
}

impl RuntimeCallbacks for RecordingRuntime {
    fn toast(&self, message: &str, variant: ToastVariant) {
        self.calls.lock().push(RuntimeCall::Toast {
            message: message.to_owned(),
            variant,
        });
    }

    fn navigate(&self, href: &str, replace: bool) {
        self.calls.lock().push(RuntimeCall::Navigate {
            href: href.to_owned(),
            replace,
        });
    }

    fn open_modal(&self, id: &str) {
        self.calls.lock().push(RuntimeCall::OpenModal(id.to_owned()));
    }

    fn close_modal(&self, id: &str) {
        self.calls.lock().push(RuntimeCall::CloseModal(id.to_owned()));
    }

    fn download(&self, filename: &str, content_type: &str, data: &[u8]) -> Result<(), ActionError> {
        self.calls.lock().push(RuntimeCall::Download {
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            data: data.to_vec(),
        });
        Ok(())
    }
}

/// [`Telemetry`] that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

/// [`StateContainer`] over [`MemoryAppState`] that records every patch.
#[derive(Debug, Default)]
pub struct RecordingState {
    inner: MemoryAppState,
    patches: Mutex<Vec<(String, Value)>>,
}

impl RecordingState {
    pub fn new(initial: Value) -> Self {
        Self {
            inner: MemoryAppState::new(initial),
            patches: Mutex::new(Vec::new()),
        }
    }

    /// Every `set_state` call, in order.
    pub fn patches(&self) -> Vec<(String, Value)> {
        self.patches.lock().clone()
    }

    /// Patches written to `path`.
    pub fn patches_to(&self, path: &str) -> Vec<Value> {
        self.patches
            .lock()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl StateContainer for RecordingState {
    fn snapshot(&self) -> Value {
        self.inner.snapshot()
    }

    fn set_state(&self, path: &str, value: Value) {
        self.patches.lock().push((path.to_owned(), value.clone()));
        self.inner.set_state(path, value);
    }
}

/// [`TokenProvider`] with a fixed token and scripted refresh results.
#[derive(Debug)]
pub struct ScriptedTokens {
    token: Mutex<Option<String>>,
    refreshes: Mutex<VecDeque<Result<String, ActionError>>>,
    refresh_calls: AtomicUsize,
}

impl ScriptedTokens {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: Mutex::new(token.map(str::to_owned)),
            refreshes: Mutex::new(VecDeque::new()),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// Queue the outcome of the next refresh.
    #[must_use]
    pub fn then_refresh(self, result: Result<&str, ActionError>) -> Self {
        self.refreshes.lock().push_back(result.map(str::to_owned));
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for ScriptedTokens {
    fn access_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn can_refresh(&self) -> bool {
        !self.refreshes.lock().is_empty()
    }

    async fn refresh_token(&self) -> Result<String, ActionError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .refreshes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ActionError::TokenRefresh("no scripted refresh".into())));
        if let Ok(token) = &next {
            *self.token.lock() = Some(token.clone());
        }
        next
    }
}

/// [`DeviceBridge`] that records invocations and answers from a script.
#[derive(Debug, Default)]
pub struct RecordingDevices {
    invocations: Mutex<Vec<(ActionKind, Value)>>,
    replies: Mutex<Vec<(ActionKind, Result<Value, ActionError>)>>,
}

impl RecordingDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every invocation of `kind` with `reply`.
    #[must_use]
    pub fn on(self, kind: ActionKind, reply: Result<Value, ActionError>) -> Self {
        self.replies.lock().push((kind, reply));
        self
    }

    pub fn invocations(&self) -> Vec<(ActionKind, Value)> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl DeviceBridge for RecordingDevices {
    async fn invoke(&self, kind: ActionKind, params: &Value) -> Result<Value, ActionError> {
        self.invocations.lock().push((kind, params.clone()));
        self.replies
            .lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or_else(
                || Err(ActionError::Unsupported(format!("no device for {kind}"))),
                |(_, reply)| reply.clone(),
            )
    }
}
