pub mod auth;
pub mod binding;
pub mod collab;
pub mod datasource;
pub mod error;
pub mod handler;
pub mod offline;
pub mod path;
pub mod request;
pub mod response;
pub mod retry;
pub mod screen;
pub mod state;
pub mod types;

pub use auth::StoredAuth;
pub use binding::TemplateBindingResolver;
pub use collab::{
    BindingResolver, DeviceBridge, IdentityTranslator, NoScriptEngine, RuntimeCallbacks,
    ScriptEngine, StateContainer, Telemetry, TelemetryEvent, TokenProvider, ToastVariant,
    TracingTelemetry, Translator, UnsupportedDevices,
};
pub use datasource::{
    AuthDescriptor, AuthType, BodyEncoding, CredentialsMode, DataSource, GraphqlOperation,
    HttpMethod, SubscriptionProtocol,
};
pub use error::{ActionError, ErrorInfo, RETRYABLE_STATUSES};
pub use handler::{
    ActionKind, EventHandler, NavigateSpec, ResponseHandling, ResponseType, ResultMapping,
    StatePatch, Transition,
};
pub use offline::{OfflineEvent, OfflineEventKind};
pub use request::{GraphqlRequest, MultipartPart, PartValue, RequestBody, ResolvedRequest};
pub use response::{ApiResponse, ResponseBody};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use screen::Screen;
pub use state::MemoryAppState;
pub use types::{DataSourceId, EventId, InvocationId};
