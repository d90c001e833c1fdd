//! Test doubles for weft components.
//!
//! - [`ScriptedTransport`]: HTTP routes answered from a script, every request
//!   captured
//! - [`ScriptedConnector`]: in-memory WebSockets where the test plays the
//!   server
//! - [`RecordingRuntime`], [`RecordingTelemetry`], [`RecordingState`]:
//!   host collaborators that remember every call
//! - [`ScriptedTokens`], [`RecordingDevices`]: token and device
//!   collaborators with scripted answers
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use weft_core::{HttpMethod, ResolvedRequest};
//! use weft_executor::{ExecutorConfig, RequestExecutor};
//! use weft_simulation::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = Arc::new(
//!     ScriptedTransport::new().respond_json(None, "/todos", 200, serde_json::json!([{"id": 1}])),
//! );
//! let executor = RequestExecutor::new(transport.clone(), ExecutorConfig::default());
//! let request = ResolvedRequest::new("todos", HttpMethod::Get, "https://api.test/todos");
//!
//! let result = executor.execute(&request, None, &Default::default()).await;
//! result.assert_success();
//! transport.assert_called(1);
//! # }
//! ```

pub mod assertions;
pub mod recording;
pub mod socket;
pub mod transport;

pub use assertions::ResponseAssertions;
pub use recording::{
    RecordingDevices, RecordingRuntime, RecordingState, RecordingTelemetry, RuntimeCall,
    ScriptedTokens,
};
pub use socket::{ScriptedConnector, ScriptedServer, ScriptedSocket};
pub use transport::{CapturedRequest, Scripted, ScriptedTransport};

/// Prelude module for convenient imports.
///
/// ```
/// use weft_simulation::prelude::*;
/// ```
pub mod prelude {
    pub use crate::assertions::ResponseAssertions;
    pub use crate::recording::{
        RecordingDevices, RecordingRuntime, RecordingState, RecordingTelemetry, RuntimeCall,
        ScriptedTokens,
    };
    pub use crate::socket::{ScriptedConnector, ScriptedServer};
    pub use crate::transport::{Scripted, ScriptedTransport};
}
