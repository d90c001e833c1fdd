//! Assembles a weft runtime from configuration.
//!
//! ```no_run
//! use weft_runtime::{Runtime, WeftConfig};
//!
//! # async fn run() -> Result<(), weft_runtime::RuntimeError> {
//! let config = WeftConfig::load(std::path::Path::new("weft.toml"))?;
//! weft_runtime::init_tracing(&config.logging);
//! let runtime = Runtime::builder(config).background(true).build().await?;
//! let screen = runtime.load_screen(std::path::Path::new("screen.json"))?;
//! let report = runtime
//!     .dispatcher()
//!     .dispatch_screen(&screen, "load", serde_json::json!({}))
//!     .await?;
//! println!("{:?}", report.outcome);
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod runtime;
pub mod telemetry;

pub use config::{ConfigError, LoggingConfig, WeftConfig};
pub use error::RuntimeError;
pub use host::ConsoleHost;
pub use runtime::{Runtime, RuntimeBuilder};
pub use telemetry::init_tracing;
