//! Offline support: a durable FIFO of pending mutations, a read cache for
//! offline fallbacks, and connectivity tracking.
//!
//! Replay is single-flight and throttled. Each event is handed to the
//! registered [`ReplayExecutor`]; successes are dropped, failures are kept
//! for the next pass.

pub mod config;
pub mod error;
pub mod queue;

pub use config::OfflineConfig;
pub use error::OfflineError;
pub use queue::{OfflineQueue, ReplayExecutor, ReplayProgress, ReplayReport, SyncRegistrar};
