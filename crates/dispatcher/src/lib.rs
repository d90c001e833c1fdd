//! Action dispatcher for weft screens.
//!
//! An [`ActionDispatcher`] takes an [`EventHandler`](weft_core::EventHandler)
//! and drives it through its lifecycle:
//!
//! 1. **Before** sub-handlers run in order.
//! 2. Optimistic state patches are applied.
//! 3. The main action executes through the [`ActionStrategy`] registered
//!    for its kind, racing the invocation's cancellation token.
//! 4. On success the result is mapped, bound to state and handed to the
//!    success sub-handlers; on failure the error sub-handlers see
//!    `{message, status}` under `error`.
//! 5. **Finally** sub-handlers always run, except navigation after an
//!    error.
//!
//! Network actions go through the shared
//! [`RequestExecutor`](weft_executor::RequestExecutor), so they inherit its
//! retry, offline queue and token refresh behaviour. Every dispatch returns
//! a [`DispatchReport`] with the phases it visited and its [`Outcome`].

pub mod actions;
pub mod builder;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod replay;
pub mod strategy;
pub mod validate;

pub use builder::DispatcherBuilder;
pub use config::DispatcherConfig;
pub use context::ActionContext;
pub use dispatcher::ActionDispatcher;
pub use error::DispatchError;
pub use outcome::{DispatchReport, Outcome, Phase};
pub use replay::OfflineReplayer;
pub use strategy::{ActionStrategy, StrategyTable};
pub use validate::{Finding, check_screen};
