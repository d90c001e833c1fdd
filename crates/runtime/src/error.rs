use thiserror::Error;

use weft_auth::AuthError;
use weft_dispatcher::DispatchError;
use weft_offline::OfflineError;

use crate::config::ConfigError;

/// Errors from assembling or driving a [`Runtime`](crate::Runtime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Offline(#[from] OfflineError),

    #[error("failed to read screen {path}: {reason}")]
    Screen { path: String, reason: String },
}
