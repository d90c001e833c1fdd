use thiserror::Error;

use weft_core::ActionError;

/// Errors raised while building or addressing the dispatcher. Failures of
/// the actions themselves are reported through
/// [`Outcome`](crate::Outcome), never through this type.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A required collaborator was not supplied to the builder.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The screen has no handler with this name.
    #[error("handler not found: {0}")]
    HandlerNotFound(String),
}

impl From<DispatchError> for ActionError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Configuration(msg) => Self::Configuration(msg),
            DispatchError::HandlerNotFound(name) => Self::NotFound(format!("handler '{name}'")),
        }
    }
}
