use thiserror::Error;

use weft_core::ActionError;
use weft_store::StoreError;

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("corrupt offline queue: {0}")]
    Corrupt(String),

    #[error("no replay executor registered")]
    NoExecutor,
}

impl From<OfflineError> for ActionError {
    fn from(err: OfflineError) -> Self {
        Self::Storage(err.to_string())
    }
}
