use thiserror::Error;

use weft_core::ActionError;
use weft_store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not logged in")]
    NotLoggedIn,

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("no token endpoint configured")]
    NoTokenEndpoint,

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("profile request rejected with 401")]
    Unauthorized,

    #[error("request failed: {0}")]
    Request(#[from] ActionError),

    #[error("malformed auth record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthError> for ActionError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(e) => e.into(),
            AuthError::Request(e) => e,
            AuthError::Unauthorized => ActionError::network(401, err.to_string()),
            other => ActionError::TokenRefresh(other.to_string()),
        }
    }
}
