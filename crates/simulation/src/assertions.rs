//! Assertion helpers for executor results.

use weft_core::{ActionError, ApiResponse};

/// Assertions on the result of executing a request.
pub trait ResponseAssertions {
    /// # Panics
    ///
    /// Panics unless the result is a 2xx response.
    fn assert_success(&self);

    /// # Panics
    ///
    /// Panics unless the request was queued for offline replay.
    fn assert_queued(&self);

    /// # Panics
    ///
    /// Panics unless the response was served from the offline cache.
    fn assert_from_cache(&self);

    /// # Panics
    ///
    /// Panics unless the result is a network error with `status`.
    fn assert_status(&self, status: u16);

    /// # Panics
    ///
    /// Panics unless the result is [`ActionError::Cancelled`].
    fn assert_cancelled(&self);
}

impl ResponseAssertions for Result<ApiResponse, ActionError> {
    fn assert_success(&self) {
        match self {
            Ok(resp) => assert!(resp.is_success(), "expected 2xx, got {}", resp.status),
            Err(e) => panic!("expected success, got error {e}"),
        }
    }

    fn assert_queued(&self) {
        assert!(
            matches!(self, Ok(resp) if resp.queued.is_some()),
            "expected a queued response, got {self:?}"
        );
    }

    fn assert_from_cache(&self) {
        assert!(
            matches!(self, Ok(resp) if resp.from_cache),
            "expected a cached response, got {self:?}"
        );
    }

    fn assert_status(&self, status: u16) {
        match self {
            Ok(resp) => assert_eq!(resp.status, status, "unexpected status"),
            Err(e) => assert_eq!(e.status(), Some(status), "unexpected error {e}"),
        }
    }

    fn assert_cancelled(&self) {
        assert!(
            matches!(self, Err(ActionError::Cancelled)),
            "expected cancellation, got {self:?}"
        );
    }
}
