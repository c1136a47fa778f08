//! Relay errors.

use thiserror::Error;

/// Errors surfaced to the caller of a relay operation.
///
/// Both kinds are local validation failures and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The referenced subscription is not live.
    #[error("{0}")]
    NotFound(String),

    /// The caller is not allowed to perform the operation.
    #[error("{0}")]
    Forbidden(String),
}

impl RelayError {
    /// Error for a sender token that does not resolve.
    #[must_use]
    pub fn subscription_not_found(token: &str) -> Self {
        RelayError::NotFound(format!("Subscription {} does not exist", token))
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => "not_found",
            RelayError::Forbidden(_) => "forbidden",
        }
    }
}
