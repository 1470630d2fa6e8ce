//! Error taxonomy for remote API calls.

use thiserror::Error;

/// Errors returned by the remote infrastructure API.
///
/// Every collaborator call resolves to one of these variants so callers can
/// pattern-match on the failure class instead of inspecting status codes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// Raised when the addressed resource does not exist (HTTP 404).
    #[error("resource not found: {message}")]
    NotFound {
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when the provider rejects the request (HTTP 4xx).
    #[error("request rejected with status {status}: {message}")]
    Client {
        /// Status code returned by the provider.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when the provider fails internally (HTTP 5xx).
    #[error("provider failure with status {status}: {message}")]
    Server {
        /// Status code returned by the provider.
        status: u16,
        /// Message returned by the provider.
        message: String,
    },
}

impl ApiError {
    /// Builds a [`ApiError::NotFound`] error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Builds a [`ApiError::Client`] error.
    #[must_use]
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::Client {
            status,
            message: message.into(),
        }
    }

    /// Builds a [`ApiError::Server`] error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
