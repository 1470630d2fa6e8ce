//! Error types surfaced by convergence.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::instance::ObservedInstanceState;
use crate::poll::{RetryClass, Retryable};

/// Errors raised while converging an instance.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Raised when a remote call fails.
    #[error("{action} failed: {source}")]
    Api {
        /// Remote call that failed.
        action: String,
        /// Failure reported by the remote API.
        #[source]
        source: ApiError,
    },
    /// Raised when a wait exceeds its deadline.
    #[error("timeout waiting for {action} on instance {instance_id}")]
    Timeout {
        /// Transition being waited on.
        action: String,
        /// Provider instance identifier.
        instance_id: String,
        /// Last error swallowed while polling, if any.
        last_error: Option<String>,
    },
    /// Raised when a newly created instance reports the ERROR status.
    #[error("instance {instance_id} entered ERROR state while waiting for {action}")]
    EnteredErrorState {
        /// Provider instance identifier.
        instance_id: String,
        /// Transition being waited on.
        action: String,
    },
    /// Raised when an existing instance reports the ERROR status during a
    /// power or resize transition.
    #[error("instance {instance_id} state transitioned to ERROR while waiting for {action}")]
    TransitionedToError {
        /// Provider instance identifier.
        instance_id: String,
        /// Transition being waited on.
        action: String,
    },
    /// Raised when the requested change cannot be applied to an existing
    /// instance; every violation found is listed.
    #[error("unsupported operation: {}", .reasons.join("; "))]
    UnsupportedOperation {
        /// One entry per rejected change.
        reasons: Vec<String>,
    },
    /// Raised when the server IP listing has no entry for the instance.
    #[error("no IP information reported for instance {instance_id}")]
    MissingIpInfo {
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when a floating IP targets a network the instance is not
    /// attached to.
    #[error("instance {instance_id} has no attachment on network {network_id}")]
    MissingNetworkAttachment {
        /// Network the floating IP targets.
        network_id: String,
        /// Provider instance identifier.
        instance_id: String,
    },
    /// Raised when a requested network does not exist.
    #[error("network {network_id} not found")]
    UnknownNetwork {
        /// Requested network identifier.
        network_id: String,
    },
    /// Raised when a requested network has no subnet to allocate from.
    #[error("network {network_id} has no subnet")]
    NetworkWithoutSubnet {
        /// Requested network identifier.
        network_id: String,
    },
    /// Raised when creation succeeded but a later step failed. The state
    /// describes the instance as far as it was built.
    #[error("instance {} created but not fully converged: {source}", .state.id)]
    CreateIncomplete {
        /// Partially converged state.
        state: Box<ObservedInstanceState>,
        /// Step failure.
        #[source]
        source: Box<ConvergeError>,
    },
    /// Raised when configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ConvergeError {
    /// Wraps a remote failure with the call that produced it.
    #[must_use]
    pub fn api(action: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            action: action.into(),
            source,
        }
    }

    /// Builds an [`ConvergeError::UnsupportedOperation`] with one reason.
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            reasons: vec![reason.into()],
        }
    }
}

impl Retryable for ConvergeError {
    fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api {
                source: ApiError::NotFound { .. } | ApiError::Server { .. },
                ..
            } => RetryClass::Transient,
            Self::Api {
                source: ApiError::Client { .. },
                ..
            } => RetryClass::Client,
            _ => RetryClass::Fatal,
        }
    }
}
