//! Convergence orchestrator for cloud compute instances.
//!
//! The crate drives a remote infrastructure API so that an instance and its
//! attachments (networks, volumes, security groups, floating IP) match a
//! declared [`DesiredInstanceSpec`]. Remote calls go through the collaborator
//! traits in [`api`]; asynchronous provider transitions are observed with the
//! deadline-bound poller in [`poll`].

pub mod api;
pub mod config;
pub mod diff;
pub mod error;
pub mod instance;
pub mod network;
pub mod orchestrator;
pub mod poll;
pub mod test_support;

pub use api::{ApiError, CloudApis};
pub use config::{ConfigError, ConvergeConfig, Timeouts};
pub use diff::{ConvergenceOperation, OperationKind, diff};
pub use error::ConvergeError;
pub use instance::{
    DesiredInstanceSpec, FloatingIpAttachment, InstanceId, InstanceStatus, NetworkAttachment,
    NetworkRequest, ObservedInstanceState, Region, TaskId,
};
pub use orchestrator::InstanceOrchestrator;
pub use poll::{CondCheckError, PollPolicy, RetryClass, Retryable, WaitError, wait_for};
