//! Instance convergence.
//!
//! [`InstanceOrchestrator`] drives the collaborator APIs so that a remote
//! instance and its attachments match a [`DesiredInstanceSpec`]. Every remote
//! call is awaited in sequence; status transitions are observed by polling.
//!
//! [`DesiredInstanceSpec`]: crate::instance::DesiredInstanceSpec

use std::time::Duration;

use tokio::time::Instant;

use crate::api::{ApiError, CloudApis, Network};
use crate::config::{ConvergeConfig, DEFAULT_POLL_INTERVAL, Timeouts};
use crate::error::ConvergeError;
use crate::poll::PollPolicy;

mod create;
mod delete;
mod read;
mod update;
mod wait;

/// Converges instances through injected collaborator APIs.
#[derive(Clone, Debug)]
pub struct InstanceOrchestrator {
    apis: CloudApis,
    timeouts: Timeouts,
    poll_interval: Duration,
    policy: PollPolicy,
}

impl InstanceOrchestrator {
    /// Creates an orchestrator with the default timeouts, a five second poll
    /// interval and [`PollPolicy::RetryAll`].
    #[must_use]
    pub fn new(apis: CloudApis) -> Self {
        Self {
            apis,
            timeouts: Timeouts::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            policy: PollPolicy::default(),
        }
    }

    /// Creates an orchestrator tuned by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Config`] when `config` fails validation.
    pub fn from_config(apis: CloudApis, config: &ConvergeConfig) -> Result<Self, ConvergeError> {
        config.validate()?;
        Ok(Self::new(apis)
            .with_timeouts(config.timeouts())
            .with_poll_interval(config.poll_interval())
            .with_poll_policy(config.poll_policy()))
    }

    /// Overrides the per-operation deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides the delay between status checks (primarily used by tests).
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the treatment of client errors while polling.
    #[must_use]
    pub const fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the per-operation deadlines.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Returns the delay between status checks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the treatment of client errors while polling.
    #[must_use]
    pub const fn poll_policy(&self) -> PollPolicy {
        self.policy
    }

    async fn list_networks(&self, region: &str) -> Result<Vec<Network>, ConvergeError> {
        self.apis
            .network
            .list_networks(region)
            .await
            .map_err(|err| ConvergeError::api("list networks", err))
    }

    /// Looks the instance up in the server IP listing. `None` means the
    /// listing has no entry for it.
    async fn public_ip_state(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<Option<bool>, ConvergeError> {
        let listing = self
            .apis
            .floating_ip
            .server_ip_info(region)
            .await
            .map_err(|err| ConvergeError::api("fetch server ip info", err))?;
        Ok(listing
            .into_iter()
            .find(|info| info.server_id == instance_id)
            .map(|info| info.has_public_ip))
    }
}

/// Stand-in deadline for timeouts the clock cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns the instant `timeout` from now, saturating at a far-future
/// deadline.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn ignore_not_found(result: Result<(), ApiError>) -> Result<(), ApiError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

fn public_ip_conflict(instance_id: &str) -> ConvergeError {
    ConvergeError::unsupported(format!(
        "floating ip can only be attached to instance {instance_id} while it has no public ip"
    ))
}
