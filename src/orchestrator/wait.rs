//! Status waits shared by the lifecycle operations.

use tokio::time::Instant;

use crate::error::ConvergeError;
use crate::instance::InstanceStatus;
use crate::poll::{CondCheckError, WaitError, wait_for};

use super::InstanceOrchestrator;

impl InstanceOrchestrator {
    /// Polls the instance until it reports `target`. The ERROR status ends
    /// the wait immediately.
    pub(super) async fn wait_for_status(
        &self,
        region: &str,
        instance_id: &str,
        target: &InstanceStatus,
        action: &str,
        deadline: Instant,
    ) -> Result<(), ConvergeError> {
        let compute = self.apis.compute.as_ref();
        wait_for(deadline, self.poll_interval, self.policy, || async move {
            let detail = compute
                .get(region, instance_id)
                .await
                .map_err(|err| ConvergeError::api("get instance", err))?;
            if detail.status == *target {
                return Ok(());
            }
            if detail.status == InstanceStatus::Error {
                return Err(CondCheckError::Failed(ConvergeError::TransitionedToError {
                    instance_id: instance_id.to_owned(),
                    action: action.to_owned(),
                }));
            }
            Err(CondCheckError::NotYet)
        })
        .await
        .map_err(|err| wait_failure(err, action, instance_id))
    }

    /// Polls until the instance lookup reports it missing.
    pub(super) async fn wait_until_gone(
        &self,
        region: &str,
        instance_id: &str,
        deadline: Instant,
    ) -> Result<(), ConvergeError> {
        let compute = self.apis.compute.as_ref();
        wait_for(deadline, self.poll_interval, self.policy, || async move {
            match compute.get(region, instance_id).await {
                Err(err) if err.is_not_found() => Ok(()),
                Err(err) => Err(CondCheckError::Failed(ConvergeError::api("get instance", err))),
                Ok(_) => Err(CondCheckError::NotYet),
            }
        })
        .await
        .map_err(|err| wait_failure(err, "instance deletion", instance_id))
    }
}

/// Maps a poller failure onto the error surfaced to callers.
pub(super) fn wait_failure(
    err: WaitError<ConvergeError>,
    action: &str,
    instance_id: &str,
) -> ConvergeError {
    match err {
        WaitError::Timeout { last_error, .. } => ConvergeError::Timeout {
            action: action.to_owned(),
            instance_id: instance_id.to_owned(),
            last_error,
        },
        WaitError::Aborted(source) => source,
    }
}
