//! Instance deletion.

use tracing::{Instrument, info, info_span};

use crate::error::ConvergeError;
use crate::instance::ObservedInstanceState;

use super::{InstanceOrchestrator, deadline_after};

impl InstanceOrchestrator {
    /// Deletes the instance and waits until it is gone. Deleting an instance
    /// that no longer exists succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Api`] when the delete call fails and
    /// [`ConvergeError::Timeout`] when the instance is still listed once the
    /// delete timeout expires.
    pub async fn delete(&self, observed: &ObservedInstanceState) -> Result<(), ConvergeError> {
        let span = info_span!("delete_instance", instance_id = %observed.id, region = %observed.applied.region);
        async {
            let (region, instance_id) = (observed.region(), observed.id.as_str());
            match self.apis.compute.delete(region, instance_id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    info!("instance already deleted");
                    return Ok(());
                }
                Err(err) => return Err(ConvergeError::api("delete instance", err)),
            }

            let deadline = deadline_after(self.timeouts.delete);
            self.wait_until_gone(region, instance_id, deadline).await?;
            info!("instance deleted");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
