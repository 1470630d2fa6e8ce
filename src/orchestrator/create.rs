//! Instance creation.
//!
//! Creation is asynchronous on the provider side: the request returns a task
//! identifier, the instance is polled until ACTIVE, then until every requested
//! network carries a port. Volumes and the floating IP are attached last.
//! Failures after the creation call never roll back; they surface as
//! [`ConvergeError::CreateIncomplete`] with the state built so far.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::{CreateServerRequest, FloatingIpAttachRequest, ServerDetail};
use crate::error::ConvergeError;
use crate::instance::{
    DesiredInstanceSpec, FloatingIpAttachment, InstanceId, InstanceStatus, NetworkAttachment,
    ObservedInstanceState, TaskId,
};
use crate::network::resolve_by_id;
use crate::poll::{CondCheckError, wait_for};

use super::wait::wait_failure;
use super::{InstanceOrchestrator, deadline_after, public_ip_conflict};

impl InstanceOrchestrator {
    /// Creates an instance and converges its attachments.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::UnsupportedOperation`] when `desired` asks for
    /// a snapshot revert, [`ConvergeError::Api`] when the creation call fails,
    /// and [`ConvergeError::CreateIncomplete`] for any later failure.
    pub async fn create(
        &self,
        desired: &DesiredInstanceSpec,
    ) -> Result<ObservedInstanceState, ConvergeError> {
        let span = info_span!("create_instance", region = %desired.region, name = %desired.name);
        self.create_in_span(desired).instrument(span).await
    }

    async fn create_in_span(
        &self,
        desired: &DesiredInstanceSpec,
    ) -> Result<ObservedInstanceState, ConvergeError> {
        if let Some(snapshot_id) = &desired.revert_to_snapshot_id {
            return Err(ConvergeError::unsupported(format!(
                "cannot revert to snapshot {snapshot_id} while creating an instance"
            )));
        }

        let request = creation_request(desired);
        let created = self
            .apis
            .compute
            .create_async(desired.region.as_str(), &request)
            .await
            .map_err(|err| ConvergeError::api("create instance", err))?;
        info!(instance_id = %created.id, task_id = %created.task_id, "instance creation accepted");

        let mut state = ObservedInstanceState {
            id: InstanceId::new(created.id),
            task_id: (!created.task_id.is_empty()).then(|| TaskId::new(created.task_id)),
            status: created.status,
            cluster_id: None,
            password: (!created.password.is_empty()).then_some(created.password),
            applied: desired.clone(),
            networks: Vec::new(),
            volumes: BTreeSet::new(),
            security_groups: desired.security_groups.clone(),
            floating_ip: None,
        };

        match self.converge_created(desired, &mut state).await {
            Ok(()) => {
                info!(instance_id = %state.id, "instance created");
                Ok(state)
            }
            Err(source) => {
                warn!(instance_id = %state.id, error = %source, "instance created but not converged");
                Err(ConvergeError::CreateIncomplete {
                    state: Box::new(state),
                    source: Box::new(source),
                })
            }
        }
    }

    async fn converge_created(
        &self,
        desired: &DesiredInstanceSpec,
        state: &mut ObservedInstanceState,
    ) -> Result<(), ConvergeError> {
        let deadline = deadline_after(self.timeouts.create);

        let latest = Mutex::new(None);
        let built = self.wait_until_built(state, deadline, &latest).await;
        if let Some(detail) = latest.into_inner().unwrap_or_else(PoisonError::into_inner) {
            apply_build_progress(state, detail);
        }
        built?;

        state.networks = self.wait_for_networks(desired, state, deadline).await?;

        for volume_id in desired.volumes.iter().filter(|id| !id.is_empty()) {
            self.apis
                .volume
                .attach(state.region(), state.id.as_str(), volume_id)
                .await
                .map_err(|err| ConvergeError::api(format!("attach volume {volume_id}"), err))?;
            info!(volume_id = %volume_id, "volume attached");
            state.volumes.insert(volume_id.clone());
        }

        if let Some(floating_ip) = &desired.floating_ip {
            self.attach_initial_floating_ip(state, floating_ip).await?;
            state.floating_ip = Some(floating_ip.clone());
        }
        Ok(())
    }

    /// Polls the creation task, or the instance when no task was returned,
    /// until the instance is ACTIVE. The last response seen is left in
    /// `latest`.
    async fn wait_until_built(
        &self,
        state: &ObservedInstanceState,
        deadline: Instant,
        latest: &Mutex<Option<ServerDetail>>,
    ) -> Result<(), ConvergeError> {
        let compute = self.apis.compute.as_ref();
        let region = state.region();
        let instance_id = state.id.as_str();
        let task_id = state.task_id.as_ref();

        wait_for(deadline, self.poll_interval, self.policy, || async move {
            let lookup = task_id.map_or_else(
                || compute.get(region, instance_id),
                |task| compute.inquiry(region, task.as_str()),
            );
            let detail = lookup
                .await
                .map_err(|err| ConvergeError::api("inquire instance", err))?;
            let status = detail.status.clone();
            let reported_id = detail.id.clone();
            *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(detail);

            match status {
                InstanceStatus::Active => Ok(()),
                InstanceStatus::Error => Err(CondCheckError::Failed(ConvergeError::EnteredErrorState {
                    instance_id: reported_id,
                    action: String::from("instance creation"),
                })),
                other => {
                    debug!(status = %other, "instance still building");
                    Err(CondCheckError::NotYet)
                }
            }
        })
        .await
        .map_err(|err| wait_failure(err, "instance creation", instance_id))
    }

    /// Polls the network graph until every requested network carries a port
    /// for the instance, returning the attachments in request order.
    async fn wait_for_networks(
        &self,
        desired: &DesiredInstanceSpec,
        state: &ObservedInstanceState,
        deadline: Instant,
    ) -> Result<Vec<NetworkAttachment>, ConvergeError> {
        if desired.networks.is_empty() {
            return Ok(Vec::new());
        }
        let region = state.region();
        let instance_id = state.id.as_str();
        let requested: BTreeSet<&str> = desired
            .networks
            .iter()
            .map(|network| network.network_id.as_str())
            .collect();
        let requested_ref = &requested;

        let mut resolved = wait_for(deadline, self.poll_interval, self.policy, || async move {
            let networks = self.list_networks(region).await?;
            let found = resolve_by_id(&networks, requested_ref.iter().copied(), instance_id);
            if found.len() == requested_ref.len() && found.values().all(is_ready) {
                Ok(found)
            } else {
                debug!(ready = found.values().filter(|a| is_ready(a)).count(), "waiting for network ports");
                Err(CondCheckError::NotYet)
            }
        })
        .await
        .map_err(|err| wait_failure(err, "network attachment", instance_id))?;

        Ok(in_request_order(desired, &mut resolved))
    }

    async fn attach_initial_floating_ip(
        &self,
        state: &ObservedInstanceState,
        floating_ip: &FloatingIpAttachment,
    ) -> Result<(), ConvergeError> {
        let instance_id = state.id.as_str();
        let attachment = state
            .network(&floating_ip.network_id)
            .filter(|attachment| attachment.is_attached())
            .ok_or_else(|| ConvergeError::MissingNetworkAttachment {
                network_id: floating_ip.network_id.clone(),
                instance_id: instance_id.to_owned(),
            })?;

        match self.public_ip_state(state.region(), instance_id).await? {
            None => {
                return Err(ConvergeError::MissingIpInfo {
                    instance_id: instance_id.to_owned(),
                });
            }
            Some(true) => return Err(public_ip_conflict(instance_id)),
            Some(false) => {}
        }

        let request = FloatingIpAttachRequest {
            server_id: instance_id.to_owned(),
            subnet_id: attachment.subnet_id.clone(),
            port_id: attachment.port_id.clone(),
        };
        self.apis
            .floating_ip
            .attach(state.region(), &floating_ip.floating_ip_id, &request)
            .await
            .map_err(|err| ConvergeError::api("attach floating ip", err))?;
        info!(floating_ip_id = %floating_ip.floating_ip_id, port_id = %attachment.port_id, "floating ip attached");
        Ok(())
    }
}

/// Builds the single-instance creation payload.
pub(super) fn creation_request(desired: &DesiredInstanceSpec) -> CreateServerRequest {
    CreateServerRequest {
        name: desired.name.clone(),
        count: 1,
        image_id: desired.image_id.clone(),
        flavor_id: desired.flavor_id.clone(),
        network_ids: desired
            .networks
            .iter()
            .map(|network| network.network_id.clone())
            .collect(),
        security_groups: desired.security_groups.iter().cloned().collect(),
        ssh_key: desired.ssh_key_name.is_some(),
        key_name: desired.ssh_key_name.clone(),
        disk_size: desired.disk_size,
        init_script: desired.init_script.clone(),
        server_group_id: desired.server_group_id.clone(),
        dedicated_server_id: desired.dedicated_server_id.clone(),
        snapshot_id: desired.snapshot_id.clone(),
        enable_ipv4: desired.enable_ipv4,
        enable_ipv6: desired.enable_ipv6,
    }
}

fn apply_build_progress(state: &mut ObservedInstanceState, detail: ServerDetail) {
    if !detail.id.is_empty() {
        state.id = InstanceId::new(detail.id);
    }
    if !detail.cluster_id.is_empty() {
        state.cluster_id = Some(detail.cluster_id);
    }
    state.status = detail.status;
}

fn is_ready(attachment: &NetworkAttachment) -> bool {
    attachment.is_attached() && !attachment.subnet_id.is_empty()
}

fn in_request_order(
    desired: &DesiredInstanceSpec,
    resolved: &mut BTreeMap<String, NetworkAttachment>,
) -> Vec<NetworkAttachment> {
    desired
        .networks
        .iter()
        .filter_map(|network| resolved.remove(&network.network_id))
        .collect()
}
