//! In-place convergence of an existing instance.
//!
//! The update runs its sub-steps in a fixed order: guard, rename, security
//! groups, flavor resize, volumes, networks, root volume resize, floating IP,
//! snapshot revert. The first failing step ends the update.

use std::collections::BTreeMap;

use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::{AttachServerRequest, FloatingIpAttachRequest, Network};
use crate::diff::{OperationKind, diff};
use crate::error::ConvergeError;
use crate::instance::{
    DesiredInstanceSpec, InstanceStatus, NetworkAttachment, NetworkRequest, ObservedInstanceState,
    is_local_storage_flavor,
};
use crate::network::subnet_for;

use super::{InstanceOrchestrator, deadline_after, ignore_not_found, public_ip_conflict};

impl InstanceOrchestrator {
    /// Converges an existing instance from `observed` to `desired`.
    ///
    /// Applying a `desired` that already matches `observed` issues no
    /// mutating call.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::UnsupportedOperation`] listing every
    /// immutable field `desired` changes before any call is made, and the
    /// error of the first failing sub-step otherwise.
    pub async fn update(
        &self,
        observed: &ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<ObservedInstanceState, ConvergeError> {
        let span = info_span!("update_instance", instance_id = %observed.id, region = %observed.applied.region);
        self.update_in_span(observed, desired).instrument(span).await
    }

    async fn update_in_span(
        &self,
        observed: &ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<ObservedInstanceState, ConvergeError> {
        let reasons = immutable_violations(&observed.applied, desired);
        if !reasons.is_empty() {
            return Err(ConvergeError::UnsupportedOperation { reasons });
        }

        let mut state = observed.clone();
        self.rename(&mut state, desired).await?;
        self.converge_security_groups(&mut state, desired).await?;
        self.resize_flavor(&mut state, desired).await?;
        self.converge_volumes(&mut state, desired).await?;
        self.converge_networks(&mut state, desired).await?;
        self.resize_root_volume(&mut state, desired).await?;
        self.converge_floating_ip(observed, &mut state, desired).await?;
        self.revert_snapshot(&state, desired).await?;

        state.applied = desired.clone();
        Ok(state)
    }

    async fn rename(
        &self,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        if state.applied.name == desired.name {
            return Ok(());
        }
        self.apis
            .compute
            .rename(state.region(), state.id.as_str(), &desired.name)
            .await
            .map_err(|err| ConvergeError::api("rename instance", err))?;
        info!(name = %desired.name, "instance renamed");
        state.applied.name.clone_from(&desired.name);
        Ok(())
    }

    async fn converge_security_groups(
        &self,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        for op in diff(&desired.security_groups, &state.security_groups) {
            let (region, instance_id) = (state.region(), state.id.as_str());
            match op.kind {
                OperationKind::Add => {
                    self.apis
                        .security_group
                        .add_server(region, instance_id, &op.id)
                        .await
                        .map_err(|err| ConvergeError::api(format!("add security group {}", op.id), err))?;
                    info!(group_id = %op.id, "security group added");
                    state.security_groups.insert(op.id);
                }
                OperationKind::Remove => {
                    self.apis
                        .security_group
                        .remove_server(region, instance_id, &op.id)
                        .await
                        .map_err(|err| ConvergeError::api(format!("remove security group {}", op.id), err))?;
                    info!(group_id = %op.id, "security group removed");
                    state.security_groups.remove(&op.id);
                }
            }
        }
        Ok(())
    }

    async fn resize_flavor(
        &self,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        if state.applied.flavor_id == desired.flavor_id {
            return Ok(());
        }
        let (region, instance_id) = (state.region(), state.id.as_str());
        let deadline = deadline_after(self.timeouts.update);
        let compute = self.apis.compute.as_ref();

        warn!(flavor_id = %desired.flavor_id, "powering instance off for flavor resize");
        compute
            .power_off(region, instance_id)
            .await
            .map_err(|err| ConvergeError::api("power off instance", err))?;
        self.wait_for_status(region, instance_id, &InstanceStatus::Shutoff, "power off", deadline)
            .await?;
        compute
            .resize(region, instance_id, &desired.flavor_id)
            .await
            .map_err(|err| ConvergeError::api("resize instance", err))?;
        compute
            .power_on(region, instance_id)
            .await
            .map_err(|err| ConvergeError::api("power on instance", err))?;
        self.wait_for_status(region, instance_id, &InstanceStatus::Active, "power on", deadline)
            .await?;

        info!(flavor_id = %desired.flavor_id, "instance resized");
        state.applied.flavor_id.clone_from(&desired.flavor_id);
        state.status = InstanceStatus::Active;
        Ok(())
    }

    async fn converge_volumes(
        &self,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        for op in diff(&desired.volumes, &state.volumes) {
            let (region, instance_id) = (state.region(), state.id.as_str());
            if op.is_add() {
                self.apis
                    .volume
                    .attach(region, instance_id, &op.id)
                    .await
                    .map_err(|err| ConvergeError::api(format!("attach volume {}", op.id), err))?;
                info!(volume_id = %op.id, "volume attached");
                state.volumes.insert(op.id);
            } else {
                self.apis
                    .volume
                    .detach(region, instance_id, &op.id)
                    .await
                    .map_err(|err| ConvergeError::api(format!("detach volume {}", op.id), err))?;
                info!(volume_id = %op.id, "volume detached");
                state.volumes.remove(&op.id);
            }
        }
        Ok(())
    }

    async fn converge_networks(
        &self,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        let region = state.region().to_owned();
        let instance_id = state.id.as_str().to_owned();

        let mut current: BTreeMap<String, NetworkAttachment> = BTreeMap::new();
        for attachment in std::mem::take(&mut state.networks) {
            if desired.network(&attachment.network_id).is_some() {
                current.insert(attachment.network_id.clone(), attachment);
            } else {
                self.detach_network(&region, &instance_id, &attachment).await?;
            }
        }

        let needs_attach = desired.networks.iter().any(|request| {
            current
                .get(&request.network_id)
                .is_none_or(|attachment| !request.is_satisfied_by(attachment))
        });
        let listing = if needs_attach {
            self.list_networks(&region).await?
        } else {
            Vec::new()
        };

        let mut converged: Vec<NetworkAttachment> = Vec::with_capacity(desired.networks.len());
        for request in &desired.networks {
            if converged
                .iter()
                .any(|attachment| attachment.network_id == request.network_id)
            {
                continue;
            }
            let attachment = match current.remove(&request.network_id) {
                Some(existing) if request.is_satisfied_by(&existing) => {
                    debug!(network_id = %request.network_id, "network attachment kept");
                    existing
                }
                Some(existing) => {
                    warn!(network_id = %request.network_id, port_id = %existing.port_id, "re-attaching network with changed settings");
                    self.detach_network(&region, &instance_id, &existing).await?;
                    self.attach_network(&region, &instance_id, &listing, request).await?
                }
                None => self.attach_network(&region, &instance_id, &listing, request).await?,
            };
            converged.push(attachment);
        }

        state.networks = converged;
        Ok(())
    }

    async fn detach_network(
        &self,
        region: &str,
        instance_id: &str,
        attachment: &NetworkAttachment,
    ) -> Result<(), ConvergeError> {
        if !attachment.is_attached() {
            return Ok(());
        }
        self.apis
            .network
            .detach_server(region, &attachment.port_id, instance_id)
            .await
            .map_err(|err| ConvergeError::api(format!("detach network {}", attachment.network_id), err))?;
        info!(network_id = %attachment.network_id, port_id = %attachment.port_id, "network detached");
        Ok(())
    }

    async fn attach_network(
        &self,
        region: &str,
        instance_id: &str,
        listing: &[Network],
        request: &NetworkRequest,
    ) -> Result<NetworkAttachment, ConvergeError> {
        let subnet = subnet_for(listing, &request.network_id)?;
        let payload = AttachServerRequest {
            server_id: instance_id.to_owned(),
            subnet_id: subnet.id.clone(),
            ip: request.ip.clone(),
            enable_port_security: request.port_security_enabled,
        };
        let port = self
            .apis
            .network
            .attach_server(region, &request.network_id, &payload)
            .await
            .map_err(|err| ConvergeError::api(format!("attach network {}", request.network_id), err))?;
        info!(network_id = %request.network_id, port_id = %port.id, ip = %port.ip_address, "network attached");

        let subnet_id = if port.subnet_id.is_empty() {
            subnet.id.clone()
        } else {
            port.subnet_id
        };
        Ok(NetworkAttachment {
            network_id: request.network_id.clone(),
            subnet_id,
            port_id: port.id,
            ip: port.ip_address,
            is_public: false,
            port_security_enabled: request.port_security_enabled,
        })
    }

    async fn resize_root_volume(
        &self,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        if state.applied.disk_size == desired.disk_size {
            return Ok(());
        }
        if desired.uses_local_storage() {
            return Err(ConvergeError::unsupported(
                "root volume of a local storage flavor cannot be resized",
            ));
        }
        if desired.disk_size < state.applied.disk_size {
            return Err(ConvergeError::unsupported(format!(
                "new size must be greater than old size ({} < {} GB)",
                desired.disk_size, state.applied.disk_size
            )));
        }

        let (region, instance_id) = (state.region(), state.id.as_str());
        let deadline = deadline_after(self.timeouts.update);
        let compute = self.apis.compute.as_ref();

        if state.status == InstanceStatus::Active {
            warn!(disk_size = desired.disk_size, "powering instance off for root volume resize");
            compute
                .power_off(region, instance_id)
                .await
                .map_err(|err| ConvergeError::api("power off instance", err))?;
        }
        self.wait_for_status(region, instance_id, &InstanceStatus::Shutoff, "power off", deadline)
            .await?;
        compute
            .resize_root_volume(region, instance_id, desired.disk_size)
            .await
            .map_err(|err| ConvergeError::api("resize root volume", err))?;
        self.wait_for_status(region, instance_id, &InstanceStatus::Active, "root volume resize", deadline)
            .await?;

        info!(disk_size = desired.disk_size, "root volume resized");
        state.applied.disk_size = desired.disk_size;
        state.status = InstanceStatus::Active;
        Ok(())
    }

    async fn converge_floating_ip(
        &self,
        observed: &ObservedInstanceState,
        state: &mut ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        if state.floating_ip == desired.floating_ip {
            return Ok(());
        }
        let (region, instance_id) = (state.region(), state.id.as_str());

        if let Some(previous) = &state.floating_ip {
            let port = observed
                .network(&previous.network_id)
                .filter(|attachment| attachment.is_attached())
                .map(|attachment| attachment.port_id.as_str());
            if let Some(port_id) = port {
                ignore_not_found(self.apis.floating_ip.detach(region, port_id).await)
                    .map_err(|err| ConvergeError::api("detach floating ip", err))?;
                info!(floating_ip_id = %previous.floating_ip_id, port_id, "floating ip detached");
            } else {
                debug!(network_id = %previous.network_id, "floating ip network already gone");
            }
        }

        if let Some(next) = &desired.floating_ip {
            let attachment = state
                .network(&next.network_id)
                .filter(|attachment| attachment.is_attached())
                .ok_or_else(|| ConvergeError::MissingNetworkAttachment {
                    network_id: next.network_id.clone(),
                    instance_id: instance_id.to_owned(),
                })?;
            if self.public_ip_state(region, instance_id).await? == Some(true) {
                return Err(public_ip_conflict(instance_id));
            }
            let request = FloatingIpAttachRequest {
                server_id: instance_id.to_owned(),
                subnet_id: attachment.subnet_id.clone(),
                port_id: attachment.port_id.clone(),
            };
            self.apis
                .floating_ip
                .attach(region, &next.floating_ip_id, &request)
                .await
                .map_err(|err| ConvergeError::api("attach floating ip", err))?;
            info!(floating_ip_id = %next.floating_ip_id, port_id = %request.port_id, "floating ip attached");
        }

        state.floating_ip.clone_from(&desired.floating_ip);
        Ok(())
    }

    async fn revert_snapshot(
        &self,
        state: &ObservedInstanceState,
        desired: &DesiredInstanceSpec,
    ) -> Result<(), ConvergeError> {
        if state.applied.revert_to_snapshot_id == desired.revert_to_snapshot_id {
            return Ok(());
        }
        let Some(snapshot_id) = &desired.revert_to_snapshot_id else {
            return Ok(());
        };
        self.apis
            .snapshot
            .revert(state.region(), state.id.as_str(), snapshot_id)
            .await
            .map_err(|err| ConvergeError::api(format!("revert to snapshot {snapshot_id}"), err))?;
        info!(snapshot_id = %snapshot_id, "snapshot revert requested");
        Ok(())
    }
}

/// Lists every change `desired` makes that an existing instance cannot
/// absorb.
pub(super) fn immutable_violations(
    applied: &DesiredInstanceSpec,
    desired: &DesiredInstanceSpec,
) -> Vec<String> {
    let mut reasons = Vec::new();
    let mut check = |changed: bool, field: &str| {
        if changed {
            reasons.push(format!("{field} cannot be changed after creation"));
        }
    };

    check(applied.region != desired.region, "region");
    check(applied.image_id != desired.image_id, "image id");
    check(applied.ssh_key_name != desired.ssh_key_name, "ssh key name");
    check(applied.server_group_id != desired.server_group_id, "server group id");
    check(
        desired.dedicated_server_id.is_some()
            && applied.dedicated_server_id != desired.dedicated_server_id,
        "dedicated server id",
    );
    check(applied.enable_ipv4 != desired.enable_ipv4, "ipv4 setting");
    check(applied.enable_ipv6 != desired.enable_ipv6, "ipv6 setting");
    check(applied.init_script != desired.init_script, "init script");

    if applied.flavor_id != desired.flavor_id && is_local_storage_flavor(&applied.flavor_id) {
        reasons.push(format!(
            "flavor {} uses local storage and cannot be resized",
            applied.flavor_id
        ));
    }
    reasons
}
