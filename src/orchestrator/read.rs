//! Refresh of observed state from the remote API.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{Instrument, debug, info, info_span};

use crate::api::{FloatingIp, Network, Volume};
use crate::error::ConvergeError;
use crate::instance::{FloatingIpAttachment, NetworkAttachment, NetworkRequest, ObservedInstanceState};
use crate::network::{network_for_name, resolve_by_address};

use super::InstanceOrchestrator;

impl InstanceOrchestrator {
    /// Re-reads the instance and its attachments.
    ///
    /// Returns `Ok(None)` when the instance no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Api`] when a lookup fails for any reason other
    /// than the instance or its floating IP being absent.
    pub async fn read(
        &self,
        observed: &ObservedInstanceState,
    ) -> Result<Option<ObservedInstanceState>, ConvergeError> {
        let span = info_span!("read_instance", instance_id = %observed.id, region = %observed.applied.region);
        self.read_in_span(observed).instrument(span).await
    }

    async fn read_in_span(
        &self,
        observed: &ObservedInstanceState,
    ) -> Result<Option<ObservedInstanceState>, ConvergeError> {
        let region = observed.region();
        let instance_id = observed.id.as_str();
        let detail = match self.apis.compute.get(region, instance_id).await {
            Ok(detail) => detail,
            Err(err) if err.is_not_found() => {
                info!("instance no longer exists");
                return Ok(None);
            }
            Err(err) => return Err(ConvergeError::api("get instance", err)),
        };

        let mut state = observed.clone();
        state.status = detail.status;
        state.applied.name = detail.name;
        if !detail.cluster_id.is_empty() {
            state.cluster_id = Some(detail.cluster_id);
        }
        if !detail.dedicated_server_id.is_empty() {
            state.applied.dedicated_server_id = Some(detail.dedicated_server_id);
        }
        if let Some(image_id) = detail.image_id {
            state.applied.image_id = image_id;
        }
        if let Some(flavor_id) = detail.flavor_id {
            state.applied.flavor_id = flavor_id;
        }
        state.security_groups = detail
            .security_group_ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect();
        state.applied.security_groups = state.security_groups.clone();

        let networks = self.list_networks(region).await?;
        if let Some(addresses) = &detail.addresses {
            let resolved = resolve_by_address(&networks, addresses, instance_id);
            state.networks = merge_attachments(&observed.networks, resolved);
            state.applied.networks = refreshed_requests(&observed.applied.networks, &state.networks);
        }

        let volumes = self
            .apis
            .volume
            .list(region)
            .await
            .map_err(|err| ConvergeError::api("list volumes", err))?;
        state.volumes = volumes_of(&volumes, instance_id);
        state.applied.volumes = state.volumes.clone();

        state.floating_ip = match self.apis.floating_ip.get_by_server_id(region, instance_id).await {
            Ok(record) => floating_ip_attachment(&networks, &record),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(ConvergeError::api("get floating ip", err)),
        };
        state.applied.floating_ip = state.floating_ip.clone();

        debug!(status = %state.status, networks = state.networks.len(), "instance refreshed");
        Ok(Some(state))
    }
}

/// Keeps previously tracked networks in their original order and appends
/// newly discovered ones. Tracked networks that vanished are dropped.
fn merge_attachments(
    previous: &[NetworkAttachment],
    mut resolved: BTreeMap<String, NetworkAttachment>,
) -> Vec<NetworkAttachment> {
    let mut merged: Vec<NetworkAttachment> = previous
        .iter()
        .filter_map(|attachment| resolved.remove(&attachment.network_id))
        .collect();
    merged.extend(resolved.into_values());
    merged
}

/// Rebuilds the applied network requests from observed attachments. Static
/// IPs stay requested only where they were requested before.
fn refreshed_requests(
    previous: &[NetworkRequest],
    attachments: &[NetworkAttachment],
) -> Vec<NetworkRequest> {
    attachments
        .iter()
        .map(|attachment| {
            let pinned = previous
                .iter()
                .any(|request| request.network_id == attachment.network_id && request.ip.is_some());
            NetworkRequest {
                network_id: attachment.network_id.clone(),
                ip: pinned.then(|| attachment.ip.clone()),
                port_security_enabled: attachment.port_security_enabled,
            }
        })
        .collect()
}

fn volumes_of(volumes: &[Volume], instance_id: &str) -> BTreeSet<String> {
    volumes
        .iter()
        .filter(|volume| {
            volume
                .attachments
                .iter()
                .any(|attachment| attachment.server_id == instance_id)
        })
        .map(|volume| volume.id.clone())
        .collect()
}

/// Locates the network carrying the floating address. A record whose
/// address maps to no known network reads as unbound.
fn floating_ip_attachment(networks: &[Network], record: &FloatingIp) -> Option<FloatingIpAttachment> {
    record
        .server_addresses
        .iter()
        .find(|(_, addresses)| addresses.iter().any(|address| address.addr == record.address))
        .and_then(|(name, _)| network_for_name(networks, name))
        .map(|network| FloatingIpAttachment::new(record.id.as_str(), network.id.as_str()))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn attachment(network_id: &str, port_id: &str) -> NetworkAttachment {
        NetworkAttachment {
            network_id: network_id.to_owned(),
            subnet_id: format!("sub-{network_id}"),
            port_id: port_id.to_owned(),
            ip: String::from("10.0.0.1"),
            is_public: false,
            port_security_enabled: false,
        }
    }

    #[rstest]
    fn merge_keeps_prior_order_and_appends_new_networks() {
        let previous = vec![attachment("net-z", "p1"), attachment("net-a", "p2")];
        let resolved = BTreeMap::from([
            (String::from("net-a"), attachment("net-a", "p2")),
            (String::from("net-m"), attachment("net-m", "p3")),
            (String::from("net-z"), attachment("net-z", "p1")),
        ]);

        let merged = merge_attachments(&previous, resolved);
        let order: Vec<_> = merged.iter().map(|a| a.network_id.as_str()).collect();
        assert_eq!(order, ["net-z", "net-a", "net-m"]);
    }

    #[rstest]
    fn merge_drops_vanished_networks() {
        let previous = vec![attachment("net-a", "p1"), attachment("net-b", "p2")];
        let resolved = BTreeMap::from([(String::from("net-b"), attachment("net-b", "p2"))]);
        let merged = merge_attachments(&previous, resolved);
        assert_eq!(merged, vec![attachment("net-b", "p2")]);
    }

    #[rstest]
    fn pinned_addresses_remain_requested() {
        let previous = vec![
            NetworkRequest::new("net-a").ip("10.0.0.1"),
            NetworkRequest::new("net-b"),
        ];
        let refreshed = refreshed_requests(
            &previous,
            &[attachment("net-a", "p1"), attachment("net-b", "p2")],
        );
        assert_eq!(refreshed.first().and_then(|r| r.ip.as_deref()), Some("10.0.0.1"));
        assert_eq!(refreshed.get(1).and_then(|r| r.ip.as_deref()), None);
    }
}
