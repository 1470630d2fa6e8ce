//! Resolution of per-instance network attachments from the network graph.
//!
//! The network listing nests subnets, servers and IP records. Only the first
//! subnet of a network is considered, and the first IP record owned by the
//! instance on that subnet is its attachment.

use std::collections::BTreeMap;

use crate::api::{Network, ServerAddress, Subnet};
use crate::error::ConvergeError;
use crate::instance::NetworkAttachment;

/// Resolves attachments for the networks named by identifier.
///
/// Unknown networks and networks without subnets are omitted; a network the
/// instance holds no address on resolves to an unattached record.
#[must_use]
pub fn resolve_by_id<'a, I>(
    networks: &[Network],
    network_ids: I,
    instance_id: &str,
) -> BTreeMap<String, NetworkAttachment>
where
    I: IntoIterator<Item = &'a str>,
{
    network_ids
        .into_iter()
        .filter_map(|network_id| networks.iter().find(|network| network.id == network_id))
        .filter_map(|network| attachment_on(network, instance_id))
        .map(|attachment| (attachment.network_id.clone(), attachment))
        .collect()
}

/// Resolves attachments for the networks appearing in an instance address
/// map, whose keys are network names.
#[must_use]
pub fn resolve_by_address(
    networks: &[Network],
    addresses: &BTreeMap<String, Vec<ServerAddress>>,
    instance_id: &str,
) -> BTreeMap<String, NetworkAttachment> {
    networks
        .iter()
        .filter(|network| addresses.contains_key(&network.name))
        .filter_map(|network| attachment_on(network, instance_id))
        .map(|attachment| (attachment.network_id.clone(), attachment))
        .collect()
}

/// Returns the subnet new attachments on `network_id` are allocated from.
///
/// # Errors
///
/// Returns [`ConvergeError::UnknownNetwork`] when the network is not listed
/// and [`ConvergeError::NetworkWithoutSubnet`] when it has no subnet.
pub fn subnet_for<'a>(networks: &'a [Network], network_id: &str) -> Result<&'a Subnet, ConvergeError> {
    let network = networks
        .iter()
        .find(|network| network.id == network_id)
        .ok_or_else(|| ConvergeError::UnknownNetwork {
            network_id: network_id.to_owned(),
        })?;
    network
        .subnets
        .first()
        .ok_or_else(|| ConvergeError::NetworkWithoutSubnet {
            network_id: network_id.to_owned(),
        })
}

/// Looks a network up by the name used in address maps.
#[must_use]
pub fn network_for_name<'a>(networks: &'a [Network], name: &str) -> Option<&'a Network> {
    networks.iter().find(|network| network.name == name)
}

fn attachment_on(network: &Network, instance_id: &str) -> Option<NetworkAttachment> {
    let subnet = network.subnets.first()?;
    let record = subnet
        .servers
        .iter()
        .filter(|server| server.id == instance_id)
        .flat_map(|server| server.ips.iter())
        .find(|ip| ip.subnet_id == subnet.id);

    Some(record.map_or_else(
        || NetworkAttachment::unattached(network.id.as_str()),
        |ip| NetworkAttachment {
            network_id: network.id.clone(),
            subnet_id: subnet.id.clone(),
            port_id: ip.port_id.clone(),
            ip: ip.ip.clone(),
            is_public: ip.public,
            port_security_enabled: ip.port_security_enabled,
        },
    ))
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::api::{NetworkServer, ServerIp};

    fn ip(addr: &str, port: &str, subnet: &str) -> ServerIp {
        ServerIp {
            ip: addr.to_owned(),
            port_id: port.to_owned(),
            subnet_id: subnet.to_owned(),
            public: false,
            port_security_enabled: true,
        }
    }

    #[fixture]
    fn graph() -> Vec<Network> {
        vec![
            Network {
                id: String::from("net-a"),
                name: String::from("alpha"),
                subnets: vec![
                    Subnet {
                        id: String::from("sub-a"),
                        network_id: String::from("net-a"),
                        servers: vec![
                            NetworkServer {
                                id: String::from("other"),
                                ips: vec![ip("10.0.0.9", "p9", "sub-a")],
                            },
                            NetworkServer {
                                id: String::from("vm-1"),
                                ips: vec![
                                    ip("10.0.0.4", "p0", "sub-stale"),
                                    ip("10.0.0.5", "p1", "sub-a"),
                                    ip("10.0.0.6", "p7", "sub-a"),
                                ],
                            },
                        ],
                    },
                    Subnet {
                        id: String::from("sub-a2"),
                        network_id: String::from("net-a"),
                        servers: vec![NetworkServer {
                            id: String::from("vm-1"),
                            ips: vec![ip("10.1.0.5", "p8", "sub-a2")],
                        }],
                    },
                ],
            },
            Network {
                id: String::from("net-b"),
                name: String::from("beta"),
                subnets: vec![Subnet {
                    id: String::from("sub-b"),
                    network_id: String::from("net-b"),
                    servers: Vec::new(),
                }],
            },
            Network {
                id: String::from("net-empty"),
                name: String::from("empty"),
                subnets: Vec::new(),
            },
        ]
    }

    #[rstest]
    fn first_matching_record_on_first_subnet_wins(graph: Vec<Network>) {
        let resolved = resolve_by_id(&graph, ["net-a"], "vm-1");
        let attachment = resolved.get("net-a").expect("net-a resolved");
        assert_eq!(attachment.port_id, "p1");
        assert_eq!(attachment.ip, "10.0.0.5");
        assert_eq!(attachment.subnet_id, "sub-a");
        assert!(attachment.port_security_enabled);
    }

    #[rstest]
    fn other_servers_on_the_subnet_are_ignored(graph: Vec<Network>) {
        let resolved = resolve_by_id(&graph, ["net-a"], "other");
        assert_eq!(resolved.get("net-a").map(|a| a.port_id.as_str()), Some("p9"));
    }

    #[rstest]
    fn missing_record_yields_unattached_entry(graph: Vec<Network>) {
        let resolved = resolve_by_id(&graph, ["net-b"], "vm-1");
        assert_eq!(
            resolved.get("net-b"),
            Some(&NetworkAttachment::unattached("net-b"))
        );
    }

    #[rstest]
    fn unknown_and_subnetless_networks_are_omitted(graph: Vec<Network>) {
        let resolved = resolve_by_id(&graph, ["net-x", "net-empty", "net-b"], "vm-1");
        assert_eq!(resolved.keys().collect::<Vec<_>>(), ["net-b"]);
    }

    #[rstest]
    fn address_map_keys_select_networks_by_name(graph: Vec<Network>) {
        let addresses = BTreeMap::from([(String::from("alpha"), Vec::new())]);
        let resolved = resolve_by_address(&graph, &addresses, "vm-1");
        assert_eq!(resolved.keys().collect::<Vec<_>>(), ["net-a"]);
    }

    #[rstest]
    fn subnet_lookup_reports_missing_pieces(graph: Vec<Network>) {
        assert_eq!(subnet_for(&graph, "net-b").map(|s| s.id.as_str()).ok(), Some("sub-b"));
        assert!(matches!(
            subnet_for(&graph, "net-x"),
            Err(ConvergeError::UnknownNetwork { network_id }) if network_id == "net-x"
        ));
        assert!(matches!(
            subnet_for(&graph, "net-empty"),
            Err(ConvergeError::NetworkWithoutSubnet { .. })
        ));
    }

    #[rstest]
    fn names_map_back_to_networks(graph: Vec<Network>) {
        assert_eq!(network_for_name(&graph, "beta").map(|n| n.id.as_str()), Some("net-b"));
        assert!(network_for_name(&graph, "gamma").is_none());
    }
}
