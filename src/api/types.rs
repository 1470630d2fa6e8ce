//! Records exchanged with the remote infrastructure API.
//!
//! These mirror the shape of the provider responses closely enough for the
//! orchestrator to reason about them; marshaling is left to the transport.

use std::collections::BTreeMap;

use crate::instance::InstanceStatus;

/// Payload for an asynchronous instance creation call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateServerRequest {
    /// Display name of the instance.
    pub name: String,
    /// Number of instances to create; always one for convergence.
    pub count: u32,
    /// Boot image identifier.
    pub image_id: String,
    /// Flavor (plan) identifier.
    pub flavor_id: String,
    /// Networks to attach at boot, in request order.
    pub network_ids: Vec<String>,
    /// Security groups applied at boot.
    pub security_groups: Vec<String>,
    /// Whether an SSH key should be injected.
    pub ssh_key: bool,
    /// SSH key name, present when `ssh_key` is set.
    pub key_name: Option<String>,
    /// Root disk size in gigabytes.
    pub disk_size: u64,
    /// Initialisation script executed on first boot.
    pub init_script: Option<String>,
    /// Server group used for placement.
    pub server_group_id: Option<String>,
    /// Dedicated host to place the instance on.
    pub dedicated_server_id: Option<String>,
    /// Snapshot the root disk is created from.
    pub snapshot_id: Option<String>,
    /// Whether a public IPv4 address is allocated.
    pub enable_ipv4: bool,
    /// Whether a public IPv6 address is allocated.
    pub enable_ipv6: bool,
}

/// Response to an asynchronous creation call.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreatedServer {
    /// Provider identifier; may be empty until the task completes.
    pub id: String,
    /// Task identifier used to inquire about an in-flight creation.
    pub task_id: String,
    /// Initial administrator password.
    pub password: String,
    /// Status reported at creation time.
    pub status: InstanceStatus,
}

/// Address entry in an instance detail record, keyed by network name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerAddress {
    /// IP address.
    pub addr: String,
    /// Whether the address is publicly routable.
    pub is_public: bool,
}

/// Instance detail as returned by `get` and `inquiry`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerDetail {
    /// Provider identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Flavor identifier, when reported.
    pub flavor_id: Option<String>,
    /// Image identifier, when reported.
    pub image_id: Option<String>,
    /// Cluster the instance runs in.
    pub cluster_id: String,
    /// Dedicated host identifier, empty when not placed on one.
    pub dedicated_server_id: String,
    /// Identifiers of the security groups the instance belongs to.
    pub security_group_ids: Vec<String>,
    /// Addresses grouped by network name; `None` when not yet networked.
    pub addresses: Option<BTreeMap<String, Vec<ServerAddress>>>,
}

/// IP record of a server attached to a subnet.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerIp {
    /// IP address.
    pub ip: String,
    /// Port carrying the address.
    pub port_id: String,
    /// Subnet the address was allocated from.
    pub subnet_id: String,
    /// Whether the address is publicly routable.
    pub public: bool,
    /// Whether source-address filtering is enforced on the port.
    pub port_security_enabled: bool,
}

/// Server entry within a subnet listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkServer {
    /// Server identifier.
    pub id: String,
    /// IP records owned by the server.
    pub ips: Vec<ServerIp>,
}

/// Subnet belonging to a network.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Subnet {
    /// Subnet identifier.
    pub id: String,
    /// Parent network identifier.
    pub network_id: String,
    /// Servers holding an address in this subnet.
    pub servers: Vec<NetworkServer>,
}

/// Network as returned by the network listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Network {
    /// Network identifier.
    pub id: String,
    /// Network name, used as key in instance address maps.
    pub name: String,
    /// Subnets in provider order.
    pub subnets: Vec<Subnet>,
}

/// Request attaching a server to a network.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttachServerRequest {
    /// Server to attach.
    pub server_id: String,
    /// Subnet to allocate the port from.
    pub subnet_id: String,
    /// Static IP to request; `None` lets the provider pick one.
    pub ip: Option<String>,
    /// Whether port security should be enabled on the new port.
    pub enable_port_security: bool,
}

/// Port created by a network attachment.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttachedPort {
    /// Port identifier.
    pub id: String,
    /// Allocated IP address.
    pub ip_address: String,
    /// Network the port belongs to.
    pub network_id: String,
    /// Subnet the address was allocated from.
    pub subnet_id: String,
}

/// Attachment record on a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeAttachmentRecord {
    /// Server the volume is attached to.
    pub server_id: String,
}

/// Volume as returned by the volume listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Volume {
    /// Volume identifier.
    pub id: String,
    /// Servers the volume is attached to.
    pub attachments: Vec<VolumeAttachmentRecord>,
}

/// Public addressing summary for a server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerIpInfo {
    /// Server identifier.
    pub server_id: String,
    /// Whether the server already holds a public IP.
    pub has_public_ip: bool,
}

/// Request binding a floating IP to a port.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FloatingIpAttachRequest {
    /// Server receiving the floating IP.
    pub server_id: String,
    /// Subnet of the target port.
    pub subnet_id: String,
    /// Target port.
    pub port_id: String,
}

/// Floating IP bound to a server.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FloatingIp {
    /// Floating IP identifier.
    pub id: String,
    /// Floating address.
    pub address: String,
    /// Addresses of the bound server, grouped by network name.
    pub server_addresses: BTreeMap<String, Vec<ServerAddress>>,
}
