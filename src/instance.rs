//! Desired and observed instance state.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Flavor identifier prefix used by instances backed by local storage.
pub const LOCAL_STORAGE_FLAVOR_PREFIX: &str = "ls";

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Provider identifier of an instance; assigned once at creation.
    InstanceId
);
newtype!(
    /// Region an instance lives in.
    Region
);
newtype!(
    /// Identifier of an in-flight asynchronous creation task.
    TaskId
);

/// Lifecycle status reported by the provider.
///
/// Only the transitions `BUILD → ACTIVE`, `ACTIVE ⇄ SHUTOFF` and `* → ERROR`
/// are acted upon; any other status string is carried through untouched.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    /// Instance is being provisioned.
    #[default]
    Build,
    /// Instance is running.
    Active,
    /// Instance is powered off.
    Shutoff,
    /// Instance failed; surfaced to the caller, never retried.
    Error,
    /// Any status this crate does not act upon.
    Other(String),
}

impl InstanceStatus {
    /// Returns the provider representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Build => "BUILD",
            Self::Active => "ACTIVE",
            Self::Shutoff => "SHUTOFF",
            Self::Error => "ERROR",
            Self::Other(value) => value.as_str(),
        }
    }
}

impl From<&str> for InstanceStatus {
    fn from(value: &str) -> Self {
        match value {
            "BUILD" => Self::Build,
            "ACTIVE" => Self::Active,
            "SHUTOFF" => Self::Shutoff,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for InstanceStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<InstanceStatus> for String {
    fn from(value: InstanceStatus) -> Self {
        value.as_str().to_owned()
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested attachment of the instance to a private network.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NetworkRequest {
    /// Network to attach.
    pub network_id: String,
    /// Static IP to request; `None` lets the provider allocate one.
    #[serde(default)]
    pub ip: Option<String>,
    /// Whether port security is enforced on the attachment.
    #[serde(default)]
    pub port_security_enabled: bool,
}

impl NetworkRequest {
    /// Requests an attachment with a provider-allocated address.
    #[must_use]
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            ip: None,
            port_security_enabled: false,
        }
    }

    /// Sets the static IP to request.
    #[must_use]
    pub fn ip(mut self, value: impl Into<String>) -> Self {
        self.ip = Some(value.into());
        self
    }

    /// Sets the port-security flag.
    #[must_use]
    pub const fn port_security_enabled(mut self, value: bool) -> Self {
        self.port_security_enabled = value;
        self
    }

    /// Returns `true` when `attachment` already provides what this request
    /// asks for.
    ///
    /// A request without a static IP accepts whatever address was allocated.
    #[must_use]
    pub fn is_satisfied_by(&self, attachment: &NetworkAttachment) -> bool {
        self.network_id == attachment.network_id
            && attachment.is_attached()
            && self.port_security_enabled == attachment.port_security_enabled
            && self
                .ip
                .as_deref()
                .is_none_or(|ip| ip == attachment.ip)
    }
}

/// Concrete attachment of the instance to a private network.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Network the attachment belongs to; at most one attachment per network.
    pub network_id: String,
    /// Subnet the address was allocated from.
    pub subnet_id: String,
    /// Port carrying the address; empty while not yet attached.
    pub port_id: String,
    /// Allocated IP address.
    pub ip: String,
    /// Whether the address is publicly routable.
    pub is_public: bool,
    /// Whether source-address filtering is enforced on the port.
    pub port_security_enabled: bool,
}

impl NetworkAttachment {
    /// Builds the zero-value attachment for a network with no matching port.
    #[must_use]
    pub fn unattached(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            ..Self::default()
        }
    }

    /// Returns `true` once the provider has allocated a port.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        !self.port_id.is_empty()
    }
}

/// Floating IP bound to the port of one of the instance's networks.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct FloatingIpAttachment {
    /// Floating IP identifier.
    pub floating_ip_id: String,
    /// Network whose port receives the floating IP.
    pub network_id: String,
}

impl FloatingIpAttachment {
    /// Builds a floating IP attachment request.
    #[must_use]
    pub fn new(floating_ip_id: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            floating_ip_id: floating_ip_id.into(),
            network_id: network_id.into(),
        }
    }
}

/// Configuration the caller wants an instance to converge to.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DesiredInstanceSpec {
    /// Region; immutable after creation.
    pub region: Region,
    /// Display name.
    pub name: String,
    /// Boot image; immutable after creation.
    pub image_id: String,
    /// Flavor (plan).
    pub flavor_id: String,
    /// Root disk size in gigabytes; may only grow.
    pub disk_size: u64,
    /// First-boot script; immutable after creation.
    #[serde(default)]
    pub init_script: Option<String>,
    /// SSH key injected at creation; immutable after creation.
    #[serde(default)]
    pub ssh_key_name: Option<String>,
    /// Security group identifiers.
    #[serde(default)]
    pub security_groups: BTreeSet<String>,
    /// Private networks, in attachment order.
    #[serde(default)]
    pub networks: Vec<NetworkRequest>,
    /// Block volume identifiers.
    #[serde(default)]
    pub volumes: BTreeSet<String>,
    /// Floating IP to bind to one of the networks.
    #[serde(default)]
    pub floating_ip: Option<FloatingIpAttachment>,
    /// Placement group; immutable after creation.
    #[serde(default)]
    pub server_group_id: Option<String>,
    /// Dedicated host; immutable after creation.
    #[serde(default)]
    pub dedicated_server_id: Option<String>,
    /// Snapshot to revert the instance to; only valid after creation.
    #[serde(default)]
    pub revert_to_snapshot_id: Option<String>,
    /// Snapshot the root disk is created from.
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Public IPv4 allocation; immutable after creation.
    #[serde(default)]
    pub enable_ipv4: bool,
    /// Public IPv6 allocation; immutable after creation.
    #[serde(default)]
    pub enable_ipv6: bool,
}

impl DesiredInstanceSpec {
    /// Returns `true` when the requested flavor uses local storage.
    #[must_use]
    pub fn uses_local_storage(&self) -> bool {
        is_local_storage_flavor(&self.flavor_id)
    }

    /// Returns the network request for `network_id`, if any.
    #[must_use]
    pub fn network(&self, network_id: &str) -> Option<&NetworkRequest> {
        self.networks
            .iter()
            .find(|network| network.network_id == network_id)
    }
}

/// Returns `true` when `flavor_id` designates a local-storage flavor.
#[must_use]
pub fn is_local_storage_flavor(flavor_id: &str) -> bool {
    flavor_id.starts_with(LOCAL_STORAGE_FLAVOR_PREFIX)
}

/// Remote state of an instance as last observed.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ObservedInstanceState {
    /// Provider identifier.
    pub id: InstanceId,
    /// Creation task, only meaningful while the instance is being built.
    #[serde(default)]
    pub task_id: Option<TaskId>,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Cluster the instance runs in.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Administrator password returned once at creation.
    #[serde(default)]
    pub password: Option<String>,
    /// Configuration applied by the last convergence, refreshed by reads.
    pub applied: DesiredInstanceSpec,
    /// Network attachments, at most one per network, in request order.
    #[serde(default)]
    pub networks: Vec<NetworkAttachment>,
    /// Attached volume identifiers.
    #[serde(default)]
    pub volumes: BTreeSet<String>,
    /// Security group identifiers.
    #[serde(default)]
    pub security_groups: BTreeSet<String>,
    /// Bound floating IP.
    #[serde(default)]
    pub floating_ip: Option<FloatingIpAttachment>,
}

impl ObservedInstanceState {
    /// Returns the region the instance lives in.
    #[must_use]
    pub fn region(&self) -> &str {
        self.applied.region.as_str()
    }

    /// Returns the attachment for `network_id`, if any.
    #[must_use]
    pub fn network(&self, network_id: &str) -> Option<&NetworkAttachment> {
        self.networks
            .iter()
            .find(|attachment| attachment.network_id == network_id)
    }
}
