//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] keeps an in-memory model of servers, the network graph,
//! volumes and floating IPs, implements every collaborator trait, and
//! records each call so tests can assert on the exact remote traffic.

use std::collections::{BTreeMap, VecDeque};
use std::future::ready;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::api::{
    ApiError, ApiFuture, AttachServerRequest, AttachedPort, CloudApis, ComputeApi,
    CreateServerRequest, CreatedServer, FloatingIp, FloatingIpApi, FloatingIpAttachRequest,
    Network, NetworkApi, NetworkServer, SecurityGroupApi, ServerAddress, ServerDetail, ServerIp,
    ServerIpInfo, SnapshotApi, Subnet, Volume, VolumeApi, VolumeAttachmentRecord,
};
use crate::instance::InstanceStatus;

/// Remote call recorded by [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiCall {
    /// `ComputeApi::create_async`.
    CreateServer {
        /// Requested display name.
        name: String,
        /// Requested networks, in order.
        network_ids: Vec<String>,
    },
    /// `ComputeApi::get`.
    GetServer {
        /// Server identifier.
        id: String,
    },
    /// `ComputeApi::inquiry`.
    Inquiry {
        /// Creation task identifier.
        task_id: String,
    },
    /// `ComputeApi::delete`.
    DeleteServer {
        /// Server identifier.
        id: String,
    },
    /// `ComputeApi::resize`.
    Resize {
        /// Target flavor.
        flavor_id: String,
    },
    /// `ComputeApi::resize_root_volume`.
    ResizeRootVolume {
        /// Target size in gigabytes.
        size: u64,
    },
    /// `ComputeApi::power_off`.
    PowerOff,
    /// `ComputeApi::power_on`.
    PowerOn,
    /// `ComputeApi::rename`.
    Rename {
        /// New display name.
        name: String,
    },
    /// `NetworkApi::list_networks`.
    ListNetworks,
    /// `NetworkApi::attach_server`.
    AttachNetwork {
        /// Target network.
        network_id: String,
        /// Target subnet.
        subnet_id: String,
        /// Requested static IP.
        ip: Option<String>,
        /// Requested port-security flag.
        port_security_enabled: bool,
    },
    /// `NetworkApi::detach_server`.
    DetachNetwork {
        /// Detached port.
        port_id: String,
    },
    /// `NetworkApi::enable_port_security` or `disable_port_security`.
    SetPortSecurity {
        /// Affected port.
        port_id: String,
        /// New flag value.
        enabled: bool,
    },
    /// `VolumeApi::attach`.
    AttachVolume {
        /// Attached volume.
        volume_id: String,
    },
    /// `VolumeApi::detach`.
    DetachVolume {
        /// Detached volume.
        volume_id: String,
    },
    /// `VolumeApi::list`.
    ListVolumes,
    /// `SecurityGroupApi::add_server`.
    AddSecurityGroup {
        /// Group joined.
        group_id: String,
    },
    /// `SecurityGroupApi::remove_server`.
    RemoveSecurityGroup {
        /// Group left.
        group_id: String,
    },
    /// `FloatingIpApi::server_ip_info`.
    ServerIpInfo,
    /// `FloatingIpApi::attach`.
    AttachFloatingIp {
        /// Bound floating IP.
        floating_ip_id: String,
        /// Target port.
        port_id: String,
        /// Target subnet.
        subnet_id: String,
    },
    /// `FloatingIpApi::detach`.
    DetachFloatingIp {
        /// Port the floating IP was bound to.
        port_id: String,
    },
    /// `FloatingIpApi::get_by_server_id`.
    GetFloatingIp,
    /// `SnapshotApi::revert`.
    RevertSnapshot {
        /// Snapshot reverted to.
        snapshot_id: String,
    },
}

impl ApiCall {
    /// Returns the key [`FakeCloud::fail_next`] uses for this call.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateServer { .. } => "create_async",
            Self::GetServer { .. } => "get",
            Self::Inquiry { .. } => "inquiry",
            Self::DeleteServer { .. } => "delete",
            Self::Resize { .. } => "resize",
            Self::ResizeRootVolume { .. } => "resize_root_volume",
            Self::PowerOff => "power_off",
            Self::PowerOn => "power_on",
            Self::Rename { .. } => "rename",
            Self::ListNetworks => "list_networks",
            Self::AttachNetwork { .. } => "attach_server",
            Self::DetachNetwork { .. } => "detach_server",
            Self::SetPortSecurity { .. } => "set_port_security",
            Self::AttachVolume { .. } => "attach_volume",
            Self::DetachVolume { .. } => "detach_volume",
            Self::ListVolumes => "list_volumes",
            Self::AddSecurityGroup { .. } => "add_server",
            Self::RemoveSecurityGroup { .. } => "remove_server",
            Self::ServerIpInfo => "server_ip_info",
            Self::AttachFloatingIp { .. } => "attach_floating_ip",
            Self::DetachFloatingIp { .. } => "detach_floating_ip",
            Self::GetFloatingIp => "get_by_server_id",
            Self::RevertSnapshot { .. } => "revert",
        }
    }

    /// Returns `false` for calls that only read remote state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::GetServer { .. }
                | Self::Inquiry { .. }
                | Self::ListNetworks
                | Self::ListVolumes
                | Self::ServerIpInfo
                | Self::GetFloatingIp
        )
    }
}

#[derive(Debug)]
struct FakeServer {
    detail: ServerDetail,
    task_id: String,
    script: VecDeque<InstanceStatus>,
}

#[derive(Debug)]
struct BoundFloatingIp {
    server_id: String,
    port_id: String,
    record: FloatingIp,
}

#[derive(Debug)]
struct FakeState {
    servers: Vec<FakeServer>,
    networks: Vec<Network>,
    volumes: Vec<Volume>,
    ip_info: Vec<ServerIpInfo>,
    floating_ips: Vec<BoundFloatingIp>,
    failures: BTreeMap<&'static str, VecDeque<ApiError>>,
    calls: Vec<ApiCall>,
    creation_script: Vec<InstanceStatus>,
    power_on_status: InstanceStatus,
    hide_id_until_inquiry: bool,
    counter: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            networks: Vec::new(),
            volumes: Vec::new(),
            ip_info: Vec::new(),
            floating_ips: Vec::new(),
            failures: BTreeMap::new(),
            calls: Vec::new(),
            creation_script: Vec::new(),
            power_on_status: InstanceStatus::Active,
            hide_id_until_inquiry: false,
            counter: 0,
        }
    }
}

impl FakeState {
    fn next(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    fn record(&mut self, call: ApiCall) -> Result<(), ApiError> {
        let name = call.name();
        self.calls.push(call);
        self.failures
            .get_mut(name)
            .and_then(VecDeque::pop_front)
            .map_or(Ok(()), Err)
    }

    fn server_mut(&mut self, id: &str) -> Result<&mut FakeServer, ApiError> {
        self.servers
            .iter_mut()
            .find(|server| server.detail.id == id)
            .ok_or_else(|| ApiError::not_found(format!("server {id} not found")))
    }

    fn observe(&mut self, id: &str) -> Result<ServerDetail, ApiError> {
        let server = self.server_mut(id)?;
        if let Some(status) = server.script.pop_front() {
            server.detail.status = status;
        }
        let mut detail = server.detail.clone();
        let addresses = self.addresses_of(id);
        detail.addresses = (!addresses.is_empty()).then_some(addresses);
        Ok(detail)
    }

    fn addresses_of(&self, server_id: &str) -> BTreeMap<String, Vec<ServerAddress>> {
        let mut addresses = BTreeMap::new();
        for network in &self.networks {
            let found: Vec<ServerAddress> = network
                .subnets
                .iter()
                .flat_map(|subnet| subnet.servers.iter())
                .filter(|server| server.id == server_id)
                .flat_map(|server| server.ips.iter())
                .map(|ip| ServerAddress {
                    addr: ip.ip.clone(),
                    is_public: ip.public,
                })
                .collect();
            if !found.is_empty() {
                addresses.insert(network.name.clone(), found);
            }
        }
        addresses
    }

    fn allocate_port(
        &mut self,
        network_id: &str,
        server_id: &str,
        ip: Option<&str>,
        port_security_enabled: bool,
    ) -> Result<AttachedPort, ApiError> {
        let serial = self.next();
        let network = self
            .networks
            .iter_mut()
            .find(|network| network.id == network_id)
            .ok_or_else(|| ApiError::not_found(format!("network {network_id} not found")))?;
        let subnet = network
            .subnets
            .first_mut()
            .ok_or_else(|| ApiError::client(400, format!("network {network_id} has no subnet")))?;
        let address = ip.map_or_else(|| format!("10.0.0.{serial}"), ToOwned::to_owned);
        let record = ServerIp {
            ip: address.clone(),
            port_id: format!("port-{serial}"),
            subnet_id: subnet.id.clone(),
            public: false,
            port_security_enabled,
        };
        let port = AttachedPort {
            id: record.port_id.clone(),
            ip_address: address,
            network_id: network_id.to_owned(),
            subnet_id: subnet.id.clone(),
        };
        push_server_ip(subnet, server_id, record);
        Ok(port)
    }

    fn servers_mut(&mut self) -> impl Iterator<Item = &mut NetworkServer> {
        self.networks
            .iter_mut()
            .flat_map(|network| network.subnets.iter_mut())
            .flat_map(|subnet| subnet.servers.iter_mut())
    }
}

fn push_server_ip(subnet: &mut Subnet, server_id: &str, record: ServerIp) {
    if let Some(server) = subnet.servers.iter_mut().find(|server| server.id == server_id) {
        server.ips.push(record);
    } else {
        subnet.servers.push(NetworkServer {
            id: server_id.to_owned(),
            ips: vec![record],
        });
    }
}

fn respond<'a, T: Send + 'a>(result: Result<T, ApiError>) -> ApiFuture<'a, T> {
    Box::pin(ready(result))
}

/// In-memory stand-in for the remote infrastructure API.
///
/// Clones share state, so a test keeps one handle for setup and assertions
/// while the orchestrator drives another through [`FakeCloud::apis`].
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns collaborator handles backed by this cloud.
    #[must_use]
    pub fn apis(&self) -> CloudApis {
        CloudApis::from_client(Arc::new(self.clone()))
    }

    /// Adds a network with a single subnet.
    pub fn add_network(&self, id: &str, name: &str, subnet_id: &str) {
        self.lock().networks.push(Network {
            id: id.to_owned(),
            name: name.to_owned(),
            subnets: vec![Subnet {
                id: subnet_id.to_owned(),
                network_id: id.to_owned(),
                servers: Vec::new(),
            }],
        });
    }

    /// Adds a network that has no subnet.
    pub fn add_network_without_subnet(&self, id: &str, name: &str) {
        self.lock().networks.push(Network {
            id: id.to_owned(),
            name: name.to_owned(),
            subnets: Vec::new(),
        });
    }

    /// Registers an existing server, as if created outside the test.
    pub fn add_server(&self, detail: ServerDetail) {
        self.lock().servers.push(FakeServer {
            detail,
            task_id: String::new(),
            script: VecDeque::new(),
        });
    }

    /// Places an existing port for `server_id` on the first subnet of
    /// `network_id`.
    ///
    /// # Panics
    ///
    /// Panics when the network is unknown or has no subnet.
    pub fn add_port(
        &self,
        network_id: &str,
        server_id: &str,
        port_id: &str,
        ip: &str,
        port_security_enabled: bool,
    ) {
        let mut state = self.lock();
        let Some(subnet) = state
            .networks
            .iter_mut()
            .find(|network| network.id == network_id)
            .and_then(|network| network.subnets.first_mut())
        else {
            panic!("network {network_id} must exist with a subnet");
        };
        let record = ServerIp {
            ip: ip.to_owned(),
            port_id: port_id.to_owned(),
            subnet_id: subnet.id.clone(),
            public: false,
            port_security_enabled,
        };
        push_server_ip(subnet, server_id, record);
    }

    /// Adds a volume with no attachment.
    pub fn add_volume(&self, id: &str) {
        self.lock().volumes.push(Volume {
            id: id.to_owned(),
            attachments: Vec::new(),
        });
    }

    /// Sets the public-IP summary reported for a server.
    pub fn set_ip_info(&self, server_id: &str, has_public_ip: bool) {
        let mut state = self.lock();
        state.ip_info.retain(|info| info.server_id != server_id);
        state.ip_info.push(ServerIpInfo {
            server_id: server_id.to_owned(),
            has_public_ip,
        });
    }

    /// Binds a floating IP to a server port without recording a call.
    pub fn bind_floating_ip(&self, server_id: &str, port_id: &str, record: FloatingIp) {
        self.lock().floating_ips.push(BoundFloatingIp {
            server_id: server_id.to_owned(),
            port_id: port_id.to_owned(),
            record,
        });
    }

    /// Queues statuses reported by successive lookups of a server. The last
    /// status sticks once the queue drains.
    pub fn script_statuses(&self, server_id: &str, statuses: &[InstanceStatus]) {
        let mut state = self.lock();
        if let Ok(server) = state.server_mut(server_id) {
            server.script.extend(statuses.iter().cloned());
        }
    }

    /// Sets the status lookups report for servers created from now on.
    pub fn set_creation_statuses(&self, statuses: &[InstanceStatus]) {
        self.lock().creation_script = statuses.to_vec();
    }

    /// Sets the status a server reports after being powered on.
    pub fn set_power_on_status(&self, status: InstanceStatus) {
        self.lock().power_on_status = status;
    }

    /// Makes creation return an empty server id, revealed only by inquiry.
    pub fn hide_id_until_inquiry(&self) {
        self.lock().hide_id_until_inquiry = true;
    }

    /// Makes the next call to `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: ApiError) {
        self.fail_times(method, error, 1);
    }

    /// Makes the next `times` calls to `method` fail with `error`.
    pub fn fail_times(&self, method: &'static str, error: ApiError, times: usize) {
        self.lock()
            .failures
            .entry(method)
            .or_default()
            .extend(std::iter::repeat_n(error, times));
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    /// Returns the recorded calls that change remote state.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<ApiCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutating())
            .cloned()
            .collect()
    }

    /// Counts recorded calls to `method`.
    #[must_use]
    pub fn count(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.name() == method)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Returns the stored detail of a server.
    #[must_use]
    pub fn server(&self, id: &str) -> Option<ServerDetail> {
        self.lock()
            .servers
            .iter()
            .find(|server| server.detail.id == id)
            .map(|server| server.detail.clone())
    }

    /// Returns the identifiers of volumes attached to a server.
    #[must_use]
    pub fn volumes_of(&self, server_id: &str) -> Vec<String> {
        self.lock()
            .volumes
            .iter()
            .filter(|volume| {
                volume
                    .attachments
                    .iter()
                    .any(|attachment| attachment.server_id == server_id)
            })
            .map(|volume| volume.id.clone())
            .collect()
    }

    fn create(&self, request: &CreateServerRequest) -> Result<CreatedServer, ApiError> {
        let mut state = self.lock();
        state.record(ApiCall::CreateServer {
            name: request.name.clone(),
            network_ids: request.network_ids.clone(),
        })?;
        let serial = state.next();
        let id = format!("srv-{serial}");
        let task_id = format!("task-{serial}");
        for network_id in &request.network_ids {
            state.allocate_port(network_id, &id, None, false)?;
        }
        let script = state.creation_script.iter().cloned().collect();
        state.servers.push(FakeServer {
            detail: ServerDetail {
                id: id.clone(),
                name: request.name.clone(),
                status: InstanceStatus::Active,
                flavor_id: Some(request.flavor_id.clone()),
                image_id: Some(request.image_id.clone()),
                cluster_id: String::from("cluster-1"),
                dedicated_server_id: request.dedicated_server_id.clone().unwrap_or_default(),
                security_group_ids: request.security_groups.clone(),
                addresses: None,
            },
            task_id: task_id.clone(),
            script,
        });
        let hide = state.hide_id_until_inquiry;
        Ok(CreatedServer {
            id: if hide { String::new() } else { id },
            task_id,
            password: String::from("initial-password"),
            status: InstanceStatus::Build,
        })
    }

    fn set_status(&self, call: ApiCall, id: &str, status: Option<InstanceStatus>) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.record(call)?;
        let server = state.server_mut(id)?;
        if let Some(next) = status {
            server.detail.status = next;
        }
        Ok(())
    }
}

impl ComputeApi for FakeCloud {
    fn create_async<'a>(
        &'a self,
        _region: &'a str,
        request: &'a CreateServerRequest,
    ) -> ApiFuture<'a, CreatedServer> {
        respond(self.create(request))
    }

    fn get<'a>(&'a self, _region: &'a str, id: &'a str) -> ApiFuture<'a, ServerDetail> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::GetServer { id: id.to_owned() })
            .and_then(|()| state.observe(id));
        respond(result)
    }

    fn inquiry<'a>(&'a self, _region: &'a str, task_id: &'a str) -> ApiFuture<'a, ServerDetail> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::Inquiry {
                task_id: task_id.to_owned(),
            })
            .and_then(|()| {
                let id = state
                    .servers
                    .iter()
                    .find(|server| server.task_id == task_id)
                    .map(|server| server.detail.id.clone())
                    .ok_or_else(|| ApiError::not_found(format!("task {task_id} not found")))?;
                state.observe(&id)
            });
        respond(result)
    }

    fn delete<'a>(&'a self, _region: &'a str, id: &'a str) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::DeleteServer { id: id.to_owned() })
            .and_then(|()| {
                let before = state.servers.len();
                state.servers.retain(|server| server.detail.id != id);
                if state.servers.len() == before {
                    return Err(ApiError::not_found(format!("server {id} not found")));
                }
                Ok(())
            });
        respond(result)
    }

    fn resize<'a>(
        &'a self,
        _region: &'a str,
        id: &'a str,
        flavor_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::Resize {
                flavor_id: flavor_id.to_owned(),
            })
            .and_then(|()| {
                state.server_mut(id)?.detail.flavor_id = Some(flavor_id.to_owned());
                Ok(())
            });
        respond(result)
    }

    fn resize_root_volume<'a>(
        &'a self,
        _region: &'a str,
        id: &'a str,
        new_size: u64,
    ) -> ApiFuture<'a, ()> {
        respond(self.set_status(
            ApiCall::ResizeRootVolume { size: new_size },
            id,
            Some(InstanceStatus::Active),
        ))
    }

    fn power_off<'a>(&'a self, _region: &'a str, id: &'a str) -> ApiFuture<'a, ()> {
        respond(self.set_status(ApiCall::PowerOff, id, Some(InstanceStatus::Shutoff)))
    }

    fn power_on<'a>(&'a self, _region: &'a str, id: &'a str) -> ApiFuture<'a, ()> {
        let status = self.lock().power_on_status.clone();
        respond(self.set_status(ApiCall::PowerOn, id, Some(status)))
    }

    fn rename<'a>(&'a self, _region: &'a str, id: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::Rename {
                name: name.to_owned(),
            })
            .and_then(|()| {
                state.server_mut(id)?.detail.name = name.to_owned();
                Ok(())
            });
        respond(result)
    }
}

impl NetworkApi for FakeCloud {
    fn list_networks<'a>(&'a self, _region: &'a str) -> ApiFuture<'a, Vec<Network>> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::ListNetworks)
            .map(|()| state.networks.clone());
        respond(result)
    }

    fn attach_server<'a>(
        &'a self,
        _region: &'a str,
        network_id: &'a str,
        request: &'a AttachServerRequest,
    ) -> ApiFuture<'a, AttachedPort> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::AttachNetwork {
                network_id: network_id.to_owned(),
                subnet_id: request.subnet_id.clone(),
                ip: request.ip.clone(),
                port_security_enabled: request.enable_port_security,
            })
            .and_then(|()| {
                state.allocate_port(
                    network_id,
                    &request.server_id,
                    request.ip.as_deref(),
                    request.enable_port_security,
                )
            });
        respond(result)
    }

    fn detach_server<'a>(
        &'a self,
        _region: &'a str,
        port_id: &'a str,
        server_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::DetachNetwork {
                port_id: port_id.to_owned(),
            })
            .and_then(|()| {
                let mut removed = false;
                for server in state.servers_mut().filter(|server| server.id == server_id) {
                    let before = server.ips.len();
                    server.ips.retain(|ip| ip.port_id != port_id);
                    removed |= server.ips.len() != before;
                }
                if removed {
                    Ok(())
                } else {
                    Err(ApiError::not_found(format!("port {port_id} not found")))
                }
            });
        respond(result)
    }

    fn enable_port_security<'a>(
        &'a self,
        _region: &'a str,
        _network_id: &'a str,
        port_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        respond(self.set_port_security(port_id, true))
    }

    fn disable_port_security<'a>(
        &'a self,
        _region: &'a str,
        _network_id: &'a str,
        port_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        respond(self.set_port_security(port_id, false))
    }
}

impl FakeCloud {
    fn set_port_security(&self, port_id: &str, enabled: bool) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.record(ApiCall::SetPortSecurity {
            port_id: port_id.to_owned(),
            enabled,
        })?;
        let mut found = false;
        for server in state.servers_mut() {
            for ip in server.ips.iter_mut().filter(|ip| ip.port_id == port_id) {
                ip.port_security_enabled = enabled;
                found = true;
            }
        }
        if found {
            Ok(())
        } else {
            Err(ApiError::not_found(format!("port {port_id} not found")))
        }
    }

    fn port_network(state: &FakeState, port_id: &str) -> Option<String> {
        state
            .networks
            .iter()
            .find(|network| {
                network
                    .subnets
                    .iter()
                    .flat_map(|subnet| subnet.servers.iter())
                    .flat_map(|server| server.ips.iter())
                    .any(|ip| ip.port_id == port_id)
            })
            .map(|network| network.name.clone())
    }
}

impl VolumeApi for FakeCloud {
    fn attach<'a>(
        &'a self,
        _region: &'a str,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::AttachVolume {
                volume_id: volume_id.to_owned(),
            })
            .and_then(|()| {
                let volume = state
                    .volumes
                    .iter_mut()
                    .find(|volume| volume.id == volume_id)
                    .ok_or_else(|| ApiError::not_found(format!("volume {volume_id} not found")))?;
                volume.attachments.push(VolumeAttachmentRecord {
                    server_id: server_id.to_owned(),
                });
                Ok(())
            });
        respond(result)
    }

    fn detach<'a>(
        &'a self,
        _region: &'a str,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::DetachVolume {
                volume_id: volume_id.to_owned(),
            })
            .and_then(|()| {
                let volume = state
                    .volumes
                    .iter_mut()
                    .find(|volume| volume.id == volume_id)
                    .ok_or_else(|| ApiError::not_found(format!("volume {volume_id} not found")))?;
                volume
                    .attachments
                    .retain(|attachment| attachment.server_id != server_id);
                Ok(())
            });
        respond(result)
    }

    fn list<'a>(&'a self, _region: &'a str) -> ApiFuture<'a, Vec<Volume>> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::ListVolumes)
            .map(|()| state.volumes.clone());
        respond(result)
    }
}

impl SecurityGroupApi for FakeCloud {
    fn add_server<'a>(
        &'a self,
        _region: &'a str,
        server_id: &'a str,
        group_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::AddSecurityGroup {
                group_id: group_id.to_owned(),
            })
            .and_then(|()| {
                state
                    .server_mut(server_id)?
                    .detail
                    .security_group_ids
                    .push(group_id.to_owned());
                Ok(())
            });
        respond(result)
    }

    fn remove_server<'a>(
        &'a self,
        _region: &'a str,
        server_id: &'a str,
        group_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::RemoveSecurityGroup {
                group_id: group_id.to_owned(),
            })
            .and_then(|()| {
                state
                    .server_mut(server_id)?
                    .detail
                    .security_group_ids
                    .retain(|group| group != group_id);
                Ok(())
            });
        respond(result)
    }
}

impl FloatingIpApi for FakeCloud {
    fn server_ip_info<'a>(&'a self, _region: &'a str) -> ApiFuture<'a, Vec<ServerIpInfo>> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::ServerIpInfo)
            .map(|()| state.ip_info.clone());
        respond(result)
    }

    fn attach<'a>(
        &'a self,
        _region: &'a str,
        floating_ip_id: &'a str,
        request: &'a FloatingIpAttachRequest,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::AttachFloatingIp {
                floating_ip_id: floating_ip_id.to_owned(),
                port_id: request.port_id.clone(),
                subnet_id: request.subnet_id.clone(),
            })
            .and_then(|()| {
                let network_name = Self::port_network(&state, &request.port_id)
                    .ok_or_else(|| ApiError::client(400, format!("port {} not found", request.port_id)))?;
                let serial = state.next();
                let address = format!("203.0.113.{serial}");
                state.floating_ips.push(BoundFloatingIp {
                    server_id: request.server_id.clone(),
                    port_id: request.port_id.clone(),
                    record: FloatingIp {
                        id: floating_ip_id.to_owned(),
                        address: address.clone(),
                        server_addresses: BTreeMap::from([(
                            network_name,
                            vec![ServerAddress {
                                addr: address,
                                is_public: true,
                            }],
                        )]),
                    },
                });
                Ok(())
            });
        respond(result)
    }

    fn detach<'a>(&'a self, _region: &'a str, port_id: &'a str) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state
            .record(ApiCall::DetachFloatingIp {
                port_id: port_id.to_owned(),
            })
            .and_then(|()| {
                let before = state.floating_ips.len();
                state.floating_ips.retain(|bound| bound.port_id != port_id);
                if state.floating_ips.len() == before {
                    return Err(ApiError::not_found(format!(
                        "no floating ip bound to port {port_id}"
                    )));
                }
                Ok(())
            });
        respond(result)
    }

    fn get_by_server_id<'a>(
        &'a self,
        _region: &'a str,
        server_id: &'a str,
    ) -> ApiFuture<'a, FloatingIp> {
        let mut state = self.lock();
        let result = state.record(ApiCall::GetFloatingIp).and_then(|()| {
            state
                .floating_ips
                .iter()
                .find(|bound| bound.server_id == server_id)
                .map(|bound| bound.record.clone())
                .ok_or_else(|| ApiError::not_found("server has no floating ip"))
        });
        respond(result)
    }
}

impl SnapshotApi for FakeCloud {
    fn revert<'a>(
        &'a self,
        _region: &'a str,
        _server_id: &'a str,
        snapshot_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut state = self.lock();
        let result = state.record(ApiCall::RevertSnapshot {
            snapshot_id: snapshot_id.to_owned(),
        });
        respond(result)
    }
}
