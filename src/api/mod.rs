//! Collaborator interfaces for the remote infrastructure API.
//!
//! The orchestrator never talks HTTP itself; it drives these traits, which a
//! transport layer implements. Every method is a single request/response and
//! resolves to an [`ApiError`] on failure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod error;
mod types;

pub use error::ApiError;
pub use types::{
    AttachServerRequest, AttachedPort, CreateServerRequest, CreatedServer, FloatingIp,
    FloatingIpAttachRequest, Network, NetworkServer, ServerAddress, ServerDetail, ServerIp,
    ServerIpInfo, Subnet, Volume, VolumeAttachmentRecord,
};

/// Future returned by collaborator calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Instance lifecycle calls.
pub trait ComputeApi: Send + Sync {
    /// Starts an asynchronous instance creation.
    fn create_async<'a>(
        &'a self,
        region: &'a str,
        request: &'a CreateServerRequest,
    ) -> ApiFuture<'a, CreatedServer>;

    /// Fetches an instance by identifier.
    fn get<'a>(&'a self, region: &'a str, id: &'a str) -> ApiFuture<'a, ServerDetail>;

    /// Fetches the instance produced by an in-flight creation task.
    fn inquiry<'a>(&'a self, region: &'a str, task_id: &'a str) -> ApiFuture<'a, ServerDetail>;

    /// Deletes an instance.
    fn delete<'a>(&'a self, region: &'a str, id: &'a str) -> ApiFuture<'a, ()>;

    /// Changes the flavor of a stopped instance.
    fn resize<'a>(&'a self, region: &'a str, id: &'a str, flavor_id: &'a str)
    -> ApiFuture<'a, ()>;

    /// Grows the root volume of a stopped instance.
    fn resize_root_volume<'a>(
        &'a self,
        region: &'a str,
        id: &'a str,
        new_size: u64,
    ) -> ApiFuture<'a, ()>;

    /// Powers an instance off.
    fn power_off<'a>(&'a self, region: &'a str, id: &'a str) -> ApiFuture<'a, ()>;

    /// Powers an instance on.
    fn power_on<'a>(&'a self, region: &'a str, id: &'a str) -> ApiFuture<'a, ()>;

    /// Renames an instance.
    fn rename<'a>(&'a self, region: &'a str, id: &'a str, name: &'a str) -> ApiFuture<'a, ()>;
}

/// Private network calls.
pub trait NetworkApi: Send + Sync {
    /// Lists every network in the region with its subnet/server/IP graph.
    fn list_networks<'a>(&'a self, region: &'a str) -> ApiFuture<'a, Vec<Network>>;

    /// Attaches a server to a network and returns the created port.
    fn attach_server<'a>(
        &'a self,
        region: &'a str,
        network_id: &'a str,
        request: &'a AttachServerRequest,
    ) -> ApiFuture<'a, AttachedPort>;

    /// Detaches a server from the network owning `port_id`.
    fn detach_server<'a>(
        &'a self,
        region: &'a str,
        port_id: &'a str,
        server_id: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Enables port security on an existing port.
    fn enable_port_security<'a>(
        &'a self,
        region: &'a str,
        network_id: &'a str,
        port_id: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Disables port security on an existing port.
    fn disable_port_security<'a>(
        &'a self,
        region: &'a str,
        network_id: &'a str,
        port_id: &'a str,
    ) -> ApiFuture<'a, ()>;
}

/// Block volume calls.
pub trait VolumeApi: Send + Sync {
    /// Attaches a volume to a server.
    fn attach<'a>(
        &'a self,
        region: &'a str,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Detaches a volume from a server.
    fn detach<'a>(
        &'a self,
        region: &'a str,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Lists every volume in the region with its attachments.
    fn list<'a>(&'a self, region: &'a str) -> ApiFuture<'a, Vec<Volume>>;
}

/// Security group membership calls.
pub trait SecurityGroupApi: Send + Sync {
    /// Adds a server to a security group.
    fn add_server<'a>(
        &'a self,
        region: &'a str,
        server_id: &'a str,
        group_id: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Removes a server from a security group.
    fn remove_server<'a>(
        &'a self,
        region: &'a str,
        server_id: &'a str,
        group_id: &'a str,
    ) -> ApiFuture<'a, ()>;
}

/// Floating IP calls.
pub trait FloatingIpApi: Send + Sync {
    /// Reports, per server, whether a public IP is already held.
    fn server_ip_info<'a>(&'a self, region: &'a str) -> ApiFuture<'a, Vec<ServerIpInfo>>;

    /// Binds a floating IP to a server port.
    fn attach<'a>(
        &'a self,
        region: &'a str,
        floating_ip_id: &'a str,
        request: &'a FloatingIpAttachRequest,
    ) -> ApiFuture<'a, ()>;

    /// Unbinds whatever floating IP is attached to `port_id`.
    fn detach<'a>(&'a self, region: &'a str, port_id: &'a str) -> ApiFuture<'a, ()>;

    /// Returns the floating IP bound to a server; [`ApiError::NotFound`] when
    /// none is bound.
    fn get_by_server_id<'a>(
        &'a self,
        region: &'a str,
        server_id: &'a str,
    ) -> ApiFuture<'a, FloatingIp>;
}

/// Snapshot calls.
pub trait SnapshotApi: Send + Sync {
    /// Reverts a server to a snapshot. Completion is not observable.
    fn revert<'a>(
        &'a self,
        region: &'a str,
        server_id: &'a str,
        snapshot_id: &'a str,
    ) -> ApiFuture<'a, ()>;
}

/// Bundle of collaborator handles injected into the orchestrator.
#[derive(Clone)]
pub struct CloudApis {
    /// Instance lifecycle calls.
    pub compute: Arc<dyn ComputeApi>,
    /// Private network calls.
    pub network: Arc<dyn NetworkApi>,
    /// Block volume calls.
    pub volume: Arc<dyn VolumeApi>,
    /// Security group calls.
    pub security_group: Arc<dyn SecurityGroupApi>,
    /// Floating IP calls.
    pub floating_ip: Arc<dyn FloatingIpApi>,
    /// Snapshot calls.
    pub snapshot: Arc<dyn SnapshotApi>,
}

impl CloudApis {
    /// Builds a bundle where a single client implements every interface.
    #[must_use]
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: ComputeApi
            + NetworkApi
            + VolumeApi
            + SecurityGroupApi
            + FloatingIpApi
            + SnapshotApi
            + 'static,
    {
        Self {
            compute: client.clone(),
            network: client.clone(),
            volume: client.clone(),
            security_group: client.clone(),
            floating_ip: client.clone(),
            snapshot: client,
        }
    }
}

impl std::fmt::Debug for CloudApis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudApis").finish_non_exhaustive()
    }
}
