//! Shared fixtures for convergence BDD scenarios.

use std::cell::RefCell;
use std::time::Duration;

use ecc_converge::api::ServerDetail;
use ecc_converge::test_support::FakeCloud;
use ecc_converge::{
    ConvergeError, DesiredInstanceSpec, InstanceId, InstanceOrchestrator, InstanceStatus,
    NetworkAttachment, NetworkRequest, ObservedInstanceState, Region, Timeouts,
};
use rstest::fixture;

pub const INSTANCE_ID: &str = "vm-1";

#[derive(Debug)]
pub enum ConvergeOutcome {
    Converged(Box<ObservedInstanceState>),
    Deleted,
    Failed(ConvergeError),
}

#[derive(Debug)]
pub struct ConvergenceContext {
    pub cloud: FakeCloud,
    pub observed: RefCell<Option<ObservedInstanceState>>,
    pub outcome: RefCell<Option<ConvergeOutcome>>,
}

impl ConvergenceContext {
    pub fn orchestrator(&self) -> InstanceOrchestrator {
        InstanceOrchestrator::new(self.cloud.apis())
            .with_poll_interval(Duration::from_millis(1))
            .with_timeouts(Timeouts {
                create: Duration::from_secs(2),
                update: Duration::from_secs(2),
                delete: Duration::from_secs(2),
            })
    }

    pub fn observed(&self) -> ObservedInstanceState {
        self.observed
            .borrow()
            .clone()
            .unwrap_or_else(|| panic!("scenario requires an observed instance"))
    }
}

#[fixture]
pub fn convergence_context() -> ConvergenceContext {
    let cloud = FakeCloud::new();
    cloud.add_network("net-a", "alpha", "sub-a");
    cloud.add_network("net-b", "beta", "sub-b");
    cloud.add_network("net-c", "gamma", "sub-c");
    ConvergenceContext {
        cloud,
        observed: RefCell::new(None),
        outcome: RefCell::new(None),
    }
}

pub fn base_spec(networks: &[&str]) -> DesiredInstanceSpec {
    DesiredInstanceSpec {
        region: Region::new("region-1"),
        name: String::from("web-1"),
        image_id: String::from("img-1"),
        flavor_id: String::from("g2-4-8"),
        disk_size: 40,
        networks: networks.iter().map(|id| NetworkRequest::new(*id)).collect(),
        ..DesiredInstanceSpec::default()
    }
}

/// Registers an active instance holding port `p{n}` on the n-th network.
pub fn register_instance(cloud: &FakeCloud, networks: &[&str]) -> ObservedInstanceState {
    let applied = base_spec(networks);
    cloud.add_server(ServerDetail {
        id: INSTANCE_ID.to_owned(),
        name: applied.name.clone(),
        status: InstanceStatus::Active,
        flavor_id: Some(applied.flavor_id.clone()),
        image_id: Some(applied.image_id.clone()),
        ..ServerDetail::default()
    });

    let mut attachments = Vec::new();
    for (index, network_id) in networks.iter().enumerate() {
        let port_id = format!("p{}", index + 1);
        let ip = format!("10.{index}.0.5");
        cloud.add_port(network_id, INSTANCE_ID, &port_id, &ip, false);
        attachments.push(NetworkAttachment {
            network_id: (*network_id).to_owned(),
            subnet_id: network_id.replace("net", "sub"),
            port_id,
            ip,
            is_public: false,
            port_security_enabled: false,
        });
    }

    ObservedInstanceState {
        id: InstanceId::new(INSTANCE_ID),
        status: InstanceStatus::Active,
        applied,
        networks: attachments,
        ..ObservedInstanceState::default()
    }
}
