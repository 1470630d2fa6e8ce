//! BDD step definitions for instance convergence.

use ecc_converge::test_support::ApiCall;
use ecc_converge::{
    ConvergeError, DesiredInstanceSpec, FloatingIpAttachment, InstanceId, NetworkRequest,
    ObservedInstanceState,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{
    ConvergeOutcome, ConvergenceContext, base_spec, register_instance,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn converge(convergence_context: &ConvergenceContext, desired: &DesiredInstanceSpec) -> Result<(), StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let observed = convergence_context.observed();
    let orchestrator = convergence_context.orchestrator();
    let outcome = match runtime.block_on(orchestrator.update(&observed, desired)) {
        Ok(state) => ConvergeOutcome::Converged(Box::new(state)),
        Err(err) => ConvergeOutcome::Failed(err),
    };
    convergence_context.outcome.replace(Some(outcome));
    Ok(())
}

fn converged_state(convergence_context: &ConvergenceContext) -> Result<ObservedInstanceState, StepError> {
    match convergence_context.outcome.borrow().as_ref() {
        Some(ConvergeOutcome::Converged(state)) => Ok(state.as_ref().clone()),
        Some(ConvergeOutcome::Failed(err)) => Err(StepError::Assertion(format!(
            "expected convergence, got failure: {err}"
        ))),
        Some(ConvergeOutcome::Deleted) => Err(StepError::Assertion(String::from(
            "expected convergence, got deletion",
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[given("an instance attached to networks \"{first}\" and \"{second}\"")]
fn instance_with_networks(convergence_context: &ConvergenceContext, first: String, second: String) {
    let observed = register_instance(&convergence_context.cloud, &[first.as_str(), second.as_str()]);
    convergence_context.observed.replace(Some(observed));
}

#[given("the instance already holds a public IP")]
fn instance_holds_public_ip(convergence_context: &ConvergenceContext) {
    let observed = convergence_context.observed();
    convergence_context.cloud.set_ip_info(observed.id.as_str(), true);
}

#[given("no instance named \"{id}\" exists")]
fn missing_instance(convergence_context: &ConvergenceContext, id: String) {
    convergence_context.observed.replace(Some(ObservedInstanceState {
        id: InstanceId::new(id),
        applied: base_spec(&[]),
        ..ObservedInstanceState::default()
    }));
}

#[when("I converge to networks \"{first}\" and \"{second}\"")]
fn converge_networks(convergence_context: &ConvergenceContext, first: String, second: String) -> Result<(), StepError> {
    let desired = DesiredInstanceSpec {
        networks: vec![NetworkRequest::new(first), NetworkRequest::new(second)],
        ..convergence_context.observed().applied
    };
    converge(convergence_context, &desired)
}

#[when("I converge to the applied configuration")]
fn converge_unchanged(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    let desired = convergence_context.observed().applied;
    converge(convergence_context, &desired)
}

#[when("I converge with floating IP \"{floating_ip}\" on network \"{network}\"")]
fn converge_floating_ip(
    convergence_context: &ConvergenceContext,
    floating_ip: String,
    network: String,
) -> Result<(), StepError> {
    let desired = DesiredInstanceSpec {
        floating_ip: Some(FloatingIpAttachment::new(floating_ip, network)),
        ..convergence_context.observed().applied
    };
    converge(convergence_context, &desired)
}

#[when("I converge with root volume size \"{size}\"")]
fn converge_root_volume(convergence_context: &ConvergenceContext, size: u64) -> Result<(), StepError> {
    let desired = DesiredInstanceSpec {
        disk_size: size,
        ..convergence_context.observed().applied
    };
    converge(convergence_context, &desired)
}

#[when("I delete the instance")]
fn delete_instance(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let observed = convergence_context.observed();
    let orchestrator = convergence_context.orchestrator();
    let outcome = match runtime.block_on(orchestrator.delete(&observed)) {
        Ok(()) => ConvergeOutcome::Deleted,
        Err(err) => ConvergeOutcome::Failed(err),
    };
    convergence_context.outcome.replace(Some(outcome));
    Ok(())
}

#[then("the update succeeds")]
fn update_succeeds(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    converged_state(convergence_context).map(drop)
}

#[then("the update fails as unsupported")]
fn update_unsupported(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    match convergence_context.outcome.borrow().as_ref() {
        Some(ConvergeOutcome::Failed(ConvergeError::UnsupportedOperation { .. })) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected unsupported operation, got {other:?}"
        ))),
    }
}

#[then("the deletion succeeds")]
fn deletion_succeeds(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    match convergence_context.outcome.borrow().as_ref() {
        Some(ConvergeOutcome::Deleted) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected deletion, got {other:?}"
        ))),
    }
}

#[then("port \"{port}\" is detached")]
fn port_detached(convergence_context: &ConvergenceContext, port: String) -> Result<(), StepError> {
    let expected = ApiCall::DetachNetwork { port_id: port };
    if convergence_context.cloud.mutating_calls().contains(&expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?} in {:?}",
            convergence_context.cloud.mutating_calls()
        )))
    }
}

#[then("network \"{network}\" is attached with a new port")]
fn network_attached(convergence_context: &ConvergenceContext, network: String) -> Result<(), StepError> {
    let state = converged_state(convergence_context)?;
    let attached = convergence_context.cloud.mutating_calls().iter().any(|call| {
        matches!(call, ApiCall::AttachNetwork { network_id, .. } if *network_id == network)
    });
    let has_port = state
        .network(&network)
        .is_some_and(|attachment| attachment.is_attached());
    if attached && has_port {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "network {network} should be attached, state: {:?}",
            state.networks
        )))
    }
}

#[then("network \"{network}\" keeps port \"{port}\"")]
fn network_keeps_port(convergence_context: &ConvergenceContext, network: String, port: String) -> Result<(), StepError> {
    let state = converged_state(convergence_context)?;
    let kept = state
        .network(&network)
        .is_some_and(|attachment| attachment.port_id == port);
    let detached = convergence_context
        .cloud
        .mutating_calls()
        .contains(&ApiCall::DetachNetwork { port_id: port.clone() });
    if kept && !detached {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "network {network} should keep port {port}"
        )))
    }
}

#[then("no mutating call is issued")]
fn no_mutation(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    let calls = convergence_context.cloud.mutating_calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected calls: {calls:?}")))
    }
}

#[then("no floating IP is attached")]
fn no_floating_ip(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    if convergence_context.cloud.count("attach_floating_ip") == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "floating ip attach should not be issued",
        )))
    }
}

#[then("the root volume is not resized")]
fn root_volume_untouched(convergence_context: &ConvergenceContext) -> Result<(), StepError> {
    if convergence_context.cloud.count("resize_root_volume") == 0 && convergence_context.cloud.count("power_off") == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "root volume resize should not be issued",
        )))
    }
}
