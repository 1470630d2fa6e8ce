//! BDD scenarios for instance convergence.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ConvergenceContext, convergence_context};

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Reconcile network attachments in place"
)]
fn scenario_reconcile_networks(convergence_context: ConvergenceContext) {
    let _ = convergence_context;
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Applying the observed configuration changes nothing"
)]
fn scenario_idempotent_update(convergence_context: ConvergenceContext) {
    let _ = convergence_context;
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Refuse a floating IP while a public IP exists"
)]
fn scenario_floating_ip_guard(convergence_context: ConvergenceContext) {
    let _ = convergence_context;
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Reject shrinking the root volume"
)]
fn scenario_root_volume_shrink(convergence_context: ConvergenceContext) {
    let _ = convergence_context;
}

#[scenario(
    path = "tests/features/convergence.feature",
    name = "Deleting a missing instance succeeds"
)]
fn scenario_delete_missing(convergence_context: ConvergenceContext) {
    let _ = convergence_context;
}
