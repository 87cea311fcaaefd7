//! BDD scenarios for the provisioning pipeline.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisioningContext, provisioning_context};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reuse a supplied identity and key vault"
)]
fn scenario_reuse_supplied_resources(provisioning_context: ProvisioningContext) {
    let _ = provisioning_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Create an identity for service principal runs"
)]
fn scenario_create_identity(provisioning_context: ProvisioningContext) {
    let _ = provisioning_context;
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Prepare data disks for data runs"
)]
fn scenario_prepare_data_disks(provisioning_context: ProvisioningContext) {
    let _ = provisioning_context;
}
