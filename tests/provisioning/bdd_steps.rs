//! BDD step definitions for provisioning behaviour.

use adeval::azure::DEFAULT_AZ_BIN;
use adeval::{
    AzureCli, ProvisionRequest, ProvisioningMode, ProvisioningPipeline, ResourceNameGenerator,
    ResourceSet, VolumeTarget,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{
    ProvisioningContext, ProvisioningOutcome, supplied_identity, supplied_vault,
};
use crate::paused_runtime::paused_runtime;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a supplied identity and key vault")]
fn supplied_resources(mut provisioning_context: ProvisioningContext) -> ProvisioningContext {
    provisioning_context.settings.identity = Some(supplied_identity());
    provisioning_context.settings.vault = Some(supplied_vault());
    provisioning_context
}

#[given("no supplied resources")]
fn no_supplied_resources(mut provisioning_context: ProvisioningContext) -> ProvisioningContext {
    provisioning_context.settings.identity = None;
    provisioning_context.settings.vault = None;
    provisioning_context
}

fn provision(
    mut provisioning_context: ProvisioningContext,
    volume: &str,
    single_pass: bool,
) -> Result<ProvisioningContext, StepError> {
    let target: VolumeTarget = volume
        .trim()
        .parse()
        .map_err(|err| StepError::Assertion(format!("{err}")))?;
    let names = ResourceNameGenerator::with_prefix("bdd")
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let request = ProvisionRequest {
        image: String::from("RedHat:RHEL:8-LVM:latest"),
        location: String::from("eastus"),
        target,
        mode: ProvisioningMode::from_flags(single_pass, false),
        rhui: false,
    };
    let runtime = paused_runtime().map_err(|err| StepError::Assertion(err.to_string()))?;
    let cli = AzureCli::new(DEFAULT_AZ_BIN, provisioning_context.runner.clone());
    let pipeline = ProvisioningPipeline::new(&cli, &names, &provisioning_context.settings);
    let mut resources = ResourceSet::new();

    let result = runtime.block_on(pipeline.run(&request, &mut resources));

    provisioning_context.outcome = Some(ProvisioningOutcome {
        resources,
        error: result.err().map(|err| err.to_string()),
    });
    Ok(provisioning_context)
}

#[when("I provision an \"{volume}\" run in service principal mode")]
fn provision_service_principal(
    provisioning_context: ProvisioningContext,
    volume: String,
) -> Result<ProvisioningContext, StepError> {
    provision(provisioning_context, &volume, false)
}

#[when("I provision a \"{volume}\" run in single-pass mode")]
fn provision_single_pass(
    provisioning_context: ProvisioningContext,
    volume: String,
) -> Result<ProvisioningContext, StepError> {
    provision(provisioning_context, &volume, true)
}

fn outcome(provisioning_context: &ProvisioningContext) -> Result<&ProvisioningOutcome, StepError> {
    provisioning_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("provisioning succeeds")]
fn provisioning_succeeds(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    match outcome(provisioning_context)?.error.as_deref() {
        None => Ok(()),
        Some(message) => Err(StepError::Assertion(format!(
            "expected success, got: {message}"
        ))),
    }
}

#[then("no \"{prefix}\" commands were issued")]
fn no_commands(provisioning_context: &ProvisioningContext, prefix: String) -> Result<(), StepError> {
    let calls = provisioning_context.runner.calls(prefix.trim());
    if calls.is_empty() {
        Ok(())
    } else {
        let issued = calls
            .iter()
            .map(|call| call.args_string())
            .collect::<Vec<_>>();
        Err(StepError::Assertion(format!(
            "expected no {prefix} commands, got {issued:?}"
        )))
    }
}

#[then("\"{prefix}\" was called \"{count}\" times")]
fn called_times(
    provisioning_context: &ProvisioningContext,
    prefix: String,
    count: usize,
) -> Result<(), StepError> {
    let calls = provisioning_context.runner.count(prefix.trim());
    if calls == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} {prefix} calls, got {calls}"
        )))
    }
}

#[then("the identity is marked as created")]
fn identity_created(provisioning_context: &ProvisioningContext) -> Result<(), StepError> {
    let resources = &outcome(provisioning_context)?.resources;
    if resources.identity_created && resources.app_id.get().is_some() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a created identity, got {resources:?}"
        )))
    }
}
