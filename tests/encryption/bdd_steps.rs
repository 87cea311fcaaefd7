//! BDD step definitions for encryption behaviour.

use adeval::azure::DEFAULT_AZ_BIN;
use adeval::{
    AzureCli, EncryptionBudgets, EncryptionOrchestrator, ProvisioningMode, VolumeTarget,
};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{
    EncryptionContext, EncryptionOutcome, SHOW, data_disabled, data_succeeded, in_progress,
    os_encrypted, provisioned_resources, restart_pending,
};
use crate::paused_runtime::paused_runtime;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a provisioned vm in service principal mode")]
fn provisioned_service_principal(mut encryption_context: EncryptionContext) -> EncryptionContext {
    encryption_context.resources = provisioned_resources(true);
    encryption_context.mode = ProvisioningMode::from_flags(false, false);
    encryption_context
}

#[given("a provisioned vm in single-pass mode")]
fn provisioned_single_pass(mut encryption_context: EncryptionContext) -> EncryptionContext {
    encryption_context.resources = provisioned_resources(false);
    encryption_context.mode = ProvisioningMode::from_flags(true, false);
    encryption_context
}

#[given("the extension requests a restart and then reports the OS volume encrypted")]
fn extension_requests_restart(encryption_context: EncryptionContext) -> EncryptionContext {
    let runner = &encryption_context.runner;
    runner.respond(SHOW, in_progress());
    runner.respond(SHOW, restart_pending());
    runner.respond(SHOW, os_encrypted());
    encryption_context
}

#[given("the extension reports data success with the data disk flag \"{flag}\"")]
fn extension_reports_data_success(
    encryption_context: EncryptionContext,
    flag: bool,
) -> EncryptionContext {
    let runner = &encryption_context.runner;
    for _ in 0..2 {
        runner.respond(SHOW, data_succeeded(flag));
    }
    runner.respond(SHOW, data_disabled());
    encryption_context
}

#[given("the extension never progresses")]
fn extension_never_progresses(encryption_context: EncryptionContext) -> EncryptionContext {
    encryption_context.runner.respond(SHOW, in_progress());
    encryption_context
}

#[when("I encrypt the \"{volume}\" volume")]
fn encrypt_volume(
    mut encryption_context: EncryptionContext,
    volume: String,
) -> Result<EncryptionContext, StepError> {
    let target: VolumeTarget = volume
        .trim()
        .parse()
        .map_err(|err| StepError::Assertion(format!("{err}")))?;
    let runtime = paused_runtime().map_err(|err| StepError::Assertion(err.to_string()))?;
    let cli = AzureCli::new(DEFAULT_AZ_BIN, encryption_context.runner.clone());
    let mut orchestrator = EncryptionOrchestrator::new(&cli, EncryptionBudgets::default());
    let resources = encryption_context.resources.clone();
    let mode = encryption_context.mode;

    let result = runtime.block_on(orchestrator.run(&resources, target, mode));

    encryption_context.outcome = Some(EncryptionOutcome {
        states: orchestrator.states().to_vec(),
        error: result.err().map(|err| err.to_string()),
    });
    Ok(encryption_context)
}

fn outcome(encryption_context: &EncryptionContext) -> Result<&EncryptionOutcome, StepError> {
    encryption_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the orchestrator visits \"{expected}\"")]
fn orchestrator_visits(
    encryption_context: &EncryptionContext,
    expected: String,
) -> Result<(), StepError> {
    let visited = outcome(encryption_context)?
        .states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if visited == expected.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected states {expected}, got {visited}"
        )))
    }
}

#[then("the orchestrator ends in \"{state}\"")]
fn orchestrator_ends_in(
    encryption_context: &EncryptionContext,
    state: String,
) -> Result<(), StepError> {
    let last = outcome(encryption_context)?
        .states
        .last()
        .map(ToString::to_string)
        .unwrap_or_default();
    if last == state.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected final state {state}, got {last}"
        )))
    }
}

#[then("the encryption error mentions \"{text}\"")]
fn error_mentions(encryption_context: &EncryptionContext, text: String) -> Result<(), StepError> {
    match outcome(encryption_context)?.error.as_deref() {
        Some(message) if message.contains(text.trim()) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected an error mentioning {text}, got {other:?}"
        ))),
    }
}

#[then("the vm was restarted \"{count}\" times")]
fn vm_restarted(encryption_context: &EncryptionContext, count: usize) -> Result<(), StepError> {
    let restarts = encryption_context.runner.count("vm restart");
    if restarts == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} restarts, got {restarts}"
        )))
    }
}

#[then("the status was polled \"{count}\" times")]
fn status_polled(encryption_context: &EncryptionContext, count: usize) -> Result<(), StepError> {
    let polls = encryption_context.runner.count(SHOW);
    if polls == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} status polls, got {polls}"
        )))
    }
}

#[then("no metadata verification was issued")]
fn no_metadata_verification(encryption_context: &EncryptionContext) -> Result<(), StepError> {
    let disables = encryption_context.runner.count("vm encryption disable");
    if disables == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no disable calls, got {disables}"
        )))
    }
}

#[then("data encryption was disabled")]
fn data_encryption_disabled(encryption_context: &EncryptionContext) -> Result<(), StepError> {
    let disable = encryption_context
        .runner
        .calls("vm encryption disable")
        .pop()
        .ok_or_else(|| StepError::Assertion(String::from("missing disable call")))?;
    if disable.flag_value("--volume-type").as_deref() == Some("DATA") {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected --volume-type DATA, got {}",
            disable.args_string()
        )))
    }
}
