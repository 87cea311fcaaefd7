//! BDD step definitions for teardown behaviour.

use adeval::azure::DEFAULT_AZ_BIN;
use adeval::{AzureCli, TeardownManager};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{GROUP_DELETE, TeardownContext, TeardownOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a run that created resource group \"{group}\" and application \"{app_id}\"")]
fn run_created_resources(
    mut teardown_context: TeardownContext,
    group: String,
    app_id: String,
) -> Result<TeardownContext, StepError> {
    let resources = &mut teardown_context.resources;
    resources
        .set_resource_group(group.trim())
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    resources
        .set_app_id(app_id.trim())
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    resources.identity_created = true;
    Ok(teardown_context)
}

#[given("resource group deletion fails")]
fn group_deletion_fails(teardown_context: TeardownContext) -> TeardownContext {
    teardown_context
        .runner
        .replace_failure(GROUP_DELETE, 1, "AuthorizationFailed");
    teardown_context
}

fn tear_down(mut teardown_context: TeardownContext, auto_delete: bool) -> TeardownContext {
    let cli = AzureCli::new(DEFAULT_AZ_BIN, teardown_context.runner.clone());
    let mut buf = Vec::new();
    let report =
        TeardownManager::new(&cli).teardown(&teardown_context.resources, auto_delete, &mut buf);
    teardown_context.outcome = Some(TeardownOutcome {
        report,
        output: String::from_utf8_lossy(&buf).into_owned(),
    });
    teardown_context
}

#[when("I tear down without auto delete")]
fn tear_down_manually(teardown_context: TeardownContext) -> TeardownContext {
    tear_down(teardown_context, false)
}

#[when("I tear down with auto delete")]
fn tear_down_automatically(teardown_context: TeardownContext) -> TeardownContext {
    tear_down(teardown_context, true)
}

fn outcome(teardown_context: &TeardownContext) -> Result<&TeardownOutcome, StepError> {
    teardown_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("no azure commands are issued")]
fn no_commands_issued(teardown_context: &TeardownContext) -> Result<(), StepError> {
    let calls = teardown_context.runner.invocations();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no commands, got {calls:?}"
        )))
    }
}

#[then("the output lists \"{line}\"")]
fn output_lists(teardown_context: &TeardownContext, line: String) -> Result<(), StepError> {
    let output = &outcome(teardown_context)?.output;
    if output.lines().any(|printed| printed == line.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected output to list {line}, got:\n{output}"
        )))
    }
}

#[then("\"{prefix}\" was issued")]
fn command_issued(teardown_context: &TeardownContext, prefix: String) -> Result<(), StepError> {
    if teardown_context.runner.count(prefix.trim()) == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one {prefix} call, got {:?}",
            teardown_context.runner.invocations()
        )))
    }
}

#[then("nothing is left to delete by hand")]
fn nothing_left(teardown_context: &TeardownContext) -> Result<(), StepError> {
    let report = &outcome(teardown_context)?.report;
    if report.is_clean() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected a clean teardown, got {:?}",
            report.remaining
        )))
    }
}

#[then("the remaining commands include \"{line}\"")]
fn remaining_includes(teardown_context: &TeardownContext, line: String) -> Result<(), StepError> {
    let report = &outcome(teardown_context)?.report;
    if report.remaining.iter().any(|command| command == line.trim()) && report.failed.len() == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {line} among {:?}",
            report.remaining
        )))
    }
}
