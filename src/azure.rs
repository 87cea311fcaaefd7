//! JSON invocation layer over the Azure CLI.
//!
//! Every cloud operation in the harness is an `az` call. [`AzureCli`]
//! appends `--output json`, rejects non-zero exits, and parses stdout so the
//! pipeline and orchestrator work with [`serde_json::Value`] instead of raw
//! process output.

use std::ffi::OsString;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::command::{CommandError, CommandOutput, CommandRunner, render_command_line};

/// Default Azure CLI binary name.
pub const DEFAULT_AZ_BIN: &str = "az";

/// Builds an owned argument vector from string slices.
#[must_use]
pub fn az_args(parts: &[&str]) -> Vec<OsString> {
    parts.iter().map(OsString::from).collect()
}

/// Synchronous request/response interface to the Azure CLI.
#[derive(Clone, Debug)]
pub struct AzureCli<R: CommandRunner> {
    program: String,
    runner: R,
}

impl<R: CommandRunner> AzureCli<R> {
    /// Creates a client that runs `program` through `runner`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Returns the configured binary name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs `az <args> --output json` and parses the result.
    ///
    /// Empty stdout on success yields [`Value::Null`]; `--no-wait` deletes
    /// and similar commands print nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] on a non-zero exit status,
    /// [`CommandError::Parse`] when stdout is not JSON, or
    /// [`CommandError::Spawn`] when `az` cannot be started.
    pub fn invoke(&self, args: &[OsString]) -> Result<Value, CommandError> {
        let mut full_args = args.to_vec();
        full_args.push(OsString::from("--output"));
        full_args.push(OsString::from("json"));

        let command = render_command_line(&self.program, &full_args);
        debug!(%command, "invoking azure cli");

        let output = self.runner.run(&self.program, &full_args)?;
        let stdout = check_output(output, &command)?;
        parse_json(&stdout, &command)
    }

    /// Runs [`AzureCli::invoke`] and deserialises the value into `T`.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`AzureCli::invoke`], plus
    /// [`CommandError::Parse`] when the JSON does not match `T`.
    pub fn invoke_as<T: DeserializeOwned>(&self, args: &[OsString]) -> Result<T, CommandError> {
        let value = self.invoke(args)?;
        serde_json::from_value(value).map_err(|err| CommandError::Parse {
            command: render_command_line(&self.program, args),
            message: err.to_string(),
            stdout: String::new(),
        })
    }
}

fn check_output(output: CommandOutput, command: &str) -> Result<String, CommandError> {
    if output.is_success() {
        return Ok(output.stdout);
    }
    Err(CommandError::Failed {
        command: command.to_owned(),
        status: output.code,
        status_text: output.status_text(),
        stderr: output.stderr.trim().to_owned(),
        stdout: output.stdout,
    })
}

fn parse_json(stdout: &str, command: &str) -> Result<Value, CommandError> {
    if stdout.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(stdout).map_err(|err| CommandError::Parse {
        command: command.to_owned(),
        message: err.to_string(),
        stdout: stdout.to_owned(),
    })
}

/// Reads a string at a JSON pointer, returning `None` when absent or not a
/// string.
#[must_use]
pub fn string_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn invoke_appends_json_output_and_parses() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), r#"{"name":"abcrg"}"#, "");
        let cli = AzureCli::new(DEFAULT_AZ_BIN, runner.clone());

        let value = cli
            .invoke(&az_args(&["group", "create", "--name", "abcrg"]))
            .expect("invoke should succeed");

        assert_eq!(value, json!({"name": "abcrg"}));
        let calls = runner.invocations();
        assert_eq!(
            calls.first().map(|call| call.command_string()),
            Some(String::from(
                "az group create --name abcrg --output json"
            ))
        );
    }

    #[rstest]
    fn invoke_treats_empty_stdout_as_null() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let cli = AzureCli::new(DEFAULT_AZ_BIN, runner);
        let value = cli.invoke(&az_args(&["group", "delete"])).expect("null");
        assert_eq!(value, Value::Null);
    }

    #[rstest]
    fn invoke_surfaces_exit_status_and_stderr() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(3), "", "ERROR: quota exceeded\n");
        let cli = AzureCli::new(DEFAULT_AZ_BIN, runner);

        let err = cli
            .invoke(&az_args(&["vm", "create"]))
            .expect_err("non-zero exit should fail");

        match err {
            CommandError::Failed {
                status, stderr, ..
            } => {
                assert_eq!(status, Some(3));
                assert_eq!(stderr, "ERROR: quota exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    fn invoke_rejects_non_json_stdout() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "Succeeded", "");
        let cli = AzureCli::new(DEFAULT_AZ_BIN, runner);
        let err = cli.invoke(&az_args(&["vm", "show"])).expect_err("parse");
        assert!(matches!(err, CommandError::Parse { .. }), "got {err}");
    }

    #[rstest]
    fn failed_command_message_redacts_secrets() {
        let runner = ScriptedRunner::new();
        runner.push_failure(1);
        let cli = AzureCli::new(DEFAULT_AZ_BIN, runner);
        let err = cli
            .invoke(&az_args(&["vm", "encryption", "enable", "--aad-client-secret", "s3cret"]))
            .expect_err("failure");
        assert!(!err.to_string().contains("s3cret"), "leaked: {err}");
    }

    #[rstest]
    fn string_at_reads_nested_fields() {
        let value = json!({"properties": {"vaultUri": "https://kv.vault.azure.net/"}});
        assert_eq!(
            string_at(&value, "/properties/vaultUri"),
            Some("https://kv.vault.azure.net/")
        );
        assert_eq!(string_at(&value, "/properties/missing"), None);
    }
}
