//! Checks that must pass before anything is created.

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::azure::{AzureCli, az_args, string_at};
use crate::command::{CommandError, CommandRunner};

/// Raised when the host cannot run the harness.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PreconditionError {
    /// Raised when the `az` binary cannot be started.
    #[error("azure cli '{program}' is not available: {message}")]
    MissingCli {
        /// Binary that was tried.
        program: String,
        /// Error returned when starting it.
        message: String,
    },
    /// Raised when `az version` fails or prints something unexpected.
    #[error("azure cli is not usable: {0}")]
    UnusableCli(#[source] CommandError),
    /// Raised when no subscription is selected.
    #[error("azure cli is not logged in (run `az login`): {0}")]
    NotLoggedIn(#[source] CommandError),
}

/// Subscription the run will create resources in.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Account {
    /// Subscription id.
    pub id: String,
    /// Subscription display name.
    #[serde(default)]
    pub name: String,
}

/// Verifies the Azure CLI is installed and logged in.
///
/// # Errors
///
/// Returns [`PreconditionError`] when `az` cannot be started, `az version`
/// fails, or `az account show` reports no active subscription.
pub fn check<R: CommandRunner>(cli: &AzureCli<R>) -> Result<Account, PreconditionError> {
    let version = cli
        .invoke(&az_args(&["version"]))
        .map_err(|err| match err {
            CommandError::Spawn { program, message } => {
                PreconditionError::MissingCli { program, message }
            }
            other => PreconditionError::UnusableCli(other),
        })?;
    info!(
        version = string_at(&version, "/azure-cli").unwrap_or("unknown"),
        "azure cli found"
    );

    let account: Account = cli
        .invoke_as(&az_args(&["account", "show"]))
        .map_err(PreconditionError::NotLoggedIn)?;
    info!(subscription = %account.id, name = %account.name, "using subscription");
    Ok(account)
}
