//! Deletes, or describes how to delete, everything a run provisioned.
//!
//! Teardown is best effort. Failures are logged and collected in the
//! [`TeardownReport`] so the caller can print the commands still needed;
//! they never replace the error that caused the run to stop.

use std::ffi::OsString;
use std::io::Write;

use tracing::{info, warn};

use crate::azure::{AzureCli, az_args};
use crate::command::{CommandError, CommandRunner, render_command_line};
use crate::resources::ResourceSet;

/// One deletion issued at teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownAction {
    /// `az group delete --name <group> --yes --no-wait`.
    DeleteResourceGroup(String),
    /// `az ad app delete --id <app id>`.
    DeleteApplication(String),
}

impl TeardownAction {
    /// Arguments passed to `az` for this action.
    #[must_use]
    pub fn args(&self) -> Vec<OsString> {
        match self {
            Self::DeleteResourceGroup(name) => {
                az_args(&["group", "delete", "--name", name, "--yes", "--no-wait"])
            }
            Self::DeleteApplication(app_id) => az_args(&["ad", "app", "delete", "--id", app_id]),
        }
    }

    /// Shell command a human can run to perform this action.
    #[must_use]
    pub fn command_line(&self, program: &str) -> String {
        render_command_line(program, &self.args())
    }
}

/// Returns the deletions `resources` calls for: the resource group if one
/// was created, then the application if this run created it.
#[must_use]
pub fn planned_actions(resources: &ResourceSet) -> Vec<TeardownAction> {
    let mut actions = Vec::new();
    if let Some(group) = resources.resource_group.get() {
        actions.push(TeardownAction::DeleteResourceGroup(group.clone()));
    }
    if resources.identity_created
        && let Some(app_id) = resources.app_id.get()
    {
        actions.push(TeardownAction::DeleteApplication(app_id.clone()));
    }
    actions
}

/// What teardown did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TeardownReport {
    /// Actions issued successfully.
    pub deleted: Vec<TeardownAction>,
    /// Actions whose command failed.
    pub failed: Vec<(TeardownAction, CommandError)>,
    /// Commands a human still has to run: every planned command in manual
    /// mode, the failed ones otherwise.
    pub remaining: Vec<String>,
}

impl TeardownReport {
    /// Returns `true` when nothing is left to delete by hand.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Issues or prints teardown commands for a run.
#[derive(Debug)]
pub struct TeardownManager<'a, R: CommandRunner> {
    cli: &'a AzureCli<R>,
}

impl<'a, R: CommandRunner> TeardownManager<'a, R> {
    /// Creates a manager issuing commands through `cli`.
    #[must_use]
    pub const fn new(cli: &'a AzureCli<R>) -> Self {
        Self { cli }
    }

    /// Deletes the run's resources when `auto_delete` is set; otherwise
    /// writes the equivalent commands to `out`, one per line, and issues
    /// nothing.
    pub fn teardown<W: Write>(
        &self,
        resources: &ResourceSet,
        auto_delete: bool,
        out: &mut W,
    ) -> TeardownReport {
        let actions = planned_actions(resources);
        let program = self.cli.program();
        let mut report = TeardownReport::default();

        if !auto_delete {
            for action in actions {
                let line = action.command_line(program);
                if let Err(err) = writeln!(out, "{line}") {
                    warn!(error = %err, "failed to write teardown command");
                }
                report.remaining.push(line);
            }
            return report;
        }

        for action in actions {
            info!(command = %action.command_line(program), "deleting");
            match self.cli.invoke(&action.args()) {
                Ok(_) => report.deleted.push(action),
                Err(err) => {
                    warn!(error = %err, "teardown command failed");
                    report.remaining.push(action.command_line(program));
                    report.failed.push((action, err));
                }
            }
        }
        report
    }
}
