//! Orchestrates one end-to-end validation run.
//!
//! The run checks preconditions, provisions every resource, enables and
//! waits for encryption, and tears the resources down. Teardown happens on
//! success and after any failure once something has been created; when it
//! leaves work for a human, the commands are appended to the error.

use std::io::Write;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

use crate::azure::AzureCli;
use crate::command::CommandRunner;
use crate::encryption::{
    EncryptionBudgets, EncryptionError, EncryptionOrchestrator, EncryptionState,
};
use crate::naming::ResourceNameGenerator;
use crate::poll::Cancellation;
use crate::preflight::{self, PreconditionError};
use crate::provision::{ProvisionError, ProvisionRequest, ProvisionSettings, ProvisioningPipeline};
use crate::resources::ResourceSet;
use crate::teardown::{TeardownManager, TeardownReport};

/// Errors surfaced by a validation run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Raised when the host cannot run the harness. Nothing was created.
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
    /// Raised when provisioning fails.
    #[error("provisioning failed: {message}")]
    Provision {
        /// Human-readable description, including any cleanup still needed.
        message: String,
        /// Underlying provisioning error.
        #[source]
        source: ProvisionError,
    },
    /// Raised when encryption fails or times out.
    #[error("encryption failed: {message}")]
    Encryption {
        /// Human-readable description, including any cleanup still needed.
        message: String,
        /// Underlying encryption error.
        #[source]
        source: EncryptionError,
        /// Orchestrator states visited before the failure.
        states: Vec<EncryptionState>,
    },
}

impl RunError {
    /// Returns `true` when the run stopped because a wait ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        match self {
            Self::Precondition(_) => false,
            Self::Provision { source, .. } => source.is_timeout(),
            Self::Encryption { source, .. } => source.is_timeout(),
        }
    }
}

/// Inputs for one validation run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunRequest {
    /// What to provision and encrypt.
    pub provision: ProvisionRequest,
    /// Delete resources at the end instead of printing the commands.
    pub auto_delete: bool,
}

/// Summary of a successful run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Prefix shared by every resource name.
    pub prefix: String,
    /// Time from enabling encryption to the first reboot (OS and ALL).
    pub pre_reboot: Option<Duration>,
    /// Wall time of the whole run.
    pub total: Duration,
    /// Final orchestrator state.
    pub status: EncryptionState,
    /// Every orchestrator state visited.
    pub states: Vec<EncryptionState>,
    /// Reboots issued during encryption.
    pub restarts: u32,
    /// What teardown did.
    pub teardown: TeardownReport,
}

/// Executes validation runs against the Azure CLI.
#[derive(Debug)]
pub struct ValidationRun<R: CommandRunner> {
    cli: AzureCli<R>,
    names: ResourceNameGenerator,
    settings: ProvisionSettings,
    budgets: EncryptionBudgets,
    cancellation: Cancellation,
}

impl<R: CommandRunner> ValidationRun<R> {
    /// Creates a run with default encryption budgets and no cancellation.
    #[must_use]
    pub fn new(cli: AzureCli<R>, names: ResourceNameGenerator, settings: ProvisionSettings) -> Self {
        Self {
            cli,
            names,
            settings,
            budgets: EncryptionBudgets::default(),
            cancellation: Cancellation::never(),
        }
    }

    /// Overrides the encryption poll budgets.
    #[must_use]
    pub fn with_budgets(mut self, budgets: EncryptionBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Attaches an external cancellation signal to every wait.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Runs preflight, provisioning, encryption and teardown.
    ///
    /// Manual teardown commands are written to `out` when
    /// `request.auto_delete` is unset.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when a precondition fails, provisioning fails,
    /// or encryption fails or times out. Teardown failures never replace
    /// these errors; they are appended to the message instead.
    pub async fn execute<W: Write>(
        &self,
        request: &RunRequest,
        out: &mut W,
    ) -> Result<RunReport, RunError> {
        let started = Instant::now();
        preflight::check(&self.cli)?;
        info!(prefix = self.names.prefix(), "starting validation run");

        let mut resources = ResourceSet::new();
        let pipeline = ProvisioningPipeline::new(&self.cli, &self.names, &self.settings)
            .with_cancellation(self.cancellation.clone());
        if let Err(err) = pipeline.run(&request.provision, &mut resources).await {
            let teardown = self.teardown(&resources, request, out);
            return Err(RunError::Provision {
                message: append_teardown_note(err.to_string(), &teardown),
                source: err,
            });
        }

        let mut orchestrator = EncryptionOrchestrator::new(&self.cli, self.budgets.clone())
            .with_cancellation(self.cancellation.clone());
        let outcome = orchestrator
            .run(
                &resources,
                request.provision.target,
                request.provision.mode,
            )
            .await;
        let teardown = self.teardown(&resources, request, out);

        match outcome {
            Ok(encryption) => {
                let total = started.elapsed();
                info!(total_secs = total.as_secs(), "validation run succeeded");
                Ok(RunReport {
                    prefix: self.names.prefix().to_owned(),
                    pre_reboot: encryption.pre_reboot,
                    total,
                    status: orchestrator.state(),
                    states: orchestrator.states().to_vec(),
                    restarts: encryption.restarts,
                    teardown,
                })
            }
            Err(err) => Err(RunError::Encryption {
                message: append_teardown_note(err.to_string(), &teardown),
                source: err,
                states: orchestrator.states().to_vec(),
            }),
        }
    }

    fn teardown<W: Write>(
        &self,
        resources: &ResourceSet,
        request: &RunRequest,
        out: &mut W,
    ) -> TeardownReport {
        TeardownManager::new(&self.cli).teardown(resources, request.auto_delete, out)
    }
}

fn append_teardown_note(message: String, teardown: &TeardownReport) -> String {
    if teardown.is_clean() {
        message
    } else {
        format!(
            "{message} (delete remaining resources with: {})",
            teardown.remaining.join("; ")
        )
    }
}
