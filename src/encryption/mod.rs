//! Drives `az vm encryption enable` to completion.
//!
//! The orchestrator is a small state machine. DATA targets wait for the
//! data success marker (and, in single-pass mode, verify and then reset the
//! per-disk metadata). OS and ALL targets wait for the restart-pending
//! marker, reboot the VM (retrying a bounded number of times while the
//! marker persists), and then wait for the post-reboot success report.

mod error;
pub mod status;

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::azure::AzureCli;
use crate::command::{CommandError, CommandRunner, render_command_line};
use crate::mode::{ProvisioningMode, VolumeTarget};
use crate::poll::{Cancellation, PollFailure, PollLoop, PollOutcome, PollSpec};
use crate::resources::ResourceSet;

pub use error::EncryptionError;
pub use status::EncryptionView;

const TEN_MINUTES: Duration = Duration::from_secs(600);
const ONE_MINUTE: Duration = Duration::from_secs(60);

/// Index of the first data disk in `az vm encryption show` output.
pub const FIRST_DATA_DISK: usize = 1;

/// States of the encryption state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncryptionState {
    /// Nothing has been issued yet.
    NotStarted,
    /// `az vm encryption enable` is running.
    Enabling,
    /// Waiting for data-volume encryption to finish.
    AwaitingProgress,
    /// Checking and resetting per-disk encryption metadata (single-pass DATA).
    VerifyingMetadata,
    /// Waiting for the extension to ask for a reboot.
    AwaitingRestartPending,
    /// Rebooting the VM.
    Restarting,
    /// Waiting for the extension to report success after the reboot.
    AwaitingPostRestartSuccess,
    /// Encryption finished.
    Succeeded,
    /// A wait exhausted its budget.
    TimedOut,
    /// The extension or a command failed.
    Failed,
}

impl fmt::Display for EncryptionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::Enabling => "enabling",
            Self::AwaitingProgress => "awaiting-progress",
            Self::VerifyingMetadata => "verifying-metadata",
            Self::AwaitingRestartPending => "awaiting-restart-pending",
            Self::Restarting => "restarting",
            Self::AwaitingPostRestartSuccess => "awaiting-post-restart-success",
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed-out",
            Self::Failed => "failed",
        };
        formatter.write_str(name)
    }
}

/// Poll budgets for every encryption phase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptionBudgets {
    /// Wait for data-volume encryption (6 hours).
    pub data_progress: PollSpec,
    /// Wait for data-volume encryption with format-all (20 hours).
    pub data_progress_format_all: PollSpec,
    /// Wait for the restart-pending marker (6 hours).
    pub restart_pending: PollSpec,
    /// Wait for the restart-pending marker for ALL with format-all
    /// (20 hours).
    pub restart_pending_format_all: PollSpec,
    /// Wait for post-reboot success (20 minutes).
    pub post_restart: PollSpec,
    /// Wait for the data flag to clear after `encryption disable`.
    pub disable_verification: PollSpec,
    /// Delay after each reboot before rechecking the restart marker.
    pub restart_settle: Duration,
    /// Reboots issued while the restart marker persists, including the first.
    pub max_restart_attempts: u32,
}

impl Default for EncryptionBudgets {
    fn default() -> Self {
        Self {
            data_progress: PollSpec::new("data volume encryption", TEN_MINUTES, 36),
            data_progress_format_all: PollSpec::new(
                "data volume format and encryption",
                TEN_MINUTES,
                120,
            ),
            restart_pending: PollSpec::new("restart pending", TEN_MINUTES, 36),
            restart_pending_format_all: PollSpec::new(
                "restart pending (format all)",
                TEN_MINUTES,
                120,
            ),
            post_restart: PollSpec::new("post-restart encryption success", ONE_MINUTE, 20),
            disable_verification: PollSpec::new("data encryption disabled", ONE_MINUTE, 30),
            restart_settle: Duration::from_secs(300),
            max_restart_attempts: 3,
        }
    }
}

/// Summary of a successful encryption run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptionReport {
    /// Time from enabling to the first reboot, for OS and ALL targets.
    pub pre_reboot: Option<Duration>,
    /// Reboots issued.
    pub restarts: u32,
}

/// Drives the encryption state machine for one VM.
#[derive(Debug)]
pub struct EncryptionOrchestrator<'a, R: CommandRunner> {
    cli: &'a AzureCli<R>,
    budgets: EncryptionBudgets,
    cancellation: Cancellation,
    states: Vec<EncryptionState>,
}

struct Target<'r> {
    resource_group: &'r str,
    vm: &'r str,
}

impl<'a, R: CommandRunner> EncryptionOrchestrator<'a, R> {
    /// Creates an orchestrator in [`EncryptionState::NotStarted`].
    #[must_use]
    pub fn new(cli: &'a AzureCli<R>, budgets: EncryptionBudgets) -> Self {
        Self {
            cli,
            budgets,
            cancellation: Cancellation::never(),
            states: vec![EncryptionState::NotStarted],
        }
    }

    /// Attaches an external cancellation signal to every wait.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Every state visited so far, in order.
    #[must_use]
    pub fn states(&self) -> &[EncryptionState] {
        &self.states
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EncryptionState {
        self.states
            .last()
            .copied()
            .unwrap_or(EncryptionState::NotStarted)
    }

    /// Enables encryption on the run's VM and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError`] when a required resource is missing, a
    /// command fails, the extension reports failure, metadata verification
    /// fails, a wait times out, or the run is cancelled. The orchestrator
    /// ends in [`EncryptionState::TimedOut`] or [`EncryptionState::Failed`].
    pub async fn run(
        &mut self,
        resources: &ResourceSet,
        target: VolumeTarget,
        mode: ProvisioningMode,
    ) -> Result<EncryptionReport, EncryptionError> {
        match self.drive(resources, target, mode).await {
            Ok(report) => {
                self.enter(EncryptionState::Succeeded);
                Ok(report)
            }
            Err(err) => {
                self.enter(err.terminal_state());
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        resources: &ResourceSet,
        target: VolumeTarget,
        mode: ProvisioningMode,
    ) -> Result<EncryptionReport, EncryptionError> {
        let vm = Target {
            resource_group: require(resources.resource_group.get(), "resource_group")?,
            vm: require(resources.vm.get(), "vm")?,
        };
        let started = Instant::now();

        self.enter(EncryptionState::Enabling);
        self.enable(resources, &vm, target, mode)?;

        if target.includes_os() {
            return self.await_os_encryption(&vm, target, mode, started).await;
        }

        self.enter(EncryptionState::AwaitingProgress);
        let spec = if mode.formats_all() {
            self.budgets.data_progress_format_all.clone()
        } else {
            self.budgets.data_progress.clone()
        };
        self.wait(&vm, EncryptionState::AwaitingProgress, spec, EncryptionView::data_succeeded)
            .await?;

        if !mode.uses_service_principal() {
            self.verify_data_metadata(&vm).await?;
        }

        Ok(EncryptionReport {
            pre_reboot: None,
            restarts: 0,
        })
    }

    async fn await_os_encryption(
        &mut self,
        vm: &Target<'_>,
        target: VolumeTarget,
        mode: ProvisioningMode,
        started: Instant,
    ) -> Result<EncryptionReport, EncryptionError> {
        self.enter(EncryptionState::AwaitingRestartPending);
        let spec = if target == VolumeTarget::All && mode.formats_all() {
            self.budgets.restart_pending_format_all.clone()
        } else {
            self.budgets.restart_pending.clone()
        };
        self.wait(
            vm,
            EncryptionState::AwaitingRestartPending,
            spec,
            EncryptionView::restart_pending,
        )
        .await?;
        let pre_reboot = started.elapsed();
        info!(
            pre_reboot_secs = pre_reboot.as_secs(),
            "restart pending reached"
        );

        self.enter(EncryptionState::Restarting);
        let restarts = self.restart_until_cleared(vm).await?;

        self.enter(EncryptionState::AwaitingPostRestartSuccess);
        let spec = self.budgets.post_restart.clone();
        self.wait(
            vm,
            EncryptionState::AwaitingPostRestartSuccess,
            spec,
            EncryptionView::os_encrypted,
        )
        .await?;

        Ok(EncryptionReport {
            pre_reboot: Some(pre_reboot),
            restarts,
        })
    }

    async fn restart_until_cleared(&self, vm: &Target<'_>) -> Result<u32, EncryptionError> {
        let phase = EncryptionState::Restarting;
        for attempt in 1..=self.budgets.max_restart_attempts {
            info!(attempt, vm = vm.vm, "restarting vm");
            self.invoke(phase, &vm_args(&["vm", "restart"], vm))?;

            if self.cancellation.sleep(self.budgets.restart_settle).await {
                return Err(EncryptionError::Cancelled { phase });
            }

            let view = self.show(vm).map_err(|source| EncryptionError::Command {
                phase,
                source,
            })?;
            if !view.restart_pending() {
                return Ok(attempt);
            }
            warn!(attempt, "restart still pending after reboot");
        }

        Err(EncryptionError::TimedOut {
            phase,
            label: String::from("restart retries"),
            cycles: self.budgets.max_restart_attempts,
        })
    }

    async fn verify_data_metadata(&mut self, vm: &Target<'_>) -> Result<(), EncryptionError> {
        let phase = EncryptionState::VerifyingMetadata;
        self.enter(phase);
        let view = self
            .show(vm)
            .map_err(|source| EncryptionError::Command { phase, source })?;
        if !view.disk_encryption_enabled(FIRST_DATA_DISK) {
            return Err(EncryptionError::Failed {
                phase,
                reason: String::from(
                    "disks[1].encryptionSettings[0].enabled is not true after data encryption succeeded",
                ),
            });
        }

        let mut args = vm_args(&["vm", "encryption", "disable"], vm);
        args.push(OsString::from("--volume-type"));
        args.push(OsString::from(VolumeTarget::Data.as_str()));
        self.invoke(phase, &args)?;

        let spec = self.budgets.disable_verification.clone();
        self.wait(vm, phase, spec, |view| {
            !view.disk_encryption_enabled(FIRST_DATA_DISK)
        })
        .await?;
        Ok(())
    }

    fn enable(
        &self,
        resources: &ResourceSet,
        vm: &Target<'_>,
        target: VolumeTarget,
        mode: ProvisioningMode,
    ) -> Result<(), EncryptionError> {
        let vault_id = require(resources.key_vault_id.get(), "key_vault_id")?;
        let kek_uri = require(resources.kek_uri.get(), "kek_uri")?;

        let mut args = vm_args(&["vm", "encryption", "enable"], vm);
        for (flag, value) in [
            ("--volume-type", target.as_str()),
            ("--disk-encryption-keyvault", vault_id),
            ("--key-encryption-key", kek_uri),
            ("--key-encryption-keyvault", vault_id),
        ] {
            args.push(OsString::from(flag));
            args.push(OsString::from(value));
        }
        if mode.uses_service_principal() {
            args.push(OsString::from("--aad-client-id"));
            args.push(OsString::from(require(resources.app_id.get(), "app_id")?));
            args.push(OsString::from("--aad-client-secret"));
            args.push(OsString::from(require(
                resources.app_secret.get(),
                "app_secret",
            )?));
        }
        if mode.formats_all() && target.includes_data() {
            args.push(OsString::from("--encrypt-format-all"));
        }

        info!(volume_type = %target, vm = vm.vm, "enabling encryption");
        self.invoke(EncryptionState::Enabling, &args)
    }

    async fn wait<S>(
        &self,
        vm: &Target<'_>,
        phase: EncryptionState,
        spec: PollSpec,
        success: S,
    ) -> Result<EncryptionView, EncryptionError>
    where
        S: Fn(&EncryptionView) -> bool,
    {
        let label = spec.label.clone();
        let outcome = PollLoop::new(spec)
            .with_cancellation(self.cancellation.clone())
            .run_with_failure(|| self.show(vm), success, EncryptionView::has_failed)
            .await;

        match outcome {
            PollOutcome::Succeeded(view) => Ok(view),
            PollOutcome::TimedOut { cycles } => Err(EncryptionError::TimedOut {
                phase,
                label,
                cycles,
            }),
            PollOutcome::Failed(PollFailure::Probe { source, .. }) => {
                Err(EncryptionError::Command { phase, source })
            }
            PollOutcome::Failed(PollFailure::Rejected { output, .. }) => {
                Err(EncryptionError::Failed {
                    phase,
                    reason: failure_reason(&output),
                })
            }
            PollOutcome::Failed(PollFailure::Cancelled { .. }) => {
                Err(EncryptionError::Cancelled { phase })
            }
        }
    }

    fn show(&self, vm: &Target<'_>) -> Result<EncryptionView, CommandError> {
        let args = vm_args(&["vm", "encryption", "show"], vm);
        let raw = self.cli.invoke(&args)?;
        let stdout = raw.to_string();
        EncryptionView::from_value(raw).map_err(|err| CommandError::Parse {
            command: render_command_line(self.cli.program(), &args),
            message: err.to_string(),
            stdout,
        })
    }

    fn invoke(&self, phase: EncryptionState, args: &[OsString]) -> Result<(), EncryptionError> {
        self.cli
            .invoke(args)
            .map(drop)
            .map_err(|source| EncryptionError::Command { phase, source })
    }

    fn enter(&mut self, state: EncryptionState) {
        info!(%state, "encryption state");
        self.states.push(state);
    }
}

fn require<'v>(value: Option<&'v String>, field: &'static str) -> Result<&'v str, EncryptionError> {
    value
        .map(String::as_str)
        .ok_or(EncryptionError::MissingResource(field))
}

fn vm_args(command: &[&str], vm: &Target<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = command.iter().map(OsString::from).collect();
    args.push(OsString::from("--resource-group"));
    args.push(OsString::from(vm.resource_group));
    args.push(OsString::from("--name"));
    args.push(OsString::from(vm.vm));
    args
}

fn failure_reason(view: &EncryptionView) -> String {
    view.status
        .iter()
        .find_map(|entry| entry.message.clone().or_else(|| entry.display_status.clone()))
        .unwrap_or_else(|| String::from("extension reported a failed provisioning state"))
}
