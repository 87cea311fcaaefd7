//! Core library for the adeval Azure Disk Encryption validation harness.
//!
//! A run provisions a resource group, identity, key vault, network and VM
//! through the Azure CLI, enables disk encryption, polls until it completes,
//! and tears everything down. Every cloud call goes through a
//! [`CommandRunner`] so tests can script the CLI's responses.

pub mod azure;
pub mod command;
pub mod config;
pub mod encryption;
pub mod mode;
pub mod naming;
pub mod poll;
pub mod preflight;
pub mod provision;
pub mod resources;
pub mod run;
pub mod teardown;
pub mod test_support;

pub use azure::AzureCli;
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{AdeConfig, ConfigError};
pub use encryption::{
    EncryptionBudgets, EncryptionError, EncryptionOrchestrator, EncryptionState, EncryptionView,
};
pub use mode::{CredentialMode, DiskFormatMode, ProvisioningMode, VolumeTarget};
pub use naming::{NameError, ResourceNameGenerator};
pub use poll::{CancelTrigger, Cancellation, PollLoop, PollOutcome, PollSpec};
pub use preflight::PreconditionError;
pub use provision::{ProvisionError, ProvisionRequest, ProvisionSettings, ProvisioningPipeline};
pub use resources::ResourceSet;
pub use run::{RunError, RunReport, RunRequest, ValidationRun};
pub use teardown::{TeardownManager, TeardownReport};
