//! Error types for the encryption workflow.

use thiserror::Error;

use crate::command::CommandError;

use super::EncryptionState;

/// Errors raised while enabling encryption or waiting for it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EncryptionError {
    /// Raised when a field the enable command needs was never provisioned.
    #[error("cannot enable encryption: {0} was not provisioned")]
    MissingResource(&'static str),
    /// Raised when an `az` call fails.
    #[error("command failed while {phase}: {source}")]
    Command {
        /// State in which the command was issued.
        phase: EncryptionState,
        /// Underlying command error.
        #[source]
        source: CommandError,
    },
    /// Raised when the extension reports failure or verification fails.
    #[error("encryption failed while {phase}: {reason}")]
    Failed {
        /// State in which the failure was observed.
        phase: EncryptionState,
        /// Provider message or verification detail.
        reason: String,
    },
    /// Raised when a wait exhausts its budget.
    #[error("timed out while {phase}: {label} not reached after {cycles} cycles")]
    TimedOut {
        /// State that timed out.
        phase: EncryptionState,
        /// Label of the wait.
        label: String,
        /// Number of cycles made.
        cycles: u32,
    },
    /// Raised when the run is cancelled during a wait.
    #[error("cancelled while {phase}")]
    Cancelled {
        /// State that was interrupted.
        phase: EncryptionState,
    },
}

impl EncryptionError {
    /// Terminal state this error moves the orchestrator into.
    #[must_use]
    pub const fn terminal_state(&self) -> EncryptionState {
        match self {
            Self::TimedOut { .. } => EncryptionState::TimedOut,
            Self::MissingResource(_)
            | Self::Command { .. }
            | Self::Failed { .. }
            | Self::Cancelled { .. } => EncryptionState::Failed,
        }
    }

    /// Returns `true` when the failure is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
