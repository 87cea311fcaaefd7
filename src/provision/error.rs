//! Error types for the provisioning pipeline.

use thiserror::Error;

use crate::command::CommandError;
use crate::resources::AlreadySet;

/// Errors raised while creating the resources encryption depends on.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when an `az` call fails.
    #[error("{step} failed: {source}")]
    Command {
        /// Pipeline step that issued the command.
        step: &'static str,
        /// Underlying command error.
        #[source]
        source: CommandError,
    },
    /// Raised when a command succeeds but its output lacks a field the
    /// pipeline needs.
    #[error("{step} output has no '{pointer}'")]
    MissingField {
        /// Pipeline step that issued the command.
        step: &'static str,
        /// JSON pointer that was expected to resolve to a string.
        pointer: &'static str,
    },
    /// Raised when a wait exhausts its budget.
    #[error("timed out waiting for {label} after {cycles} cycles")]
    TimedOut {
        /// Label of the wait.
        label: String,
        /// Number of cycles made.
        cycles: u32,
    },
    /// Raised when a wait that does not tolerate probe errors sees one.
    #[error("waiting for {label} failed on cycle {cycle}: {source}")]
    Wait {
        /// Label of the wait.
        label: String,
        /// Cycle (1-based) on which the probe failed.
        cycle: u32,
        /// Error returned by the probe.
        #[source]
        source: CommandError,
    },
    /// Raised when a wait observes a failure state.
    #[error("waiting for {label} observed a failure state on cycle {cycle}")]
    Rejected {
        /// Label of the wait.
        label: String,
        /// Cycle (1-based) on which the failure was observed.
        cycle: u32,
    },
    /// Raised when the run is cancelled during a wait.
    #[error("cancelled while waiting for {label}")]
    Cancelled {
        /// Label of the wait.
        label: String,
    },
    /// Raised when a step tries to overwrite an already recorded resource.
    #[error(transparent)]
    Record(#[from] AlreadySet),
}

impl ProvisionError {
    /// Returns `true` when the failure is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
