//! Bounded polling of remote state.
//!
//! Every "wait for the cloud" need in the harness goes through
//! [`PollLoop`]: role assignment propagation, directory visibility, setup
//! script completion, and each encryption phase. A loop makes at most
//! `max_cycles` probes, sleeping `interval` between them, and always ends in
//! exactly one [`PollOutcome`].

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::command::CommandError;

/// Cycle budget and pacing for one polling loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PollSpec {
    /// Short description used in logs and error messages.
    pub label: String,
    /// Delay between consecutive probes.
    pub interval: Duration,
    /// Maximum number of probes before timing out.
    pub max_cycles: u32,
    /// When `true`, probe errors count as an unsatisfied cycle instead of
    /// ending the loop. Used where eventual consistency is expected.
    pub tolerate_probe_errors: bool,
}

impl PollSpec {
    /// Creates a spec that fails on the first probe error.
    #[must_use]
    pub fn new(label: impl Into<String>, interval: Duration, max_cycles: u32) -> Self {
        Self {
            label: label.into(),
            interval,
            max_cycles,
            tolerate_probe_errors: false,
        }
    }

    /// Treats probe errors as "not yet" rather than fatal.
    #[must_use]
    pub fn tolerating_probe_errors(mut self) -> Self {
        self.tolerate_probe_errors = true;
        self
    }

    /// Returns `interval * max_cycles`, the longest the loop can wait.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_cycles)
    }
}

/// Why a polling loop ended without success or timeout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollFailure<T> {
    /// The probe returned an error and errors are not tolerated.
    Probe {
        /// Cycle (1-based) on which the probe failed.
        cycle: u32,
        /// Error returned by the probe.
        source: CommandError,
    },
    /// The failure predicate matched the probe output.
    Rejected {
        /// Cycle (1-based) on which the failure was observed.
        cycle: u32,
        /// Probe output that matched the failure predicate.
        output: T,
    },
    /// The loop was cancelled externally.
    Cancelled {
        /// Number of probes made before cancellation.
        cycle: u32,
    },
}

impl<T> fmt::Display for PollFailure<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe { cycle, source } => {
                write!(formatter, "probe failed on cycle {cycle}: {source}")
            }
            Self::Rejected { cycle, .. } => {
                write!(formatter, "failure state observed on cycle {cycle}")
            }
            Self::Cancelled { cycle } => write!(formatter, "cancelled after {cycle} cycles"),
        }
    }
}

/// Terminal state of a polling loop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PollOutcome<T> {
    /// The success predicate matched; carries the matching probe output.
    Succeeded(T),
    /// The cycle budget was exhausted without success.
    TimedOut {
        /// Number of probes made.
        cycles: u32,
    },
    /// The loop ended early; see [`PollFailure`].
    Failed(PollFailure<T>),
}

impl<T> PollOutcome<T> {
    /// Returns `true` for [`PollOutcome::Succeeded`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// External stop signal for long-running loops.
///
/// Cloning shares the signal. A loop observing `true` ends with
/// [`PollFailure::Cancelled`] at its next sleep.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    receiver: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    #[must_use]
    pub const fn never() -> Self {
        Self { receiver: None }
    }

    /// Creates a linked trigger and signal.
    #[must_use]
    pub fn channel() -> (CancelTrigger, Self) {
        let (sender, receiver) = watch::channel(false);
        (
            CancelTrigger { sender },
            Self {
                receiver: Some(receiver),
            },
        )
    }

    /// Returns `true` once the trigger has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .is_some_and(|receiver| *receiver.borrow())
    }

    /// Sleeps for `interval`, returning `true` if cancelled first.
    pub(crate) async fn sleep(&self, interval: Duration) -> bool {
        let Some(receiver) = self.receiver.as_ref() else {
            sleep(interval).await;
            return false;
        };
        let mut receiver = receiver.clone();
        tokio::select! {
            () = sleep(interval) => false,
            fired = receiver.wait_for(|flag| *flag) => {
                if fired.is_ok() {
                    return true;
                }
                // Trigger dropped without firing; finish the interval.
                sleep(interval).await;
                false
            }
        }
    }
}

/// Fires a [`Cancellation`].
#[derive(Debug)]
pub struct CancelTrigger {
    sender: watch::Sender<bool>,
}

impl CancelTrigger {
    /// Signals every linked [`Cancellation`].
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

/// Generic bounded polling primitive.
#[derive(Clone, Debug)]
pub struct PollLoop {
    spec: PollSpec,
    cancellation: Cancellation,
}

impl PollLoop {
    /// Creates a loop with the given spec and no cancellation.
    #[must_use]
    pub const fn new(spec: PollSpec) -> Self {
        Self {
            spec,
            cancellation: Cancellation::never(),
        }
    }

    /// Attaches an external cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Returns the loop's spec.
    #[must_use]
    pub const fn spec(&self) -> &PollSpec {
        &self.spec
    }

    /// Polls until `success` holds or the budget runs out.
    pub async fn run<T, P, S>(&self, probe: P, success: S) -> PollOutcome<T>
    where
        P: FnMut() -> Result<T, CommandError>,
        S: Fn(&T) -> bool,
    {
        self.run_with_failure(probe, success, |_| false).await
    }

    /// Polls until `success` holds, `failure` holds, or the budget runs out.
    ///
    /// `success` is checked before `failure` on each cycle.
    pub async fn run_with_failure<T, P, S, F>(
        &self,
        mut probe: P,
        success: S,
        failure: F,
    ) -> PollOutcome<T>
    where
        P: FnMut() -> Result<T, CommandError>,
        S: Fn(&T) -> bool,
        F: Fn(&T) -> bool,
    {
        let spec = &self.spec;
        info!(
            label = %spec.label,
            interval_secs = spec.interval.as_secs(),
            max_cycles = spec.max_cycles,
            "waiting"
        );

        for cycle in 1..=spec.max_cycles {
            match probe() {
                Ok(output) if success(&output) => {
                    info!(label = %spec.label, cycle, "condition reached");
                    return PollOutcome::Succeeded(output);
                }
                Ok(output) if failure(&output) => {
                    warn!(label = %spec.label, cycle, "failure state observed");
                    return PollOutcome::Failed(PollFailure::Rejected { cycle, output });
                }
                Ok(_) => debug!(label = %spec.label, cycle, "condition not reached yet"),
                Err(source) if spec.tolerate_probe_errors => {
                    warn!(label = %spec.label, cycle, error = %source, "probe failed, retrying");
                }
                Err(source) => {
                    return PollOutcome::Failed(PollFailure::Probe { cycle, source });
                }
            }

            if cycle < spec.max_cycles && self.cancellation.sleep(spec.interval).await {
                warn!(label = %spec.label, cycle, "cancelled");
                return PollOutcome::Failed(PollFailure::Cancelled { cycle });
            }
        }

        warn!(label = %spec.label, cycles = spec.max_cycles, "timed out");
        PollOutcome::TimedOut {
            cycles: spec.max_cycles,
        }
    }
}

/// Returns `true` when `marker` appears anywhere in `value`: in its
/// serialised form or inside any string leaf (including JSON documents
/// embedded as strings).
#[must_use]
pub fn contains_marker(value: &Value, marker: &str) -> bool {
    value.to_string().contains(marker) || any_string_contains(value, marker)
}

fn any_string_contains(value: &Value, marker: &str) -> bool {
    match value {
        Value::String(text) => text.contains(marker),
        Value::Array(items) => items.iter().any(|item| any_string_contains(item, marker)),
        Value::Object(map) => map.values().any(|item| any_string_contains(item, marker)),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}
