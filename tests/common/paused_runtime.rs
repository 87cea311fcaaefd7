//! Tokio runtime with paused time for scenarios that wait through long
//! poll budgets.

use tokio::runtime::{Builder, Runtime};

/// Builds a current-thread runtime whose clock auto-advances while idle.
pub fn paused_runtime() -> std::io::Result<Runtime> {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
}
