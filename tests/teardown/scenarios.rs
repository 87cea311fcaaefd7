//! BDD scenarios for teardown.

use rstest_bdd_macros::scenario;

use super::test_helpers::{TeardownContext, teardown_context};

#[scenario(
    path = "tests/features/teardown.feature",
    name = "Print manual teardown commands"
)]
fn scenario_print_manual_commands(teardown_context: TeardownContext) {
    let _ = teardown_context;
}

#[scenario(
    path = "tests/features/teardown.feature",
    name = "Delete resources automatically"
)]
fn scenario_delete_automatically(teardown_context: TeardownContext) {
    let _ = teardown_context;
}

#[scenario(
    path = "tests/features/teardown.feature",
    name = "Report failed deletions without failing"
)]
fn scenario_report_failed_deletions(teardown_context: TeardownContext) {
    let _ = teardown_context;
}
