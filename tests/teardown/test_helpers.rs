//! Shared fixtures for teardown BDD scenarios.

use adeval::ResourceSet;
use adeval::teardown::TeardownReport;
use adeval::test_support::RoutedRunner;
use rstest::fixture;

pub const GROUP_DELETE: &str = "group delete";
pub const APP_DELETE: &str = "ad app delete";

#[derive(Clone, Debug)]
pub struct TeardownOutcome {
    pub report: TeardownReport,
    pub output: String,
}

#[derive(Clone, Debug)]
pub struct TeardownContext {
    pub runner: RoutedRunner,
    pub resources: ResourceSet,
    pub outcome: Option<TeardownOutcome>,
}

#[fixture]
pub fn teardown_context() -> TeardownContext {
    let runner = RoutedRunner::new();
    runner.respond(GROUP_DELETE, "");
    runner.respond(APP_DELETE, "");
    TeardownContext {
        runner,
        resources: ResourceSet::new(),
        outcome: None,
    }
}
