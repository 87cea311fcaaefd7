//! Shared fixtures for provisioning BDD scenarios.

use adeval::provision::{PresuppliedIdentity, PresuppliedVault};
use adeval::test_support::{RoutedRunner, script_provisioning_happy_path};
use adeval::{ProvisionSettings, ResourceSet};
use rstest::fixture;

#[derive(Clone, Debug)]
pub struct ProvisioningOutcome {
    pub resources: ResourceSet,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ProvisioningContext {
    pub runner: RoutedRunner,
    pub settings: ProvisionSettings,
    pub outcome: Option<ProvisioningOutcome>,
}

#[fixture]
pub fn provisioning_context() -> ProvisioningContext {
    let runner = RoutedRunner::new();
    script_provisioning_happy_path(&runner);
    ProvisioningContext {
        runner,
        settings: ProvisionSettings::default(),
        outcome: None,
    }
}

pub fn supplied_identity() -> PresuppliedIdentity {
    PresuppliedIdentity {
        app_id: String::from("byo-app"),
        secret: String::from("byo-secret"),
    }
}

pub fn supplied_vault() -> PresuppliedVault {
    PresuppliedVault {
        vault_id: String::from("/subscriptions/s/vaults/byokv"),
        vault_uri: String::from("https://byokv.vault.azure.net/"),
        kek_id: String::from("/subscriptions/s/vaults/byokv/keys/byokek"),
        kek_uri: String::from("https://byokv.vault.azure.net/keys/byokek/1"),
    }
}
