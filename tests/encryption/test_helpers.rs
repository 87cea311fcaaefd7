//! Shared fixtures for encryption BDD scenarios.

use adeval::resources::AlreadySet;
use adeval::test_support::{RoutedRunner, encryption_show_json};
use adeval::{EncryptionState, ProvisioningMode, ResourceSet};
use rstest::fixture;

pub const SHOW: &str = "vm encryption show";
const SUCCEEDED: &str = "ProvisioningState/succeeded";
const TRANSITIONING: &str = "ProvisioningState/transitioning";

#[derive(Clone, Debug)]
pub struct EncryptionOutcome {
    pub states: Vec<EncryptionState>,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct EncryptionContext {
    pub runner: RoutedRunner,
    pub resources: ResourceSet,
    pub mode: ProvisioningMode,
    pub outcome: Option<EncryptionOutcome>,
}

#[fixture]
pub fn encryption_context() -> EncryptionContext {
    let runner = RoutedRunner::new();
    runner.respond("vm encryption enable", "{}");
    runner.respond("vm encryption disable", "{}");
    runner.respond("vm restart", "");
    EncryptionContext {
        runner,
        resources: ResourceSet::new(),
        mode: ProvisioningMode::default(),
        outcome: None,
    }
}

/// Resources a successful provisioning run leaves behind.
pub fn provisioned_resources(with_identity: bool) -> ResourceSet {
    record_resources(with_identity)
        .unwrap_or_else(|err| panic!("fresh resource set rejected a field: {err}"))
}

fn record_resources(with_identity: bool) -> Result<ResourceSet, AlreadySet> {
    let mut set = ResourceSet::new();
    set.set_resource_group("bddrg")?;
    set.set_vm("bddvm")?;
    set.set_key_vault_id("/subscriptions/s/vaults/bddkv")?;
    set.set_key_vault_uri("https://bddkv.vault.azure.net/")?;
    set.set_kek_uri("https://bddkv.vault.azure.net/keys/bddkek/1")?;
    if with_identity {
        set.set_app_id("app-123")?;
        set.set_app_secret("secret-xyz")?;
    }
    Ok(set)
}

pub fn in_progress() -> String {
    encryption_show_json(TRANSITIONING, "EncryptionInProgress", None, &[None])
}

pub fn restart_pending() -> String {
    encryption_show_json(
        SUCCEEDED,
        "VMRestartPending",
        Some(("VMRestartPending", "NotMounted")),
        &[Some(true)],
    )
}

pub fn os_encrypted() -> String {
    encryption_show_json(
        SUCCEEDED,
        "Encryption succeeded for OS volume",
        Some(("Encrypted", "NotMounted")),
        &[Some(true)],
    )
}

pub fn data_succeeded(data_flag: bool) -> String {
    encryption_show_json(
        SUCCEEDED,
        "Encryption succeeded for data volumes",
        Some(("NotEncrypted", "Encrypted")),
        &[None, Some(data_flag)],
    )
}

pub fn data_disabled() -> String {
    encryption_show_json(
        SUCCEEDED,
        "Disable succeeded for data volumes",
        Some(("NotEncrypted", "NotEncrypted")),
        &[None, Some(false)],
    )
}
