//! Creates, in dependency order, everything encryption needs.
//!
//! The pipeline is strictly sequential: resource group, identity, key vault
//! and key encryption key, network, VM, then the optional data-disk setup
//! and RHUI refresh. A failing step aborts the pipeline; whatever was
//! recorded in the [`ResourceSet`] up to that point is left for teardown.

mod error;
pub mod script;

use std::ffi::OsString;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::azure::{AzureCli, az_args, string_at};
use crate::command::{CommandError, CommandRunner};
use crate::mode::{ProvisioningMode, VolumeTarget};
use crate::naming::{ResourceNameGenerator, suffix};
use crate::poll::{Cancellation, PollFailure, PollLoop, PollOutcome, PollSpec};
use crate::resources::ResourceSet;

pub use error::ProvisionError;

/// Role granted to a created identity on the resource group.
pub const ROLE: &str = "Reader";

/// Default VM size for OS and ALL targets.
pub const DEFAULT_OS_VM_SIZE: &str = "Standard_D2s_v3";

/// Default VM size for DATA targets.
pub const DEFAULT_DATA_VM_SIZE: &str = "Standard_D4s_v3";

/// Default administrator account on the VM.
pub const DEFAULT_ADMIN_USERNAME: &str = "azureuser";

/// Command run on the VM when `--rhui` is set.
pub const RHUI_REFRESH_SCRIPT: &str =
    "yum update -y --disablerepo='*' --enablerepo='*microsoft*'";

/// An application identity supplied by the caller instead of created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresuppliedIdentity {
    /// Application (client) id.
    pub app_id: String,
    /// Client secret.
    pub secret: String,
}

/// A key vault and key encryption key supplied by the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresuppliedVault {
    /// Key vault ARM id.
    pub vault_id: String,
    /// Key vault URI.
    pub vault_uri: String,
    /// Key encryption key id.
    pub kek_id: String,
    /// Key encryption key URI.
    pub kek_uri: String,
}

/// Wait budgets used while provisioning.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionBudgets {
    /// Wait for a new service principal to become visible.
    pub ad_visibility: PollSpec,
    /// Retry the role assignment until the directory accepts it.
    pub role_assignment: PollSpec,
    /// Wait for the setup script's result blob.
    pub setup_script: PollSpec,
}

impl Default for ProvisionBudgets {
    fn default() -> Self {
        let fifteen_seconds = Duration::from_secs(15);
        Self {
            ad_visibility: PollSpec::new("service principal visibility", fifteen_seconds, 8)
                .tolerating_probe_errors(),
            role_assignment: PollSpec::new("role assignment", fifteen_seconds, 8)
                .tolerating_probe_errors(),
            setup_script: PollSpec::new("data disk setup script", Duration::from_secs(60), 10)
                .tolerating_probe_errors(),
        }
    }
}

/// Tunables that do not change between runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionSettings {
    /// Administrator account created on the VM.
    pub admin_username: String,
    /// VM size for OS and ALL targets.
    pub os_vm_size: String,
    /// VM size for DATA targets.
    pub data_vm_size: String,
    /// Number of data disks attached for DATA and ALL targets.
    pub data_disk_count: u32,
    /// Size of each data disk in gigabytes.
    pub data_disk_size_gb: u32,
    /// Display name for a created application; defaults to `<prefix>app`.
    pub app_display_name: Option<String>,
    /// Identity to reuse instead of creating one.
    pub identity: Option<PresuppliedIdentity>,
    /// Vault and key to reuse instead of creating them.
    pub vault: Option<PresuppliedVault>,
    /// Wait budgets.
    pub budgets: ProvisionBudgets,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            admin_username: DEFAULT_ADMIN_USERNAME.to_owned(),
            os_vm_size: DEFAULT_OS_VM_SIZE.to_owned(),
            data_vm_size: DEFAULT_DATA_VM_SIZE.to_owned(),
            data_disk_count: 1,
            data_disk_size_gb: 16,
            app_display_name: None,
            identity: None,
            vault: None,
            budgets: ProvisionBudgets::default(),
        }
    }
}

/// What to provision for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Opaque image reference passed to `az vm create`.
    pub image: String,
    /// Azure region.
    pub location: String,
    /// Disks that will be encrypted.
    pub target: VolumeTarget,
    /// Credential and disk strategy.
    pub mode: ProvisioningMode,
    /// Refresh the RHUI client before encryption.
    pub rhui: bool,
}

/// Sequences resource creation for one run.
#[derive(Debug)]
pub struct ProvisioningPipeline<'a, R: CommandRunner> {
    cli: &'a AzureCli<R>,
    names: &'a ResourceNameGenerator,
    settings: &'a ProvisionSettings,
    cancellation: Cancellation,
}

impl<'a, R: CommandRunner> ProvisioningPipeline<'a, R> {
    /// Creates a pipeline.
    #[must_use]
    pub const fn new(
        cli: &'a AzureCli<R>,
        names: &'a ResourceNameGenerator,
        settings: &'a ProvisionSettings,
    ) -> Self {
        Self {
            cli,
            names,
            settings,
            cancellation: Cancellation::never(),
        }
    }

    /// Attaches an external cancellation signal to every wait.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Runs every step for `request`, recording results into `resources`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a command fails, its output lacks a
    /// required field, a wait times out or is cancelled, or a step tries to
    /// overwrite a recorded resource.
    pub async fn run(
        &self,
        request: &ProvisionRequest,
        resources: &mut ResourceSet,
    ) -> Result<(), ProvisionError> {
        self.create_resource_group(request, resources)?;
        if request.mode.uses_service_principal() {
            self.ensure_identity(resources).await?;
        }
        self.ensure_vault(request, resources)?;
        self.create_network(request, resources)?;
        self.create_vm(request, resources)?;
        if request.target.includes_data() {
            self.prepare_data_disks(request, resources).await?;
        }
        if request.rhui {
            self.refresh_rhui(resources)?;
        }
        Ok(())
    }

    fn create_resource_group(
        &self,
        request: &ProvisionRequest,
        resources: &mut ResourceSet,
    ) -> Result<(), ProvisionError> {
        let name = self.names.generate(suffix::RESOURCE_GROUP);
        info!(resource_group = %name, location = %request.location, "creating resource group");
        let output = self.step(
            "resource group",
            &["group", "create", "--name", &name, "--location", &request.location],
        )?;
        resources.set_resource_group(name)?;
        resources.set_resource_group_id(required(&output, "/id", "resource group")?)?;
        Ok(())
    }

    async fn ensure_identity(&self, resources: &mut ResourceSet) -> Result<(), ProvisionError> {
        if let Some(identity) = &self.settings.identity {
            info!(app_id = %identity.app_id, "reusing supplied application identity");
            resources.set_app_id(identity.app_id.clone())?;
            resources.set_app_secret(identity.secret.clone())?;
            return Ok(());
        }

        let display_name = self
            .settings
            .app_display_name
            .clone()
            .unwrap_or_else(|| self.names.generate(suffix::APP));
        info!(display_name = %display_name, "creating application identity");
        let app = self.step(
            "application",
            &["ad", "app", "create", "--display-name", &display_name],
        )?;
        let app_id = required(&app, "/appId", "application")?;
        resources.set_app_id(app_id.clone())?;
        resources.identity_created = true;

        self.step("service principal", &["ad", "sp", "create", "--id", &app_id])?;
        let credential = self.step(
            "client secret",
            &["ad", "app", "credential", "reset", "--id", &app_id],
        )?;
        resources.set_app_secret(required(&credential, "/password", "client secret")?)?;

        let visibility = az_args(&["ad", "sp", "show", "--id", &app_id]);
        self.wait(
            self.settings.budgets.ad_visibility.clone(),
            || self.cli.invoke(&visibility),
            |value| !value.is_null(),
        )
        .await?;

        let scope = resources.resource_group_id.get().cloned().unwrap_or_default();
        let assignment = az_args(&[
            "role",
            "assignment",
            "create",
            "--assignee",
            &app_id,
            "--role",
            ROLE,
            "--scope",
            &scope,
        ]);
        self.wait(
            self.settings.budgets.role_assignment.clone(),
            || self.cli.invoke(&assignment),
            |_| true,
        )
        .await
    }

    fn ensure_vault(
        &self,
        request: &ProvisionRequest,
        resources: &mut ResourceSet,
    ) -> Result<(), ProvisionError> {
        if let Some(vault) = &self.settings.vault {
            info!(vault_id = %vault.vault_id, "reusing supplied key vault");
            resources.set_key_vault_id(vault.vault_id.clone())?;
            resources.set_key_vault_uri(vault.vault_uri.clone())?;
            resources.set_kek_id(vault.kek_id.clone())?;
            resources.set_kek_uri(vault.kek_uri.clone())?;
            return Ok(());
        }

        let vault_name = self.names.generate(suffix::KEY_VAULT);
        let resource_group = resources.resource_group_name().to_owned();
        info!(key_vault = %vault_name, "creating key vault");
        let vault = self.step(
            "key vault",
            &[
                "keyvault",
                "create",
                "--name",
                &vault_name,
                "--resource-group",
                &resource_group,
                "--location",
                &request.location,
                "--enabled-for-disk-encryption",
                "true",
            ],
        )?;
        let vault_id = required(&vault, "/id", "key vault")?;
        resources.set_key_vault_id(vault_id.clone())?;
        resources.set_key_vault_uri(required(&vault, "/properties/vaultUri", "key vault")?)?;

        if let Some(app_id) = resources.app_id.get().cloned() {
            self.step(
                "key vault policy",
                &[
                    "keyvault",
                    "set-policy",
                    "--name",
                    &vault_name,
                    "--spn",
                    &app_id,
                    "--key-permissions",
                    "wrapKey",
                    "--secret-permissions",
                    "set",
                ],
            )?;
        }

        let kek_name = self.names.generate(suffix::KEK);
        let key = self.step(
            "key encryption key",
            &[
                "keyvault",
                "key",
                "create",
                "--vault-name",
                &vault_name,
                "--name",
                &kek_name,
                "--protection",
                "software",
            ],
        )?;
        resources.set_kek_id(format!("{vault_id}/keys/{kek_name}"))?;
        resources.set_kek_uri(required(&key, "/key/kid", "key encryption key")?)?;
        Ok(())
    }

    fn create_network(
        &self,
        request: &ProvisionRequest,
        resources: &mut ResourceSet,
    ) -> Result<(), ProvisionError> {
        let resource_group = resources.resource_group_name().to_owned();
        let vnet = self.names.generate(suffix::VNET);
        let subnet = self.names.generate(suffix::SUBNET);
        let public_ip = self.names.generate(suffix::PUBLIC_IP);
        let nsg = self.names.generate(suffix::NSG);
        let nic = self.names.generate(suffix::NIC);
        info!(vnet = %vnet, "creating network");

        self.step(
            "virtual network",
            &[
                "network",
                "vnet",
                "create",
                "--resource-group",
                &resource_group,
                "--location",
                &request.location,
                "--name",
                &vnet,
                "--subnet-name",
                &subnet,
            ],
        )?;
        resources.set_vnet(vnet.clone())?;
        resources.set_subnet(subnet.clone())?;

        self.step(
            "public ip",
            &[
                "network",
                "public-ip",
                "create",
                "--resource-group",
                &resource_group,
                "--location",
                &request.location,
                "--name",
                &public_ip,
            ],
        )?;
        resources.set_public_ip(public_ip.clone())?;

        self.step(
            "network security group",
            &[
                "network",
                "nsg",
                "create",
                "--resource-group",
                &resource_group,
                "--location",
                &request.location,
                "--name",
                &nsg,
            ],
        )?;
        resources.set_nsg(nsg.clone())?;

        self.step(
            "network interface",
            &[
                "network",
                "nic",
                "create",
                "--resource-group",
                &resource_group,
                "--location",
                &request.location,
                "--name",
                &nic,
                "--vnet-name",
                &vnet,
                "--subnet",
                &subnet,
                "--public-ip-address",
                &public_ip,
                "--network-security-group",
                &nsg,
            ],
        )?;
        resources.set_nic(nic)?;
        Ok(())
    }

    fn create_vm(
        &self,
        request: &ProvisionRequest,
        resources: &mut ResourceSet,
    ) -> Result<(), ProvisionError> {
        let resource_group = resources.resource_group_name().to_owned();
        let nic = resources.nic.get().cloned().unwrap_or_default();
        let vm = self.names.generate(suffix::VM);
        let size = if request.target.includes_os() {
            &self.settings.os_vm_size
        } else {
            &self.settings.data_vm_size
        };
        info!(vm = %vm, image = %request.image, size = %size, "creating vm");

        let mut args = az_args(&[
            "vm",
            "create",
            "--resource-group",
            &resource_group,
            "--location",
            &request.location,
            "--name",
            &vm,
            "--image",
            &request.image,
            "--nics",
            &nic,
            "--size",
            size,
            "--admin-username",
            &self.settings.admin_username,
            "--generate-ssh-keys",
        ]);
        if request.target.includes_data() && self.settings.data_disk_count > 0 {
            args.push(OsString::from("--data-disk-sizes-gb"));
            let disk_size = self.settings.data_disk_size_gb.to_string();
            args.extend((0..self.settings.data_disk_count).map(|_| OsString::from(&disk_size)));
        }
        self.invoke("vm", &args)?;
        resources.set_vm(vm)?;
        Ok(())
    }

    async fn prepare_data_disks(
        &self,
        request: &ProvisionRequest,
        resources: &mut ResourceSet,
    ) -> Result<(), ProvisionError> {
        let resource_group = resources.resource_group_name().to_owned();
        let vm = resources.vm_name().to_owned();
        let account = self.names.generate(suffix::STORAGE);
        let container = self.names.generate(suffix::CONTAINER);
        info!(storage_account = %account, "preparing data disk setup");

        self.step(
            "storage account",
            &[
                "storage",
                "account",
                "create",
                "--name",
                &account,
                "--resource-group",
                &resource_group,
                "--location",
                &request.location,
                "--sku",
                "Standard_LRS",
            ],
        )?;
        resources.set_storage_account(account.clone())?;

        let keys = self.step(
            "storage account key",
            &[
                "storage",
                "account",
                "keys",
                "list",
                "--account-name",
                &account,
                "--resource-group",
                &resource_group,
            ],
        )?;
        let key = required(&keys, "/0/value", "storage account key")?;
        let blob = BlobLocation {
            account: &account,
            key: &key,
            container: &container,
        };

        self.invoke(
            "storage container",
            &blob.args(&["storage", "container", "create", "--name", &container]),
        )?;
        resources.set_container(container.clone())?;

        self.invoke(
            "setup script upload",
            &blob.blob_args(
                &["storage", "blob", "upload", "--overwrite", "--data", script::SETUP_SCRIPT],
                script::SCRIPT_BLOB,
            ),
        )?;

        let expiry = script::sas_expiry(Utc::now());
        let script_url = self.signed_url(&blob, script::SCRIPT_BLOB, "r", &expiry)?;
        let result_url = self.signed_url(&blob, script::RESULT_BLOB, "cw", &expiry)?;

        let settings = script::extension_settings(&script_url, &result_url).to_string();
        self.step(
            "custom script extension",
            &[
                "vm",
                "extension",
                "set",
                "--resource-group",
                &resource_group,
                "--vm-name",
                &vm,
                "--name",
                "CustomScript",
                "--publisher",
                "Microsoft.Azure.Extensions",
                "--settings",
                &settings,
            ],
        )?;

        let exists = blob.blob_args(&["storage", "blob", "exists"], script::RESULT_BLOB);
        self.wait(
            self.settings.budgets.setup_script.clone(),
            || self.cli.invoke(&exists),
            |value| value.pointer("/exists").and_then(Value::as_bool) == Some(true),
        )
        .await
    }

    fn signed_url(
        &self,
        blob: &BlobLocation<'_>,
        name: &str,
        permissions: &str,
        expiry: &str,
    ) -> Result<String, ProvisionError> {
        let args = blob.blob_args(
            &[
                "storage",
                "blob",
                "generate-sas",
                "--permissions",
                permissions,
                "--expiry",
                expiry,
                "--full-uri",
            ],
            name,
        );
        let output = self.invoke("signed url", &args)?;
        output
            .as_str()
            .map(str::to_owned)
            .ok_or(ProvisionError::MissingField {
                step: "signed url",
                pointer: "",
            })
    }

    fn refresh_rhui(&self, resources: &ResourceSet) -> Result<(), ProvisionError> {
        info!(vm = resources.vm_name(), "refreshing rhui client");
        self.step(
            "rhui refresh",
            &[
                "vm",
                "run-command",
                "invoke",
                "--resource-group",
                resources.resource_group_name(),
                "--name",
                resources.vm_name(),
                "--command-id",
                "RunShellScript",
                "--scripts",
                RHUI_REFRESH_SCRIPT,
            ],
        )?;
        Ok(())
    }

    async fn wait<P, S>(&self, spec: PollSpec, probe: P, success: S) -> Result<(), ProvisionError>
    where
        P: FnMut() -> Result<Value, CommandError>,
        S: Fn(&Value) -> bool,
    {
        let label = spec.label.clone();
        let outcome = PollLoop::new(spec)
            .with_cancellation(self.cancellation.clone())
            .run(probe, success)
            .await;
        match outcome {
            PollOutcome::Succeeded(_) => Ok(()),
            PollOutcome::TimedOut { cycles } => Err(ProvisionError::TimedOut { label, cycles }),
            PollOutcome::Failed(PollFailure::Cancelled { .. }) => {
                Err(ProvisionError::Cancelled { label })
            }
            PollOutcome::Failed(PollFailure::Probe { cycle, source }) => {
                Err(ProvisionError::Wait {
                    label,
                    cycle,
                    source,
                })
            }
            PollOutcome::Failed(PollFailure::Rejected { cycle, .. }) => {
                Err(ProvisionError::Rejected { label, cycle })
            }
        }
    }

    fn step(&self, step: &'static str, args: &[&str]) -> Result<Value, ProvisionError> {
        self.invoke(step, &az_args(args))
    }

    fn invoke(&self, step: &'static str, args: &[OsString]) -> Result<Value, ProvisionError> {
        self.cli
            .invoke(args)
            .map_err(|source| ProvisionError::Command { step, source })
    }
}

struct BlobLocation<'b> {
    account: &'b str,
    key: &'b str,
    container: &'b str,
}

impl BlobLocation<'_> {
    fn args(&self, command: &[&str]) -> Vec<OsString> {
        let mut args = az_args(command);
        for (flag, value) in [("--account-name", self.account), ("--account-key", self.key)] {
            args.push(OsString::from(flag));
            args.push(OsString::from(value));
        }
        args
    }

    fn blob_args(&self, command: &[&str], name: &str) -> Vec<OsString> {
        let mut args = self.args(command);
        for (flag, value) in [("--container-name", self.container), ("--name", name)] {
            args.push(OsString::from(flag));
            args.push(OsString::from(value));
        }
        args
    }
}

fn required(value: &Value, pointer: &'static str, step: &'static str) -> Result<String, ProvisionError> {
    string_at(value, pointer)
        .map(str::to_owned)
        .ok_or(ProvisionError::MissingField { step, pointer })
}
