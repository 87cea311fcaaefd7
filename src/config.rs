//! Configuration loading via `ortho-config`.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::azure::DEFAULT_AZ_BIN;
use crate::provision::{
    DEFAULT_ADMIN_USERNAME, DEFAULT_DATA_VM_SIZE, DEFAULT_OS_VM_SIZE, PresuppliedIdentity,
    PresuppliedVault, ProvisionBudgets, ProvisionSettings,
};

/// Harness configuration derived from environment variables and
/// configuration files.
///
/// The `ADE_*` overrides let a run reuse an existing application identity
/// or key vault instead of creating them.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "ADE",
    discovery(
        app_name = "adeval",
        env_var = "ADE_CONFIG_PATH",
        config_file_name = "adeval.toml",
        dotfile_name = ".adeval.toml",
        project_file_name = "adeval.toml"
    )
)]
pub struct AdeConfig {
    /// Display name for a created application identity.
    pub adapp_name: Option<String>,
    /// Client secret of an existing application identity.
    pub adapp_secret: Option<String>,
    /// Application (client) id of an existing identity.
    pub adsp_appid: Option<String>,
    /// ARM id of an existing key vault.
    pub kv_id: Option<String>,
    /// URI of an existing key vault.
    pub kv_uri: Option<String>,
    /// Id of an existing key encryption key.
    pub kek_id: Option<String>,
    /// Versioned URI of an existing key encryption key.
    pub kek_uri: Option<String>,
    /// Azure CLI binary. Defaults to `az` on `PATH`.
    #[ortho_config(default = DEFAULT_AZ_BIN.to_owned())]
    pub az_bin: String,
    /// Administrator account created on the VM.
    #[ortho_config(default = DEFAULT_ADMIN_USERNAME.to_owned())]
    pub admin_username: String,
    /// VM size for OS and ALL targets.
    #[ortho_config(default = DEFAULT_OS_VM_SIZE.to_owned())]
    pub os_vm_size: String,
    /// VM size for DATA targets.
    #[ortho_config(default = DEFAULT_DATA_VM_SIZE.to_owned())]
    pub data_vm_size: String,
    /// Number of data disks attached for DATA and ALL targets.
    #[ortho_config(default = 1)]
    pub data_disk_count: u32,
    /// Size of each data disk in gigabytes.
    #[ortho_config(default = 16)]
    pub data_disk_size_gb: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to adeval.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const IDENTITY_FIELDS: [FieldMetadata; 2] = [
    FieldMetadata::new("application id", "ADE_ADSP_APPID", "adsp_appid"),
    FieldMetadata::new("client secret", "ADE_ADAPP_SECRET", "adapp_secret"),
];

const VAULT_FIELDS: [FieldMetadata; 4] = [
    FieldMetadata::new("key vault id", "ADE_KV_ID", "kv_id"),
    FieldMetadata::new("key vault uri", "ADE_KV_URI", "kv_uri"),
    FieldMetadata::new("key encryption key id", "ADE_KEK_ID", "kek_id"),
    FieldMetadata::new("key encryption key uri", "ADE_KEK_URI", "kek_uri"),
];

impl AdeConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("adeval")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::InvalidValue`] when a disk setting is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, metadata) in [
            (
                &self.az_bin,
                FieldMetadata::new("azure cli binary", "ADE_AZ_BIN", "az_bin"),
            ),
            (
                &self.admin_username,
                FieldMetadata::new("admin username", "ADE_ADMIN_USERNAME", "admin_username"),
            ),
            (
                &self.os_vm_size,
                FieldMetadata::new("OS vm size", "ADE_OS_VM_SIZE", "os_vm_size"),
            ),
            (
                &self.data_vm_size,
                FieldMetadata::new("data vm size", "ADE_DATA_VM_SIZE", "data_vm_size"),
            ),
        ] {
            if value.trim().is_empty() {
                return Err(metadata.missing());
            }
        }
        if self.data_disk_count == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "data_disk_count must be greater than zero",
            )));
        }
        if self.data_disk_size_gb == 0 {
            return Err(ConfigError::InvalidValue(String::from(
                "data_disk_size_gb must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Returns the identity to reuse, if one was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PartialOverride`] when only one of the
    /// application id and client secret is set.
    pub fn presupplied_identity(&self) -> Result<Option<PresuppliedIdentity>, ConfigError> {
        let values = [present(&self.adsp_appid), present(&self.adapp_secret)];
        Ok(all_or_nothing("identity", &values, &IDENTITY_FIELDS)?.map(|[app_id, secret]| {
            PresuppliedIdentity {
                app_id: app_id.to_owned(),
                secret: secret.to_owned(),
            }
        }))
    }

    /// Returns the key vault to reuse, if one was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PartialOverride`] when some but not all of the
    /// four vault fields are set.
    pub fn presupplied_vault(&self) -> Result<Option<PresuppliedVault>, ConfigError> {
        let values = [
            present(&self.kv_id),
            present(&self.kv_uri),
            present(&self.kek_id),
            present(&self.kek_uri),
        ];
        Ok(all_or_nothing("key vault", &values, &VAULT_FIELDS)?.map(
            |[vault_id, vault_uri, kek_id, kek_uri]| PresuppliedVault {
                vault_id: vault_id.to_owned(),
                vault_uri: vault_uri.to_owned(),
                kek_id: kek_id.to_owned(),
                kek_uri: kek_uri.to_owned(),
            },
        ))
    }

    /// Builds provisioning settings after validating every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or an override group is
    /// only partly supplied.
    pub fn provision_settings(&self) -> Result<ProvisionSettings, ConfigError> {
        self.validate()?;
        Ok(ProvisionSettings {
            admin_username: self.admin_username.clone(),
            os_vm_size: self.os_vm_size.clone(),
            data_vm_size: self.data_vm_size.clone(),
            data_disk_count: self.data_disk_count,
            data_disk_size_gb: self.data_disk_size_gb,
            app_display_name: present(&self.adapp_name).map(str::to_owned),
            identity: self.presupplied_identity()?,
            vault: self.presupplied_vault()?,
            budgets: ProvisionBudgets::default(),
        })
    }
}

impl Default for AdeConfig {
    fn default() -> Self {
        Self {
            adapp_name: None,
            adapp_secret: None,
            adsp_appid: None,
            kv_id: None,
            kv_uri: None,
            kek_id: None,
            kek_uri: None,
            az_bin: DEFAULT_AZ_BIN.to_owned(),
            admin_username: DEFAULT_ADMIN_USERNAME.to_owned(),
            os_vm_size: DEFAULT_OS_VM_SIZE.to_owned(),
            data_vm_size: DEFAULT_DATA_VM_SIZE.to_owned(),
            data_disk_count: 1,
            data_disk_size_gb: 16,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|text| !text.is_empty())
}

fn all_or_nothing<'v, const N: usize>(
    group: &'static str,
    values: &[Option<&'v str>; N],
    fields: &[FieldMetadata; N],
) -> Result<Option<[&'v str; N]>, ConfigError> {
    let supplied = values.iter().filter(|value| value.is_some()).count();
    if supplied == 0 {
        return Ok(None);
    }
    if supplied < N {
        let missing = values
            .iter()
            .zip(fields)
            .filter(|(value, _)| value.is_none())
            .map(|(_, field)| field.env_var)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ConfigError::PartialOverride { group, missing });
    }
    Ok(Some(values.map(|value| value.unwrap_or_default())))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value the harness cannot use.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Indicates an override group was only partly supplied.
    #[error("partial {group} override: also set {missing}, or unset the others")]
    PartialOverride {
        /// Override group (`identity` or `key vault`).
        group: &'static str,
        /// Environment variables still missing.
        missing: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
