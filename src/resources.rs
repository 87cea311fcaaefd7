//! The record of everything a run has provisioned.

use thiserror::Error;

/// Raised when a provisioning step tries to overwrite a recorded field.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("resource field '{field}' is already set to '{existing}'")]
pub struct AlreadySet {
    /// Name of the field.
    pub field: &'static str,
    /// Value recorded earlier.
    pub existing: String,
}

/// A field that may be assigned once and never changed afterwards.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WriteOnce<T> {
    value: Option<T>,
}

impl<T: ToString> WriteOnce<T> {
    /// Returns the recorded value, if any.
    #[must_use]
    pub const fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Returns `true` once a value has been recorded.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.value.is_some()
    }

    fn set(&mut self, field: &'static str, value: T) -> Result<(), AlreadySet> {
        if let Some(existing) = &self.value {
            return Err(AlreadySet {
                field,
                existing: existing.to_string(),
            });
        }
        self.value = Some(value);
        Ok(())
    }
}

macro_rules! resource_fields {
    ($($(#[$meta:meta])* $field:ident => $setter:ident),+ $(,)?) => {
        /// Identifiers and URIs for every entity provisioned during a run.
        ///
        /// Created empty and filled as each provisioning step succeeds. Every
        /// field is write-once, so no resource is renamed mid-run.
        #[derive(Clone, Debug, Default, Eq, PartialEq)]
        pub struct ResourceSet {
            $($(#[$meta])* pub $field: WriteOnce<String>,)+
            /// Whether this run created the application identity. Only
            /// created identities are deleted at teardown.
            pub identity_created: bool,
        }

        impl ResourceSet {
            $(
                #[doc = concat!("Records `", stringify!($field), "`.")]
                ///
                /// # Errors
                ///
                /// Returns [`AlreadySet`] when the field already has a value.
                pub fn $setter(&mut self, value: impl Into<String>) -> Result<(), AlreadySet> {
                    self.$field.set(stringify!($field), value.into())
                }
            )+
        }
    };
}

resource_fields! {
    /// Resource group name.
    resource_group => set_resource_group,
    /// Resource group ARM id, used as the role assignment scope.
    resource_group_id => set_resource_group_id,
    /// Virtual network name.
    vnet => set_vnet,
    /// Subnet name.
    subnet => set_subnet,
    /// Public IP resource name.
    public_ip => set_public_ip,
    /// Network security group name.
    nsg => set_nsg,
    /// Network interface name.
    nic => set_nic,
    /// Virtual machine name.
    vm => set_vm,
    /// Storage account holding the setup script.
    storage_account => set_storage_account,
    /// Blob container holding the setup script and result.
    container => set_container,
    /// Key vault ARM id.
    key_vault_id => set_key_vault_id,
    /// Key vault URI.
    key_vault_uri => set_key_vault_uri,
    /// Key encryption key id.
    kek_id => set_kek_id,
    /// Key encryption key URI (versioned `kid`).
    kek_uri => set_kek_uri,
    /// Application (client) id of the identity.
    app_id => set_app_id,
    /// Client secret of the identity.
    app_secret => set_app_secret,
}

impl ResourceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resource group name, or an empty string before it exists.
    #[must_use]
    pub fn resource_group_name(&self) -> &str {
        self.resource_group.get().map_or("", String::as_str)
    }

    /// Returns the VM name, or an empty string before it exists.
    #[must_use]
    pub fn vm_name(&self) -> &str {
        self.vm.get().map_or("", String::as_str)
    }
}
