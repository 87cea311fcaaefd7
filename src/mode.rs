//! Run-wide strategy selections: credential strategy, disk format strategy,
//! and the encrypted volume target.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// How the encryption extension authenticates against the key vault.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CredentialMode {
    /// Application identity with a client secret (dual-pass ADE).
    #[default]
    ServicePrincipal,
    /// Single-pass ADE; no application identity is created.
    SinglePass,
}

/// How data disks are handled when encryption is enabled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DiskFormatMode {
    /// Encrypt existing data in place.
    #[default]
    Standard,
    /// Format and encrypt data disks in one step, discarding their content.
    EncryptFormatAll,
}

/// Credential and disk strategy chosen once before provisioning starts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProvisioningMode {
    /// Credential strategy.
    pub credentials: CredentialMode,
    /// Disk format strategy.
    pub disk_format: DiskFormatMode,
}

impl ProvisioningMode {
    /// Builds the mode from the `--singlepass` and `--encrypt-format-all`
    /// flags.
    #[must_use]
    pub const fn from_flags(single_pass: bool, encrypt_format_all: bool) -> Self {
        Self {
            credentials: if single_pass {
                CredentialMode::SinglePass
            } else {
                CredentialMode::ServicePrincipal
            },
            disk_format: if encrypt_format_all {
                DiskFormatMode::EncryptFormatAll
            } else {
                DiskFormatMode::Standard
            },
        }
    }

    /// Returns `true` for the service principal credential strategy.
    #[must_use]
    pub const fn uses_service_principal(self) -> bool {
        matches!(self.credentials, CredentialMode::ServicePrincipal)
    }

    /// Returns `true` when data disks are formatted during encryption.
    #[must_use]
    pub const fn formats_all(self) -> bool {
        matches!(self.disk_format, DiskFormatMode::EncryptFormatAll)
    }
}

/// Disks targeted by encryption.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum VolumeTarget {
    /// Operating system disk only.
    #[default]
    Os,
    /// Data disks only.
    Data,
    /// Operating system and data disks.
    All,
}

impl VolumeTarget {
    /// Value passed to `az vm encryption enable --volume-type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Os => "OS",
            Self::Data => "DATA",
            Self::All => "ALL",
        }
    }

    /// Returns `true` when data disks must be attached and prepared.
    #[must_use]
    pub const fn includes_data(self) -> bool {
        matches!(self, Self::Data | Self::All)
    }

    /// Returns `true` when the OS disk is encrypted, which requires a reboot.
    #[must_use]
    pub const fn includes_os(self) -> bool {
        matches!(self, Self::Os | Self::All)
    }
}

impl fmt::Display for VolumeTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when a volume type string is not `OS`, `DATA` or `ALL`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown volume type '{0}' (expected OS, DATA or ALL)")]
pub struct ParseVolumeTargetError(pub String);

impl FromStr for VolumeTarget {
    type Err = ParseVolumeTargetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OS" => Ok(Self::Os),
            "DATA" => Ok(Self::Data),
            "ALL" => Ok(Self::All),
            _ => Err(ParseVolumeTargetError(value.to_owned())),
        }
    }
}
