//! Resource name derivation.
//!
//! Every resource created by one run shares a short random prefix so a human
//! can find and bulk-delete leftovers by searching for it.

use thiserror::Error;
use uuid::Uuid;

/// Length of generated prefixes.
pub const PREFIX_LEN: usize = 6;

/// Longest prefix accepted from callers. The longest suffix (`container`)
/// plus this stays within the 24 character storage account and key vault
/// limits for every suffix applied to those resources.
pub const MAX_PREFIX_LEN: usize = 12;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHANUMERICS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Semantic suffixes appended to the run prefix.
pub mod suffix {
    /// Resource group.
    pub const RESOURCE_GROUP: &str = "rg";
    /// Virtual network.
    pub const VNET: &str = "vnet";
    /// Subnet inside the virtual network.
    pub const SUBNET: &str = "subnet";
    /// Public IP address.
    pub const PUBLIC_IP: &str = "pip";
    /// Network security group.
    pub const NSG: &str = "nsg";
    /// Network interface.
    pub const NIC: &str = "nic";
    /// Virtual machine.
    pub const VM: &str = "vm";
    /// Storage account for the data-disk setup script.
    pub const STORAGE: &str = "sa";
    /// Blob container inside the storage account.
    pub const CONTAINER: &str = "container";
    /// Key vault.
    pub const KEY_VAULT: &str = "kv";
    /// Key encryption key.
    pub const KEK: &str = "kek";
    /// Application identity.
    pub const APP: &str = "app";
}

/// Errors raised for caller-supplied prefixes.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NameError {
    /// Raised when the prefix is empty or too long.
    #[error("prefix must be 1 to {MAX_PREFIX_LEN} characters, got {0}")]
    Length(usize),
    /// Raised when the prefix does not start with a lowercase letter.
    #[error("prefix '{0}' must start with a lowercase letter")]
    LeadingCharacter(String),
    /// Raised when the prefix contains characters Azure rejects.
    #[error("prefix '{0}' must contain only lowercase letters and digits")]
    Charset(String),
}

/// Derives resource names from a single per-run prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceNameGenerator {
    prefix: String,
}

impl ResourceNameGenerator {
    /// Creates a generator with a random prefix.
    #[must_use]
    pub fn random() -> Self {
        Self {
            prefix: random_prefix(),
        }
    }

    /// Creates a generator from a caller-supplied prefix.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the prefix is empty, longer than
    /// [`MAX_PREFIX_LEN`], does not start with a lowercase letter, or
    /// contains anything other than lowercase ASCII letters and digits.
    pub fn with_prefix(prefix: impl Into<String>) -> Result<Self, NameError> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
            return Err(NameError::Length(prefix.len()));
        }
        if !prefix.starts_with(|ch: char| ch.is_ascii_lowercase()) {
            return Err(NameError::LeadingCharacter(prefix));
        }
        if !prefix
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        {
            return Err(NameError::Charset(prefix));
        }
        Ok(Self { prefix })
    }

    /// Returns the shared prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `prefix + suffix`.
    #[must_use]
    pub fn generate(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.prefix)
    }
}

fn pick(alphabet: &[u8], byte: u8) -> char {
    let len = u8::try_from(alphabet.len()).unwrap_or(u8::MAX);
    let index = usize::from(byte.rem_euclid(len));
    alphabet.get(index).copied().map_or('a', char::from)
}

fn random_prefix() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    bytes
        .iter()
        .take(PREFIX_LEN)
        .enumerate()
        .map(|(position, byte)| {
            if position == 0 {
                pick(LETTERS, *byte)
            } else {
                pick(ALPHANUMERICS, *byte)
            }
        })
        .collect()
}
