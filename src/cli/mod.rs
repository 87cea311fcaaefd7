//! Command-line interface definitions for the `adeval` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `adeval` binary.
#[derive(Debug, Parser)]
#[command(
    name = "adeval",
    version,
    about = "Validate Azure Disk Encryption end to end on a fresh VM",
    long_about = concat!(
        "Provision a resource group, identity, key vault, network and VM, ",
        "enable Azure Disk Encryption, wait for it to finish, and tear ",
        "everything down. Existing identities and key vaults can be reused ",
        "through the ADE_ADSP_APPID, ADE_ADAPP_SECRET, ADE_KV_ID, ADE_KV_URI, ",
        "ADE_KEK_ID and ADE_KEK_URI environment variables."
    ),
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Image reference passed to `az vm create` (URN, alias or image id).
    #[arg(value_name = "IMAGE")]
    pub(crate) image: String,
    /// Azure region to create resources in.
    #[arg(value_name = "LOCATION")]
    pub(crate) location: String,
    /// Volumes to encrypt: OS, DATA or ALL (case-insensitive).
    #[arg(value_name = "VOLUMETYPE", default_value = "OS")]
    pub(crate) volume_type: String,
    /// Use single-pass encryption; no application identity is created.
    #[arg(long)]
    pub(crate) singlepass: bool,
    /// Format data disks while encrypting them.
    #[arg(long)]
    pub(crate) encrypt_format_all: bool,
    /// Refresh the RHUI client on the VM before encryption.
    #[arg(long)]
    pub(crate) rhui: bool,
    /// Prefix for every resource name instead of a random one.
    #[arg(long, value_name = "PREFIX")]
    pub(crate) prefix: Option<String>,
    /// Keep resources and print the commands that delete them.
    #[arg(long)]
    pub(crate) keep_resources: bool,
}
