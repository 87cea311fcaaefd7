//! BDD scenarios for the encryption state machine.

use rstest_bdd_macros::scenario;

use super::test_helpers::{EncryptionContext, encryption_context};

#[scenario(
    path = "tests/features/encryption.feature",
    name = "Encrypt the OS volume with a service principal"
)]
fn scenario_encrypt_os_volume(encryption_context: EncryptionContext) {
    let _ = encryption_context;
}

#[scenario(
    path = "tests/features/encryption.feature",
    name = "Reject single-pass data encryption whose disk flag is false"
)]
fn scenario_reject_false_disk_flag(encryption_context: EncryptionContext) {
    let _ = encryption_context;
}

#[scenario(
    path = "tests/features/encryption.feature",
    name = "Reset data encryption metadata in single-pass mode"
)]
fn scenario_reset_data_metadata(encryption_context: EncryptionContext) {
    let _ = encryption_context;
}

#[scenario(
    path = "tests/features/encryption.feature",
    name = "Time out when the restart marker never appears"
)]
fn scenario_restart_marker_timeout(encryption_context: EncryptionContext) {
    let _ = encryption_context;
}
