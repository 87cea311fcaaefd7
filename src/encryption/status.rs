//! Typed view of `az vm encryption show` output.
//!
//! Fields with a stable schema (provisioning state codes, per-disk
//! encryption settings, the substatus volume document) are decoded into
//! types. Status messages are free text and are matched with the marker
//! constants below.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::poll::contains_marker;

/// Reported once the OS volume is encrypted and the VM must reboot.
pub const RESTART_PENDING_MARKER: &str = "VMRestartPending";
/// Reported when data-volume-only encryption completes.
pub const DATA_SUCCEEDED_MARKER: &str = "succeeded for data volumes";
/// Prefix of every successful completion message.
pub const ENCRYPTION_SUCCEEDED_MARKER: &str = "Encryption succeeded";
/// Volume state reported for a fully encrypted volume.
pub const ENCRYPTED_STATE: &str = "Encrypted";

/// Provisioning state decoded from a `ProvisioningState/<state>` code.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProvisioningState {
    /// The extension finished successfully.
    Succeeded,
    /// The extension reported an error.
    Failed,
    /// The extension is still running.
    Transitioning,
    /// Any code the harness does not recognise.
    Unknown(String),
}

impl ProvisioningState {
    /// Decodes a status code such as `ProvisioningState/succeeded`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let state = code.rsplit('/').next().unwrap_or(code);
        match state.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "transitioning" | "creating" | "updating" => Self::Transitioning,
            _ => Self::Unknown(code.to_owned()),
        }
    }
}

/// One entry of a `status` or `substatus` array.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    /// Machine-readable code.
    #[serde(default)]
    pub code: Option<String>,
    /// Short human readable status.
    #[serde(default)]
    pub display_status: Option<String>,
    /// Free-form message; for substatus entries this is itself JSON.
    #[serde(default)]
    pub message: Option<String>,
}

/// Encryption settings of one disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct DiskEncryptionSettings {
    /// Whether encryption is enabled; absent means not enabled.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// One disk of the encryption view. Index 0 is the OS disk.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskView {
    /// Disk name.
    #[serde(default)]
    pub name: Option<String>,
    /// Encryption settings entries; `null` for unencrypted disks.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub encryption_settings: Vec<DiskEncryptionSettings>,
}

/// Per-volume states from the substatus message, for example
/// `{"os": "Encrypted", "data": "NotMounted"}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct VolumeStates {
    /// OS volume state.
    #[serde(default)]
    pub os: Option<String>,
    /// Data volume state.
    #[serde(default)]
    pub data: Option<String>,
}

/// Decoded `az vm encryption show` document.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct EncryptionView {
    /// Disks attached to the VM.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub disks: Vec<DiskView>,
    /// Extension status entries.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: Vec<StatusEntry>,
    /// Extension substatus entries.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub substatus: Vec<StatusEntry>,
    /// Raw document, kept for marker search.
    #[serde(skip)]
    pub raw: Value,
}

/// Reads an array that `az` may print as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl EncryptionView {
    /// Decodes a view and keeps the raw document for marker search.
    ///
    /// Missing or `null` arrays decode as empty; empty command output
    /// (`null`) decodes as an empty view.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the document has an unexpected shape.
    pub fn from_value(raw: Value) -> Result<Self, serde_json::Error> {
        let mut view: Self = if raw.is_null() {
            Self::default()
        } else {
            serde_json::from_value(raw.clone())?
        };
        view.raw = raw;
        Ok(view)
    }

    /// Provisioning state of the first status entry carrying a code.
    #[must_use]
    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.status
            .iter()
            .find_map(|entry| entry.code.as_deref())
            .map(ProvisioningState::from_code)
    }

    /// Returns `true` when the extension reports a failed provisioning state.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        matches!(self.provisioning_state(), Some(ProvisioningState::Failed))
    }

    /// Volume states parsed from the first substatus message that decodes.
    #[must_use]
    pub fn volume_states(&self) -> Option<VolumeStates> {
        self.substatus
            .iter()
            .filter_map(|entry| entry.message.as_deref())
            .find_map(|message| serde_json::from_str(message).ok())
    }

    /// Returns `true` when `marker` appears anywhere in the raw document.
    #[must_use]
    pub fn mentions(&self, marker: &str) -> bool {
        contains_marker(&self.raw, marker)
    }

    /// Returns `true` while the extension waits for a reboot.
    #[must_use]
    pub fn restart_pending(&self) -> bool {
        self.mentions(RESTART_PENDING_MARKER)
    }

    /// Returns `true` once data-volume encryption has completed.
    #[must_use]
    pub fn data_succeeded(&self) -> bool {
        self.mentions(DATA_SUCCEEDED_MARKER)
    }

    /// Returns `true` once OS encryption has completed after the reboot.
    #[must_use]
    pub fn os_encrypted(&self) -> bool {
        if self.restart_pending() {
            return false;
        }
        self.volume_states()
            .and_then(|states| states.os)
            .is_some_and(|state| state == ENCRYPTED_STATE)
            || self.mentions(ENCRYPTION_SUCCEEDED_MARKER)
    }

    /// Reads `disks[index].encryptionSettings[0].enabled`, treating anything
    /// absent as `false`.
    #[must_use]
    pub fn disk_encryption_enabled(&self, index: usize) -> bool {
        self.disks
            .get(index)
            .and_then(|disk| disk.encryption_settings.first())
            .and_then(|settings| settings.enabled)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::encryption_show_json;
    use rstest::rstest;

    fn view(json: &str) -> EncryptionView {
        EncryptionView::from_value(serde_json::from_str(json).expect("valid json"))
            .expect("decodable view")
    }

    #[rstest]
    #[case("ProvisioningState/succeeded", ProvisioningState::Succeeded)]
    #[case("ProvisioningState/failed", ProvisioningState::Failed)]
    #[case("ProvisioningState/transitioning", ProvisioningState::Transitioning)]
    #[case("Odd/thing", ProvisioningState::Unknown(String::from("Odd/thing")))]
    fn provisioning_state_decodes_codes(#[case] code: &str, #[case] expected: ProvisioningState) {
        assert_eq!(ProvisioningState::from_code(code), expected);
    }

    #[rstest]
    fn restart_pending_is_found_in_status_message() {
        let decoded = view(&encryption_show_json(
            "ProvisioningState/succeeded",
            "VMRestartPending",
            Some(("VMRestartPending", "NotMounted")),
            &[Some(true)],
        ));
        assert!(decoded.restart_pending());
        assert!(!decoded.os_encrypted());
        assert!(!decoded.has_failed());
    }

    #[rstest]
    fn os_encrypted_reads_substatus_volume_state() {
        let decoded = view(&encryption_show_json(
            "ProvisioningState/succeeded",
            "Encryption completed",
            Some(("Encrypted", "NotMounted")),
            &[Some(true)],
        ));
        assert_eq!(
            decoded.volume_states(),
            Some(VolumeStates {
                os: Some(String::from("Encrypted")),
                data: Some(String::from("NotMounted")),
            })
        );
        assert!(decoded.os_encrypted());
    }

    #[rstest]
    #[case(&[Some(true), Some(true)], 1, true)]
    #[case(&[Some(true), Some(false)], 1, false)]
    #[case(&[Some(true), None], 1, false)]
    #[case(&[Some(true)], 1, false)]
    fn disk_encryption_enabled_treats_absent_as_false(
        #[case] disks: &[Option<bool>],
        #[case] index: usize,
        #[case] expected: bool,
    ) {
        let decoded = view(&encryption_show_json(
            "ProvisioningState/succeeded",
            "Encryption succeeded for data volumes",
            None,
            disks,
        ));
        assert_eq!(decoded.disk_encryption_enabled(index), expected);
    }

    #[rstest]
    fn null_arrays_from_az_keep_the_rest_of_the_view() {
        let decoded = view(
            r#"{
                "disks": [
                    {"name": "osdisk", "encryptionSettings": null, "statuses": null},
                    {"name": "datadisk", "encryptionSettings": [{"enabled": true, "diskEncryptionKey": null}]}
                ],
                "status": [
                    {"code": "ProvisioningState/failed", "displayStatus": null, "level": "Error",
                     "message": "Failed to encrypt data volumes", "time": null}
                ],
                "substatus": null
            }"#,
        );

        assert_eq!(decoded.disks.len(), 2);
        assert!(decoded.disks.first().is_some_and(|disk| disk.encryption_settings.is_empty()));
        assert!(decoded.disk_encryption_enabled(1));
        assert!(!decoded.disk_encryption_enabled(0));
        assert!(decoded.has_failed());
        assert_eq!(decoded.volume_states(), None);
    }

    #[rstest]
    fn null_status_and_disks_decode_as_empty() {
        let decoded = view(r#"{"disks": null, "status": null, "substatus": null}"#);
        assert!(decoded.disks.is_empty());
        assert_eq!(decoded.provisioning_state(), None);
    }

    #[rstest]
    fn empty_output_decodes_to_an_empty_view() {
        let decoded = EncryptionView::from_value(Value::Null).expect("null is empty output");
        assert!(decoded.disks.is_empty());
        assert!(!decoded.has_failed());
    }

    #[rstest]
    #[case(serde_json::json!("not an object"))]
    #[case(serde_json::json!({"disks": {"name": "osdisk"}}))]
    #[case(serde_json::json!({"status": [{"code": 7}]}))]
    fn unexpected_documents_are_rejected(#[case] raw: Value) {
        assert!(EncryptionView::from_value(raw).is_err());
    }
}
