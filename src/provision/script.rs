//! Data-disk setup script run on the VM by the CustomScript extension.

use std::borrow::Cow;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use shell_escape::escape;

/// Blob name of the uploaded setup script.
pub const SCRIPT_BLOB: &str = "adeval-setup.sh";

/// Blob name the script uploads once every disk is mounted.
pub const RESULT_BLOB: &str = "adeval-setup.done";

/// How long the signed URLs stay valid.
pub const SAS_VALIDITY_HOURS: i64 = 24;

/// POSIX shell script that formats every attached data disk, records its
/// UUID in `/etc/fstab`, mounts it, and uploads a result file to the signed
/// URL given as `$1`.
pub const SETUP_SCRIPT: &str = r#"#!/bin/sh
set -eu

result_url="$1"
result_file=/tmp/adeval-setup.done
count=0

for lun in /dev/disk/azure/scsi1/lun*; do
    [ -e "$lun" ] || continue
    case "$lun" in
        *-part*) continue ;;
    esac
    device=$(readlink -f "$lun")
    mkfs.ext4 -F "$device"
    uuid=$(blkid -s UUID -o value "$device")
    mount_point="/mnt/data$count"
    mkdir -p "$mount_point"
    echo "UUID=$uuid $mount_point ext4 defaults,nofail 0 2" >> /etc/fstab
    mount "$mount_point"
    count=$((count + 1))
done

echo "mounted $count data disks" > "$result_file"
curl --silent --show-error --fail -X PUT \
    -H "x-ms-blob-type: BlockBlob" \
    --data-binary "@$result_file" \
    "$result_url"
"#;

/// Formats the SAS expiry `SAS_VALIDITY_HOURS` after `now`, in the
/// `YYYY-MM-DDTHH:MMZ` form `az storage blob generate-sas` accepts.
#[must_use]
pub fn sas_expiry(now: DateTime<Utc>) -> String {
    (now + Duration::hours(SAS_VALIDITY_HOURS))
        .format("%Y-%m-%dT%H:%MZ")
        .to_string()
}

/// CustomScript extension settings that download the script and run it with
/// the result URL as its only argument.
#[must_use]
pub fn extension_settings(script_url: &str, result_url: &str) -> Value {
    let command = format!("sh {SCRIPT_BLOB} {}", escape(Cow::Borrowed(result_url)));
    json!({
        "fileUris": [script_url],
        "commandToExecute": command,
    })
}
