use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::JobMode;

pub const METADATA_VERSION: &str = "2.0.0";

/// sidecar JSON describing one stored backup (§3). Deserialization tolerates
/// unknown top-level keys for forward compatibility (no `deny_unknown_fields`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub job_id: String,
    pub schedule_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
    /// opaque VM record at snapshot time — the core only reads a handful of
    /// fields out of this, see §9
    pub vm: serde_json::Value,
    pub vm_snapshot: serde_json::Value,
    pub mode: JobMode,

    /// full mode: relative path to the `.xva` export
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xva: Option<String>,

    /// delta mode: opaque per-device records and the VDI-id -> relative-VHD-path map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vbds: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vdis: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vifs: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhds: Option<HashMap<String, String>>,

    /// the sidecar's own filename, not serialized — stamped on after listing
    #[serde(skip)]
    pub _filename: Option<String>,
}

fn default_version() -> String {
    METADATA_VERSION.to_string()
}

impl BackupMetadata {
    /// resolves a sidecar-relative payload path against the sidecar's own location
    pub fn resolve(sidecar_path: &Path, relative: &str) -> PathBuf {
        sidecar_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(relative)
    }

    pub fn xva_path(&self, sidecar_path: &Path) -> Option<PathBuf> {
        self.xva.as_deref().map(|rel| Self::resolve(sidecar_path, rel))
    }

    pub fn vhd_paths(&self, sidecar_path: &Path) -> HashMap<String, PathBuf> {
        self.vhds
            .iter()
            .flatten()
            .map(|(vdi_id, rel)| (vdi_id.clone(), Self::resolve(sidecar_path, rel)))
            .collect()
    }

    pub fn vm_field(&self, key: &str) -> Option<&str> {
        self.vm.get(key).and_then(|v| v.as_str())
    }
}

/// sorts sidecars ascending by timestamp — the ordering C4's retention selector assumes
pub fn sort_by_timestamp(entries: &mut [BackupMetadata]) {
    entries.sort_by_key(|e| e.timestamp);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_full_mode_tolerating_unknown_keys() {
        let json = serde_json::json!({
            "jobId": "job-1",
            "scheduleId": "sched-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "version": "2.0.0",
            "vm": {"uuid": "vm-uuid"},
            "vmSnapshot": {"uuid": "snap-uuid"},
            "mode": "full",
            "xva": "./20240101T000000Z.xva",
            "futureField": "ignored",
        });
        let metadata: BackupMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(metadata.job_id, "job-1");
        assert_eq!(metadata.xva.as_deref(), Some("./20240101T000000Z.xva"));
        assert_eq!(metadata.vm_field("uuid"), Some("vm-uuid"));
    }

    #[test]
    fn resolves_relative_payload_paths_against_sidecar_location() {
        let sidecar = Path::new("/remote/xo-vm-backups/vm-1/20240101T000000Z.json");
        let resolved = BackupMetadata::resolve(sidecar, "./20240101T000000Z.xva");
        assert_eq!(
            resolved,
            PathBuf::from("/remote/xo-vm-backups/vm-1/./20240101T000000Z.xva")
        );
    }

    #[test]
    fn sorts_ascending_by_timestamp() {
        let mk = |ts: &str| BackupMetadata {
            job_id: "j".into(),
            schedule_id: "s".into(),
            timestamp: ts.parse().unwrap(),
            version: METADATA_VERSION.to_string(),
            vm: serde_json::json!({}),
            vm_snapshot: serde_json::json!({}),
            mode: JobMode::Full,
            xva: None,
            vbds: None,
            vdis: None,
            vifs: None,
            vhds: None,
            _filename: None,
        };
        let mut entries = vec![mk("2024-01-03T00:00:00Z"), mk("2024-01-01T00:00:00Z"), mk("2024-01-02T00:00:00Z")];
        sort_by_timestamp(&mut entries);
        assert_eq!(entries[0].timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(entries[2].timestamp.to_rfc3339(), "2024-01-03T00:00:00+00:00");
    }
}
