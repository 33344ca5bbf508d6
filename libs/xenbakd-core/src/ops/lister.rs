use crate::error::Result;
use crate::metadata::{self, BackupMetadata};
use crate::remote::RemoteHandler;

/// all backups for a VM on one remote, oldest first
pub async fn list_backups(remote: &dyn RemoteHandler, vm_uuid: &str) -> Result<Vec<BackupMetadata>> {
    let mut entries = remote.list_metadata(vm_uuid).await?;
    metadata::sort_by_timestamp(&mut entries);
    Ok(entries)
}

/// all backups across every configured remote, grouped by remote id
pub async fn list_backups_everywhere(
    remotes: &[std::sync::Arc<dyn RemoteHandler>],
    vm_uuid: &str,
) -> Result<Vec<(String, Vec<BackupMetadata>)>> {
    let mut grouped = vec![];
    for remote in remotes {
        grouped.push((remote.id().to_string(), list_backups(remote.as_ref(), vm_uuid).await?));
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobMode;
    use crate::remote::local::LocalRemote;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_backups_sorted_ascending_by_timestamp() {
        let dir = tempdir().unwrap();
        let remote = LocalRemote::new("local-1", dir.path().to_path_buf());
        let vm_dir = remote.vm_dir("vm-1");
        remote.ensure_dir(&vm_dir).await.unwrap();

        for (ts, name) in [("2024-01-02T00:00:00Z", "b"), ("2024-01-01T00:00:00Z", "a")] {
            let metadata = BackupMetadata {
                job_id: "job".into(),
                schedule_id: "sched".into(),
                timestamp: ts.parse().unwrap(),
                version: crate::metadata::METADATA_VERSION.to_string(),
                vm: serde_json::json!({}),
                vm_snapshot: serde_json::json!({}),
                mode: JobMode::Full,
                xva: Some(format!("./{name}.xva")),
                vbds: None,
                vdis: None,
                vifs: None,
                vhds: None,
                _filename: None,
            };
            remote
                .write_metadata(&vm_dir.join(format!("{name}.json")), &metadata)
                .await
                .unwrap();
        }

        let listed = list_backups(&remote, "vm-1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].timestamp < listed[1].timestamp);
    }
}
