use uuid::Uuid;

use crate::chain;
use crate::error::Result;
use crate::metadata::BackupMetadata;
use crate::remote::RemoteHandler;
use crate::task_log::{TaskLogger, TaskOpts};
use crate::vhd::VhdBackend;

/// deletes one backup entry without leaving a dangling VHD chain (C10). If
/// another entry's VHD chains onto the one being deleted, that child is
/// merged with the target first — coalescing the target's data forward and
/// repointing the child at the target's own parent — before either file is
/// unlinked. Full-mode entries (no VHD chain) are removed directly.
pub async fn safe_delete(
    vhd_backend: &dyn VhdBackend,
    remote: &dyn RemoteHandler,
    task_logger: &TaskLogger,
    vm_uuid: &str,
    target: &BackupMetadata,
    parent_task: Uuid,
) -> Result<()> {
    let vm_dir = remote.vm_dir(vm_uuid);

    if let Some(vhds) = &target.vhds {
        for (vdi_id, rel) in vhds {
            let target_path = vm_dir.join(rel);
            let siblings = chain::list(&vm_dir).await?;

            let mut child_path = None;
            for candidate in &siblings {
                if candidate == &target_path {
                    continue;
                }
                if chain::parent_of(vhd_backend, &vm_dir, candidate).await?.as_deref() == Some(target_path.as_path())
                {
                    child_path = Some(candidate.clone());
                    break;
                }
            }

            if let Some(child_path) = child_path {
                task_logger
                    .wrap(
                        TaskOpts {
                            parent_id: Some(parent_task),
                            message: "merge".into(),
                            data: serde_json::json!({ "vdiUuid": vdi_id }),
                        },
                        chain::merge(vhd_backend, &target_path, &child_path),
                    )
                    .await?;
            }

            remote.delete_file(&target_path).await?;
        }
    }

    if let Some(xva) = &target.xva {
        remote.delete_file(&vm_dir.join(xva)).await?;
    }
    if let Some(filename) = &target._filename {
        remote.delete_file(&vm_dir.join(filename)).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobMode;
    use crate::remote::local::LocalRemote;
    use crate::vhd::SimpleVhdBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn merges_the_child_before_deleting_a_middle_chain_link() {
        let dir = tempdir().unwrap();
        let remote = LocalRemote::new("local-1", dir.path().to_path_buf());
        let vm_dir = remote.vm_dir("vm-1");
        remote.ensure_dir(&vm_dir).await.unwrap();

        let backend = SimpleVhdBackend::new();
        SimpleVhdBackend::write(&vm_dir.join("a.vhd"), None, b"a").await.unwrap();
        SimpleVhdBackend::write(&vm_dir.join("b.vhd"), Some("a.vhd"), b"b").await.unwrap();
        SimpleVhdBackend::write(&vm_dir.join("c.vhd"), Some("b.vhd"), b"c").await.unwrap();

        let mut vhds = std::collections::HashMap::new();
        vhds.insert("vdi-1".to_string(), "./b.vhd".to_string());
        let target = BackupMetadata {
            job_id: "job".into(),
            schedule_id: "sched".into(),
            timestamp: "2024-01-02T00:00:00Z".parse().unwrap(),
            version: crate::metadata::METADATA_VERSION.to_string(),
            vm: serde_json::json!({}),
            vm_snapshot: serde_json::json!({}),
            mode: JobMode::Delta,
            xva: None,
            vbds: None,
            vdis: None,
            vifs: None,
            vhds: Some(vhds),
            _filename: Some("b.json".into()),
        };

        let logger = TaskLogger::new(|_| {});
        safe_delete(&backend, &remote, &logger, "vm-1", &target, Uuid::new_v4())
            .await
            .unwrap();

        assert!(!vm_dir.join("b.vhd").exists());
        assert!(vm_dir.join("c.vhd").exists());
        let link = backend.read_parent_link(&vm_dir.join("c.vhd")).await.unwrap();
        assert_eq!(link.as_deref(), Some("a.vhd"));
    }
}
