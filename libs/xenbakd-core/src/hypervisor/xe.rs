use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use xapi_cli_client::{ObjectKind, SnapshotType, VBD, VDI, VIF, VM, XApiCliClient, XenConfig};

use crate::error::{BackupError, Result};
use crate::model::VmPattern;

use super::{ExportStream, HypervisorClient, ImportHandle, ReplicationRole};

const TAG_JOB: &str = "xo:backup:job";
const TAG_SCHEDULE: &str = "xo:backup:schedule";
const TAG_VM: &str = "xo:backup:vm";
const TAG_SR: &str = "xo:backup:sr";

/// `xe`-CLI-backed `HypervisorClient` — one per connected pool (A4)
pub struct XeHypervisor {
    client: XApiCliClient,
}

impl XeHypervisor {
    pub fn new(config: XenConfig) -> Self {
        XeHypervisor {
            client: XApiCliClient::new(config),
        }
    }
}

#[async_trait]
impl HypervisorClient for XeHypervisor {
    async fn filter_vms(&self, pattern: &VmPattern) -> Result<Vec<VM>> {
        Ok(self
            .client
            .filter_vms_by_tag(pattern.tag_filter.clone(), pattern.tag_filter_exclude.clone())
            .await?)
    }

    async fn snapshot(&self, vm: &VM, label: &str) -> Result<VM> {
        Ok(self.client.snapshot(&vm.uuid, label, SnapshotType::Normal).await?)
    }

    async fn set_snapshot_not_template(&self, snapshot_uuid: &str) -> Result<()> {
        Ok(self.client.set_snapshot_param_not_template(snapshot_uuid).await?)
    }

    async fn set_snapshot_name(&self, snapshot_uuid: &str, name: &str) -> Result<()> {
        Ok(self.client.set_snapshot_name(snapshot_uuid, name).await?)
    }

    async fn delete_vm(&self, uuid: &str, force_destroy_disks: bool) -> Result<()> {
        Ok(self.client.delete_vm(uuid, force_destroy_disks).await?)
    }

    async fn delete_snapshot(&self, snapshot_uuid: &str) -> Result<()> {
        Ok(self.client.delete_snapshot(snapshot_uuid).await?)
    }

    async fn list_vdis(&self, vm_uuid: &str) -> Result<Vec<VDI>> {
        Ok(self.client.list_vdis_for_vm(vm_uuid).await?)
    }

    async fn list_vbds(&self, vm_uuid: &str) -> Result<Vec<VBD>> {
        Ok(self.client.list_vbds_for_vm(vm_uuid).await?)
    }

    async fn list_vifs(&self, vm_uuid: &str) -> Result<Vec<VIF>> {
        Ok(self.client.list_vifs_for_vm(vm_uuid).await?)
    }

    async fn spawn_export(&self, vm_uuid: &str, compression: Option<&str>) -> Result<ExportStream> {
        let mut child = self.client.spawn_export(vm_uuid, compression)?;
        let reader = child.stdout.take().ok_or_else(|| {
            BackupError::TransferFailed("export process produced no stdout".into())
        })?;
        Ok(ExportStream::from_process(Box::pin(reader), child))
    }

    async fn export_to_file(&self, vm_uuid: &str, dest: &Path, compression: Option<&str>) -> Result<()> {
        let filename = dest
            .to_str()
            .ok_or_else(|| BackupError::InvalidConfig(format!("non-utf8 export path: {}", dest.display())))?;
        Ok(self.client.vm_export_to_file(vm_uuid, filename, compression).await?)
    }

    async fn spawn_import(&self, sr_uuid: &str) -> Result<ImportHandle> {
        let mut child = self.client.spawn_import(sr_uuid)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            BackupError::TransferFailed("import process produced no stdin".into())
        })?;
        Ok(ImportHandle::new(stdin, child))
    }

    async fn clear_backup_tags(&self, vm_uuid: &str) -> Result<()> {
        Ok(self.client.clear_other_config_keys(vm_uuid, &[TAG_JOB, TAG_SCHEDULE, TAG_VM]).await?)
    }

    async fn tag_snapshot(&self, snapshot_uuid: &str, job_id: &str, schedule_id: &str, vm_uuid: &str) -> Result<()> {
        let entries: HashMap<&str, String> = HashMap::from([
            (TAG_JOB, job_id.to_string()),
            (TAG_SCHEDULE, schedule_id.to_string()),
            (TAG_VM, vm_uuid.to_string()),
        ]);
        Ok(self.client.set_other_config(ObjectKind::Snapshot, snapshot_uuid, &entries).await?)
    }

    async fn list_snapshots_for_job(&self, job_id: &str, vm_uuid: &str) -> Result<Vec<VM>> {
        Ok(self
            .client
            .list_snapshots_by_other_config(&[(TAG_JOB, job_id), (TAG_VM, vm_uuid)])
            .await?)
    }

    async fn barrier(&self, snapshot_uuid: &str) -> Result<()> {
        // re-reading the snapshot's own param list forces XAPI's cache to
        // settle before the caller acts on it
        self.client.get_snapshot_by_uuid(snapshot_uuid).await?;
        Ok(())
    }

    async fn assert_healthy_vdi_chains(&self, vdis: &[VDI]) -> Result<()> {
        let mut checked_srs = std::collections::HashSet::new();
        for vdi in vdis {
            if !checked_srs.insert(vdi.sr_uuid.clone()) {
                continue;
            }
            let missing = self.client.list_missing_vdi_uuids(&vdi.sr_uuid).await?;
            if let Some(bad) = vdis.iter().find(|v| v.sr_uuid == vdi.sr_uuid && missing.contains(&v.uuid)) {
                return Err(BackupError::UnhealthyVdiChain(bad.uuid.clone()));
            }
        }
        Ok(())
    }

    async fn export_delta_vdi(&self, vdi_uuid: &str, base_vdi_uuid: Option<&str>) -> Result<ExportStream> {
        let raw = self.client.spawn_export_vdi(vdi_uuid, base_vdi_uuid).await?;
        Ok(ExportStream::from_raw_vdi(raw))
    }

    async fn import_vdi(&self, sr_uuid: &str, name_label: &str, virtual_size: u64, mut reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<String> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let vdi_uuid = self.client.create_vdi(sr_uuid, name_label, virtual_size).await?;
        let mut import = self.client.spawn_import_vdi(&vdi_uuid).await?;

        let mut buf = vec![0u8; 256 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            import.writer.write_all(&buf[..n]).await?;
        }
        import.writer.shutdown().await?;
        import.finish().await?;
        Ok(vdi_uuid)
    }

    async fn list_replicated_vms(&self, sr_uuid: &str, schedule_id: &str, vm_uuid: &str) -> Result<Vec<VM>> {
        Ok(self
            .client
            .list_vms_by_other_config(&[(TAG_SR, sr_uuid), (TAG_SCHEDULE, schedule_id), (TAG_VM, vm_uuid)])
            .await?)
    }

    async fn set_name_label(&self, vm_uuid: &str, name: &str) -> Result<()> {
        Ok(self.client.set_name_label(vm_uuid, name).await?)
    }

    async fn block_start(&self, vm_uuid: &str) -> Result<()> {
        Ok(self.client.block_start_operation(vm_uuid).await?)
    }

    async fn tag_replicated_vm(&self, vm_uuid: &str, sr_uuid: &str, schedule_id: &str, source_vm_uuid: &str, role: ReplicationRole) -> Result<()> {
        let entries: HashMap<&str, String> = HashMap::from([
            (TAG_SR, sr_uuid.to_string()),
            (TAG_SCHEDULE, schedule_id.to_string()),
            (TAG_VM, source_vm_uuid.to_string()),
        ]);
        self.client.set_other_config(ObjectKind::Vm, vm_uuid, &entries).await?;
        self.client.add_tag(ObjectKind::Vm, vm_uuid, role.tag()).await?;
        Ok(())
    }
}
