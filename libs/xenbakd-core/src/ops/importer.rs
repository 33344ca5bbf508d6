use tokio::io::AsyncWriteExt;

use crate::error::{BackupError, Result};
use crate::hypervisor::HypervisorClient;
use crate::metadata::BackupMetadata;
use crate::model::JobMode;
use crate::remote::RemoteHandler;
use crate::vhd::VhdBackend;

/// restores a backup onto `sr_uuid`. Full mode imports the recorded `.xva`
/// directly and returns the new VM's uuid.
///
/// Delta mode has no `.xva` to import: each VDI's VHD chain is coalesced with
/// `create_synthetic_stream` and materialized as a standalone VDI on the
/// target SR. Reattaching those VDIs to a freshly built VM (new VBDs/VIFs
/// wired up from the recorded metadata) needs XAPI object-creation calls the
/// `xe` CLI doesn't expose, so this returns the new VDI uuids rather than a
/// VM uuid — finishing the VM assembly is left to the operator or a richer
/// hypervisor client.
pub async fn restore_backup(
    hypervisor: &dyn HypervisorClient,
    vhd_backend: &dyn VhdBackend,
    remote: &dyn RemoteHandler,
    vm_uuid: &str,
    backup: &BackupMetadata,
    sr_uuid: &str,
) -> Result<String> {
    match backup.mode {
        JobMode::Full => restore_full(hypervisor, remote, vm_uuid, backup, sr_uuid).await,
        JobMode::Delta => restore_delta(hypervisor, vhd_backend, remote, vm_uuid, backup, sr_uuid).await,
    }
}

async fn restore_full(
    hypervisor: &dyn HypervisorClient,
    remote: &dyn RemoteHandler,
    vm_uuid: &str,
    backup: &BackupMetadata,
    sr_uuid: &str,
) -> Result<String> {
    let vm_dir = remote.vm_dir(vm_uuid);
    let xva_rel = backup
        .xva
        .as_ref()
        .ok_or_else(|| BackupError::InvalidConfig("full-mode backup has no xva payload recorded".into()))?;
    let bytes = remote.read_file(&vm_dir.join(xva_rel)).await?;
    let mut handle = hypervisor.spawn_import(sr_uuid).await?;
    handle.stdin.write_all(&bytes).await?;
    handle.stdin.shutdown().await?;
    handle.finish().await
}

async fn restore_delta(
    hypervisor: &dyn HypervisorClient,
    vhd_backend: &dyn VhdBackend,
    remote: &dyn RemoteHandler,
    vm_uuid: &str,
    backup: &BackupMetadata,
    sr_uuid: &str,
) -> Result<String> {
    let vhds = backup
        .vhds
        .as_ref()
        .ok_or_else(|| BackupError::InvalidConfig("delta-mode backup has no vhds recorded".into()))?;
    let vm_dir = remote.vm_dir(vm_uuid);

    let mut new_vdi_uuids = vec![];
    for (vdi_id, rel) in vhds {
        let path = vm_dir.join(rel);
        let stream = vhd_backend.create_synthetic_stream(&path).await?;
        let virtual_size = backup
            .vdis
            .iter()
            .flatten()
            .find(|v| v.get("uuid").and_then(|u| u.as_str()) == Some(vdi_id.as_str()))
            .and_then(|v| v.get("virtualSize"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let new_uuid = hypervisor
            .import_vdi(sr_uuid, &format!("restored-{vdi_id}"), virtual_size, stream)
            .await?;
        new_vdi_uuids.push(new_uuid);
    }
    Ok(new_vdi_uuids.join(","))
}
