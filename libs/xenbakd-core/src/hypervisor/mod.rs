pub mod xe;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin};
use xapi_cli_client::{VBD, VDI, VIF, VM};

use crate::error::{BackupError, Result};
use crate::model::VmPattern;

/// how an `ExportStream`'s reader is backed — a CLI child process for a full
/// `xe vm-export`, or an HTTP session for a per-VDI raw export. `finish`
/// reaps whichever one is live.
enum ExportCompletion {
    Process(Child),
    Http(xapi_cli_client::RawVdiExportHandle),
}

/// a running export, streamed to its caller. `finish` must be awaited after
/// the reader is fully drained, to reap the child process or log the HTTP
/// session out.
pub struct ExportStream {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    completion: ExportCompletion,
}

impl ExportStream {
    pub fn from_process(reader: Pin<Box<dyn AsyncRead + Send>>, child: Child) -> Self {
        ExportStream {
            reader,
            completion: ExportCompletion::Process(child),
        }
    }

    pub fn from_raw_vdi(raw: xapi_cli_client::RawVdiExport) -> Self {
        let (reader, handle) = raw.into_parts();
        ExportStream {
            reader,
            completion: ExportCompletion::Http(handle),
        }
    }

    pub async fn finish(self) -> Result<()> {
        match self.completion {
            ExportCompletion::Process(mut child) => {
                let status = child.wait().await?;
                if !status.success() {
                    return Err(BackupError::TransferFailed("export process exited with a non-zero status".into()));
                }
                Ok(())
            }
            ExportCompletion::Http(handle) => {
                handle.finish().await;
                Ok(())
            }
        }
    }
}

/// a running import process; write the payload into `stdin`, drop/shut it
/// down, then call `finish` to collect the imported VM's uuid
pub struct ImportHandle {
    pub stdin: ChildStdin,
    child: Child,
}

impl ImportHandle {
    pub fn new(stdin: ChildStdin, child: Child) -> Self {
        ImportHandle { stdin, child }
    }

    pub async fn finish(self) -> Result<String> {
        // drop stdin first so the child sees EOF instead of blocking forever
        let ImportHandle { stdin, child } = self;
        drop(stdin);
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(BackupError::TransferFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(xapi_cli_client::clean_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// one of the two roles a replicated VM on a target SR carries, stamped via
/// `tag_replicated_vm` (§3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    DisasterRecovery,
    ContinuousReplication,
}

impl ReplicationRole {
    pub fn tag(self) -> &'static str {
        match self {
            ReplicationRole::DisasterRecovery => "Disaster Recovery",
            ReplicationRole::ContinuousReplication => "Continuous Replication",
        }
    }
}

/// injected hypervisor adapter (§6.1). The worker/executor/ops modules only
/// ever see this trait — `xe::XeHypervisor` is the one production
/// implementation, backed by `xapi_cli_client`.
#[async_trait]
pub trait HypervisorClient: Send + Sync {
    async fn filter_vms(&self, pattern: &VmPattern) -> Result<Vec<VM>>;
    async fn snapshot(&self, vm: &VM, label: &str) -> Result<VM>;
    async fn set_snapshot_not_template(&self, snapshot_uuid: &str) -> Result<()>;
    async fn set_snapshot_name(&self, snapshot_uuid: &str, name: &str) -> Result<()>;
    async fn delete_vm(&self, uuid: &str, force_destroy_disks: bool) -> Result<()>;
    /// `snapshot-uninstall`, distinct from `delete_vm`'s `vm-uninstall` — a
    /// snapshot is never a first-class VM object as far as `xe` is concerned
    async fn delete_snapshot(&self, snapshot_uuid: &str) -> Result<()>;
    async fn list_vdis(&self, vm_uuid: &str) -> Result<Vec<VDI>>;
    async fn list_vbds(&self, vm_uuid: &str) -> Result<Vec<VBD>>;
    async fn list_vifs(&self, vm_uuid: &str) -> Result<Vec<VIF>>;
    /// streams a full VM export (`xe vm-export`) without buffering the whole
    /// payload in memory; the caller tees it to each remote (C7)
    async fn spawn_export(&self, vm_uuid: &str, compression: Option<&str>) -> Result<ExportStream>;
    async fn export_to_file(&self, vm_uuid: &str, dest: &Path, compression: Option<&str>) -> Result<()>;
    /// streams an `.xva` payload in over stdin and imports it onto `sr_uuid`
    async fn spawn_import(&self, sr_uuid: &str) -> Result<ImportHandle>;

    /// strips the three `xo:backup:*` keys from a live VM's `other-config`
    /// (step 1 of every run — a VM shouldn't still carry stale backup
    /// bookkeeping if a prior run crashed mid-tag)
    async fn clear_backup_tags(&self, vm_uuid: &str) -> Result<()>;
    /// stamps a freshly taken snapshot with the three `xo:backup:*` keys
    async fn tag_snapshot(&self, snapshot_uuid: &str, job_id: &str, schedule_id: &str, vm_uuid: &str) -> Result<()>;
    /// prior snapshots for this (job, vm), unsorted
    async fn list_snapshots_for_job(&self, job_id: &str, vm_uuid: &str) -> Result<Vec<VM>>;
    /// forces a refresh of the local cache entry for a just-taken snapshot
    /// before anything downstream reads it
    async fn barrier(&self, snapshot_uuid: &str) -> Result<()>;
    /// errors with `UnhealthyVdiChain` if any of `vdis` is reported missing by
    /// its SR
    async fn assert_healthy_vdi_chains(&self, vdis: &[VDI]) -> Result<()>;

    /// opens a raw per-VDI export; `base_vdi_uuid` makes it an incremental
    /// delta against that VDI's prior snapshot (the real mechanism behind
    /// `exportDeltaVm`'s per-VDI stream map)
    async fn export_delta_vdi(&self, vdi_uuid: &str, base_vdi_uuid: Option<&str>) -> Result<ExportStream>;
    /// creates a new VDI on `sr_uuid` and streams `reader`'s bytes into it raw,
    /// returning the new VDI's uuid — the restore-side counterpart to
    /// `export_delta_vdi`
    async fn import_vdi(&self, sr_uuid: &str, name_label: &str, virtual_size: u64, reader: Pin<Box<dyn AsyncRead + Send>>) -> Result<String>;

    /// VMs on `sr_uuid` already tagged as a replicated VM for this (schedule, vm)
    async fn list_replicated_vms(&self, sr_uuid: &str, schedule_id: &str, vm_uuid: &str) -> Result<Vec<VM>>;
    async fn set_name_label(&self, vm_uuid: &str, name: &str) -> Result<()>;
    /// blocks the `start` operation on a replicated VM so it can't accidentally boot
    async fn block_start(&self, vm_uuid: &str) -> Result<()>;
    /// stamps a replicated VM with `xo:backup:{sr,schedule,vm}` plus its role tag
    async fn tag_replicated_vm(&self, vm_uuid: &str, sr_uuid: &str, schedule_id: &str, source_vm_uuid: &str, role: ReplicationRole) -> Result<()>;
}
