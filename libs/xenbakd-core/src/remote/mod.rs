pub mod local;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::atomic_writer::AtomicWriter;
use crate::error::Result;
use crate::metadata::BackupMetadata;

/// injected storage backend (§6.2). One remote owns one root directory
/// (local disk, mounted NFS/SMB share, ...); `lister`/`worker`/`ops` only
/// see this trait.
#[async_trait]
pub trait RemoteHandler: Send + Sync {
    fn id(&self) -> &str;

    async fn healthcheck(&self) -> Result<()>;

    /// the directory holding one VM's sidecars + payload files under this remote
    fn vm_dir(&self, vm_uuid: &str) -> PathBuf;

    /// the directory holding one VDI's VHD chain for a delta-mode job (§3:
    /// `xo-vm-backups/<vmUuid>/vdis/<jobId>/<vdiUuid>/`)
    fn vdi_dir(&self, vm_uuid: &str, job_id: &str, vdi_uuid: &str) -> PathBuf {
        self.vm_dir(vm_uuid).join("vdis").join(job_id).join(vdi_uuid)
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()>;

    /// all backup sidecars for a VM, unsorted
    async fn list_metadata(&self, vm_uuid: &str) -> Result<Vec<BackupMetadata>>;

    async fn write_metadata(&self, path: &Path, metadata: &BackupMetadata) -> Result<()>;

    /// opens an atomic writer rooted at this remote, for the payload file
    /// (`.xva`/`.vhd`) that accompanies a metadata sidecar
    async fn open_writer(&self, path: &Path) -> Result<AtomicWriter>;

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    async fn delete_file(&self, path: &Path) -> Result<()>;
}
