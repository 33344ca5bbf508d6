use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::atomic_writer::{self, AtomicWriter};
use crate::error::{BackupError, Result};
use crate::metadata::BackupMetadata;

use super::RemoteHandler;

/// a plain directory on local (or locally-mounted) disk — the simplest
/// remote, grounded in the bare `tokio::fs::read_dir` walk the teacher's
/// local storage backend used
pub struct LocalRemote {
    id: String,
    root: PathBuf,
}

impl LocalRemote {
    pub fn new(id: impl Into<String>, root: PathBuf) -> Self {
        LocalRemote { id: id.into(), root }
    }
}

#[async_trait]
impl RemoteHandler for LocalRemote {
    fn id(&self) -> &str {
        &self.id
    }

    async fn healthcheck(&self) -> Result<()> {
        tokio::fs::metadata(&self.root)
            .await
            .map_err(|source| BackupError::RemoteUnavailable {
                remote: self.id.clone(),
                source,
            })?;
        Ok(())
    }

    fn vm_dir(&self, vm_uuid: &str) -> PathBuf {
        self.root.join("xo-vm-backups").join(vm_uuid)
    }

    async fn ensure_dir(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn list_metadata(&self, vm_uuid: &str) -> Result<Vec<BackupMetadata>> {
        let dir = self.vm_dir(vm_uuid);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut sidecars = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let mut metadata: BackupMetadata = serde_json::from_slice(&bytes)?;
            metadata._filename = path.file_name().and_then(|n| n.to_str()).map(String::from);
            sidecars.push(metadata);
        }
        Ok(sidecars)
    }

    async fn write_metadata(&self, path: &Path, metadata: &BackupMetadata) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(metadata)?;
        atomic_writer::write_atomic(path, &bytes).await?;
        Ok(())
    }

    async fn open_writer(&self, path: &Path) -> Result<AtomicWriter> {
        AtomicWriter::create(path).await
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobMode;
    use tempfile::tempdir;

    fn mk_metadata(ts: &str) -> BackupMetadata {
        BackupMetadata {
            job_id: "job-1".into(),
            schedule_id: "sched-1".into(),
            timestamp: ts.parse().unwrap(),
            version: crate::metadata::METADATA_VERSION.to_string(),
            vm: serde_json::json!({"uuid": "vm-1"}),
            vm_snapshot: serde_json::json!({}),
            mode: JobMode::Full,
            xva: Some("./backup.xva".into()),
            vbds: None,
            vdis: None,
            vifs: None,
            vhds: None,
            _filename: None,
        }
    }

    #[tokio::test]
    async fn writes_and_lists_metadata_round_trip() {
        let dir = tempdir().unwrap();
        let remote = LocalRemote::new("local-1", dir.path().to_path_buf());
        let vm_dir = remote.vm_dir("vm-1");
        remote.ensure_dir(&vm_dir).await.unwrap();

        let metadata = mk_metadata("2024-01-01T00:00:00Z");
        remote
            .write_metadata(&vm_dir.join("20240101T000000Z.json"), &metadata)
            .await
            .unwrap();

        let listed = remote.list_metadata("vm-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].job_id, "job-1");
        assert_eq!(listed[0]._filename.as_deref(), Some("20240101T000000Z.json"));
    }

    #[tokio::test]
    async fn list_metadata_on_missing_vm_dir_is_empty_not_error() {
        let dir = tempdir().unwrap();
        let remote = LocalRemote::new("local-1", dir.path().to_path_buf());
        assert!(remote.list_metadata("never-backed-up").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_file_on_missing_file_is_a_no_op() {
        let dir = tempdir().unwrap();
        let remote = LocalRemote::new("local-1", dir.path().to_path_buf());
        remote.delete_file(&dir.path().join("nope")).await.unwrap();
    }
}
