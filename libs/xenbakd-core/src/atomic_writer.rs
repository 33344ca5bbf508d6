use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// writes via a dotted temp filename in the destination directory, renaming
/// into place only on success; failure leaves no partial file at the final
/// path (C6). A checksum sidecar (`<finalPath>.checksum`) is written
/// alongside the final file once the rename lands.
pub struct AtomicWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: tokio::fs::File,
    hasher: Sha256,
}

fn temp_path_for(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("output");
    dir.join(format!(".{name}"))
}

fn checksum_path_for(path: &Path) -> PathBuf {
    let name = path.as_os_str().to_str().unwrap_or("output");
    PathBuf::from(format!("{name}.checksum"))
}

impl AtomicWriter {
    pub async fn create(path: &Path) -> Result<Self> {
        let temp_path = temp_path_for(path);
        let file = tokio::fs::File::create(&temp_path).await?;
        Ok(AtomicWriter {
            final_path: path.to_path_buf(),
            temp_path,
            file,
            hasher: Sha256::new(),
        })
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.hasher.update(buf);
        self.file.write_all(buf).await?;
        Ok(())
    }

    /// flushes, renames the temp file into place, and writes the checksum
    /// sidecar. Returns the hex-encoded sha256 digest.
    pub async fn finish(mut self) -> Result<String> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tokio::fs::rename(&self.temp_path, &self.final_path).await?;

        let digest = hex::encode(self.hasher.finalize());
        tokio::fs::write(checksum_path_for(&self.final_path), format!("{digest}\n")).await?;
        Ok(digest)
    }

    /// unlinks the temp file without touching the final path; callers invoke
    /// this explicitly on a failed write
    pub async fn abort(self) -> Result<()> {
        tokio::fs::remove_file(&self.temp_path).await?;
        Ok(())
    }
}

/// writes a small buffer (e.g. a metadata sidecar) atomically in one shot
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<String> {
    let mut writer = AtomicWriter::create(path).await?;
    writer.write_all(bytes).await?;
    writer.finish().await
}

/// verifies a previously-written file against its checksum sidecar
pub async fn verify_checksum(path: &Path) -> Result<bool> {
    let checksum_path = checksum_path_for(path);
    let expected = tokio::fs::read_to_string(&checksum_path).await?;
    let contents = tokio::fs::read(path).await?;
    let actual = hex::encode(Sha256::digest(&contents));
    Ok(expected.trim() == actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_atomic_leaves_only_the_final_file_and_its_checksum() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("backup.xva");

        write_atomic(&target, b"payload").await.unwrap();

        assert!(target.exists());
        assert!(dir.path().join("backup.xva.checksum").exists());
        assert!(!dir.path().join(".backup.xva").exists());
    }

    #[tokio::test]
    async fn verify_checksum_detects_corruption() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("backup.xva");
        write_atomic(&target, b"payload").await.unwrap();
        assert!(verify_checksum(&target).await.unwrap());

        tokio::fs::write(&target, b"corrupted").await.unwrap();
        assert!(!verify_checksum(&target).await.unwrap());
    }

    #[tokio::test]
    async fn abort_removes_the_temp_file_without_creating_the_final_one() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("backup.xva");

        let mut writer = AtomicWriter::create(&target).await.unwrap();
        writer.write_all(b"partial").await.unwrap();
        writer.abort().await.unwrap();

        assert!(!target.exists());
        assert!(!dir.path().join(".backup.xva").exists());
    }
}
