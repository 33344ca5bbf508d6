use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::Command;

use crate::error::{BackupError, Result};
use crate::vhd::{MergeRequest, MergeResponse, VhdBackend};

/// dispatches the CPU-bound `merge` step to the `xenbak-merge-worker`
/// companion binary over stdin/stdout JSON, isolating it from the daemon
/// process (§5, A7). Cheap metadata operations (`read_parent_link`,
/// `chain_vhd`) stay in-process via `inner`.
pub struct ProcessMergeWorker<B: VhdBackend> {
    binary_path: PathBuf,
    inner: B,
}

impl<B: VhdBackend> ProcessMergeWorker<B> {
    pub fn new(binary_path: PathBuf, inner: B) -> Self {
        ProcessMergeWorker { binary_path, inner }
    }
}

#[async_trait]
impl<B: VhdBackend> VhdBackend for ProcessMergeWorker<B> {
    async fn read_parent_link(&self, path: &Path) -> Result<Option<String>> {
        self.inner.read_parent_link(path).await
    }

    async fn chain_vhd(&self, parent_path: &Path, child_path: &Path) -> Result<()> {
        self.inner.chain_vhd(parent_path, child_path).await
    }

    async fn create_synthetic_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        // read-only chain walk, no need to pay the out-of-process hop for this
        self.inner.create_synthetic_stream(path).await
    }

    async fn merge(&self, parent_path: &Path, child_path: &Path) -> Result<()> {
        let request = MergeRequest {
            parent_path: parent_path.to_path_buf(),
            child_path: child_path.to_path_buf(),
        };

        let mut child = Command::new(&self.binary_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let payload = serde_json::to_vec(&request)?;
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(BackupError::MergeFailed {
                child: child_path.display().to_string(),
                source: std::io::Error::new(ErrorKind::Other, String::from_utf8_lossy(&output.stderr).into_owned()),
            });
        }

        let response: MergeResponse = serde_json::from_slice(&output.stdout)?;
        if !response.ok {
            return Err(BackupError::MergeFailed {
                child: child_path.display().to_string(),
                source: std::io::Error::new(
                    ErrorKind::Other,
                    response.error.unwrap_or_else(|| "merge worker reported failure".into()),
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhd::SimpleVhdBackend;

    /// the worker binary isn't built as part of this crate's test run, so
    /// this only exercises the request/response plumbing via a stand-in
    /// "binary" (`/bin/false`), asserting failures surface as `MergeFailed`
    #[tokio::test]
    async fn a_nonzero_exit_surfaces_as_merge_failed() {
        let worker = ProcessMergeWorker::new(PathBuf::from("/bin/false"), SimpleVhdBackend::new());
        let result = worker.merge(Path::new("/tmp/a.vhd"), Path::new("/tmp/b.vhd")).await;
        assert!(matches!(result, Err(BackupError::MergeFailed { .. })));
    }
}
