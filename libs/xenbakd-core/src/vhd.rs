use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::error::{BackupError, Result};

/// injected VHD-format backend (§6.3). A real implementation decodes the
/// binary VHD footer/header and block bitmaps; this crate only needs the
/// parent-link contract to drive the chain utility (C3), so the concrete
/// backend below is a simplified stand-in rather than a full codec.
#[async_trait]
pub trait VhdBackend: Send + Sync {
    async fn read_parent_link(&self, path: &Path) -> Result<Option<String>>;
    async fn chain_vhd(&self, parent_path: &Path, child_path: &Path) -> Result<()>;
    /// coalesces `parent` into `child` in place; on success `parent` is unlinkable
    async fn merge(&self, parent_path: &Path, child_path: &Path) -> Result<()>;
    /// produces a single stream representing the coalesced chain from `path`
    /// up through its parents — read-only, no files are modified
    async fn create_synthetic_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncRead + Send>>>;
}

/// request/response shape spoken over stdin/stdout with the out-of-process
/// merge worker (§5, A7)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub parent_path: PathBuf,
    pub child_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResponse {
    pub ok: bool,
    pub error: Option<String>,
}

/// a VHD file here is: an 8-byte magic, a u16 parent-name length, the parent
/// name (UTF-8, empty for a root/full VHD), then opaque payload bytes. This
/// mirrors the role of a real VHD footer's `parentUnicodeName` without
/// implementing the on-disk binary format.
const MAGIC: &[u8; 8] = b"XBKDVHD1";

pub struct SimpleVhdBackend;

impl SimpleVhdBackend {
    pub fn new() -> Self {
        SimpleVhdBackend
    }

    /// writes a VHD-shaped file: header + payload, `parent` empty for a full VHD
    pub async fn write(path: &Path, parent_name: Option<&str>, payload: &[u8]) -> Result<()> {
        let parent = parent_name.unwrap_or("");
        let mut buf = Vec::with_capacity(8 + 2 + parent.len() + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(parent.len() as u16).to_le_bytes());
        buf.extend_from_slice(parent.as_bytes());
        buf.extend_from_slice(payload);
        tokio::fs::write(path, buf).await?;
        Ok(())
    }

    async fn read_raw(path: &Path) -> Result<(Option<String>, Vec<u8>)> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.len() < 10 || &bytes[0..8] != MAGIC {
            return Err(BackupError::MergeFailed {
                child: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "not a xenbakd VHD"),
            });
        }
        let name_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let name_start = 10;
        let name_end = name_start + name_len;
        let name = String::from_utf8_lossy(&bytes[name_start..name_end]).into_owned();
        let payload = bytes[name_end..].to_vec();
        Ok((if name.is_empty() { None } else { Some(name) }, payload))
    }
}

impl Default for SimpleVhdBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VhdBackend for SimpleVhdBackend {
    async fn read_parent_link(&self, path: &Path) -> Result<Option<String>> {
        let (parent, _) = Self::read_raw(path).await?;
        Ok(parent)
    }

    async fn chain_vhd(&self, parent_path: &Path, child_path: &Path) -> Result<()> {
        let parent_name = parent_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BackupError::MergeFailed {
                    child: child_path.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad parent path"),
                }
            })?
            .to_string();
        let (_, payload) = Self::read_raw(child_path).await?;
        Self::write(child_path, Some(&parent_name), &payload).await
    }

    async fn merge(&self, parent_path: &Path, child_path: &Path) -> Result<()> {
        let (grandparent, parent_payload) = Self::read_raw(parent_path).await?;
        let (_, child_payload) = Self::read_raw(child_path).await?;

        // naive coalesce: parent bytes followed by child bytes, child "wins"
        // conceptually since it's appended last — a real backend would apply
        // the child's block bitmap over the parent's blocks
        let mut merged = parent_payload;
        merged.extend_from_slice(&child_payload);

        Self::write(child_path, grandparent.as_deref(), &merged).await
    }

    async fn create_synthetic_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let mut chain = vec![];
        let mut current = path.to_path_buf();
        loop {
            let (parent_name, payload) = Self::read_raw(&current).await?;
            chain.push(payload);
            match parent_name {
                Some(name) => {
                    current = current.parent().unwrap_or_else(|| Path::new(".")).join(name);
                }
                None => break,
            }
        }
        chain.reverse(); // root-most ancestor first, same order `merge` coalesces in

        let mut coalesced = Vec::new();
        for payload in chain {
            coalesced.extend_from_slice(&payload);
        }
        Ok(Box::pin(std::io::Cursor::new(coalesced)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn chain_vhd_sets_parent_link_to_basename() {
        let dir = tempdir().unwrap();
        let parent_path = dir.path().join("a.vhd");
        let child_path = dir.path().join("b.vhd");
        SimpleVhdBackend::write(&parent_path, None, b"parent").await.unwrap();
        SimpleVhdBackend::write(&child_path, None, b"child").await.unwrap();

        let backend = SimpleVhdBackend::new();
        backend.chain_vhd(&parent_path, &child_path).await.unwrap();

        let link = backend.read_parent_link(&child_path).await.unwrap();
        assert_eq!(link.as_deref(), Some("a.vhd"));
    }

    #[tokio::test]
    async fn merge_coalesces_parent_into_child_and_preserves_grandparent_link() {
        let dir = tempdir().unwrap();
        let grandparent = dir.path().join("a.vhd");
        let parent = dir.path().join("b.vhd");
        let child = dir.path().join("c.vhd");
        SimpleVhdBackend::write(&grandparent, None, b"a").await.unwrap();
        SimpleVhdBackend::write(&parent, Some("a.vhd"), b"b").await.unwrap();
        SimpleVhdBackend::write(&child, Some("b.vhd"), b"c").await.unwrap();

        let backend = SimpleVhdBackend::new();
        backend.merge(&parent, &child).await.unwrap();

        let link = backend.read_parent_link(&child).await.unwrap();
        assert_eq!(link.as_deref(), Some("a.vhd"));
    }
}
