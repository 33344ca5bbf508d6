use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::vhd::VhdBackend;

/// VHDs in a VDI directory, sorted lexicographically — which is chronological
/// order given the fixed-width timestamp naming convention (§3, §4.3)
pub async fn list(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = vec![];
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("vhd") {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// the file in `dir` whose basename matches `child`'s parent-locator, or `None`
/// for a root (full) VHD
pub async fn parent_of(
    backend: &dyn VhdBackend,
    dir: &Path,
    child_path: &Path,
) -> Result<Option<PathBuf>> {
    let Some(parent_name) = backend.read_parent_link(child_path).await? else {
        return Ok(None);
    };

    for candidate in list(dir).await? {
        if candidate.file_name().and_then(|n| n.to_str()) == Some(parent_name.as_str()) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// rewrites `child`'s parent-locator fields to point at `parent_path`; idempotent
pub async fn splice(backend: &dyn VhdBackend, parent_path: &Path, child_path: &Path) -> Result<()> {
    backend.chain_vhd(parent_path, child_path).await
}

/// coalesces `parent` into `child`; on success `parent` is unlinkable (§4.3)
pub async fn merge(backend: &dyn VhdBackend, parent_path: &Path, child_path: &Path) -> Result<()> {
    backend.merge(parent_path, child_path).await
}

/// validates invariant I1: every VHD is a root, or its parent-locator resolves
/// to another VHD in the same directory — no dangling parents
pub async fn assert_no_dangling_parents(backend: &dyn VhdBackend, dir: &Path) -> Result<()> {
    for path in list(dir).await? {
        if backend.read_parent_link(&path).await?.is_some() && parent_of(backend, dir, &path).await?.is_none() {
            return Err(crate::error::BackupError::MergeFailed {
                child: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "dangling VHD parent"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhd::SimpleVhdBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn list_is_lexicographically_sorted() {
        let dir = tempdir().unwrap();
        for name in ["20240103T000000Z.vhd", "20240101T000000Z.vhd", "20240102T000000Z.vhd"] {
            SimpleVhdBackend::write(&dir.path().join(name), None, b"x").await.unwrap();
        }
        let listed = list(dir.path()).await.unwrap();
        let names: Vec<_> = listed
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["20240101T000000Z.vhd", "20240102T000000Z.vhd", "20240103T000000Z.vhd"]
        );
    }

    #[tokio::test]
    async fn missing_dir_yields_empty_not_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert_eq!(list(&missing).await.unwrap(), Vec::<PathBuf>::new());
    }

    #[tokio::test]
    async fn parent_of_finds_the_matching_sibling() {
        let dir = tempdir().unwrap();
        let backend = SimpleVhdBackend::new();
        let full = dir.path().join("20240101T000000Z.vhd");
        let delta = dir.path().join("20240102T000000Z.vhd");
        SimpleVhdBackend::write(&full, None, b"full").await.unwrap();
        SimpleVhdBackend::write(&delta, Some("20240101T000000Z.vhd"), b"delta").await.unwrap();

        let found = parent_of(&backend, dir.path(), &delta).await.unwrap();
        assert_eq!(found, Some(full));
    }

    #[tokio::test]
    async fn chain_is_a_no_op_when_reapplied() {
        let dir = tempdir().unwrap();
        let backend = SimpleVhdBackend::new();
        let parent = dir.path().join("a.vhd");
        let child = dir.path().join("b.vhd");
        SimpleVhdBackend::write(&parent, None, b"a").await.unwrap();
        SimpleVhdBackend::write(&child, None, b"b").await.unwrap();

        splice(&backend, &parent, &child).await.unwrap();
        splice(&backend, &parent, &child).await.unwrap();

        assert_eq!(
            backend.read_parent_link(&child).await.unwrap().as_deref(),
            Some("a.vhd")
        );
    }

    #[tokio::test]
    async fn detects_dangling_parent() {
        let dir = tempdir().unwrap();
        let backend = SimpleVhdBackend::new();
        let child = dir.path().join("b.vhd");
        SimpleVhdBackend::write(&child, Some("missing.vhd"), b"b").await.unwrap();

        assert!(assert_no_dangling_parents(&backend, dir.path()).await.is_err());
    }
}
