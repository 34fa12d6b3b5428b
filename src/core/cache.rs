//! Content-addressed, directory-backed artifact store (`DirCacher`).
//!
//! Writes land in a sibling tempfile and are `rename`d into place so a
//! concurrent `get` never observes a partial write. An etag sidecar file
//! is written alongside the target so `get` never has to re-hash the body.

use crate::core::errors::{ProxyError, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Metadata the dispatcher needs to serve conditional requests without
/// re-reading the body.
#[derive(Debug, Clone)]
pub struct CacheMeta {
    pub size: u64,
    pub mod_time: SystemTime,
    /// Hex-encoded SHA-256 digest of the stored bytes, or empty if the
    /// backend cannot supply one.
    pub etag: String,
}

/// A cache hit: where to stream the body from, plus its metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub meta: CacheMeta,
}

#[derive(Clone)]
pub struct DirCacher {
    root: PathBuf,
}

impl DirCacher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rejects a cache name that would escape `root`, even though the path
    /// parser should already rule these out upstream; this is the cache's
    /// own defense-in-depth.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(ProxyError::BadRequest("malformed-path".into()));
        }
        Ok(self.root.join(name))
    }

    fn etag_sidecar(path: &Path) -> PathBuf {
        let basename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{basename}.etag"))
    }

    pub async fn get(&self, name: &str) -> Result<CacheEntry> {
        let path = self.resolve(name)?;
        let metadata = tokio::fs::metadata(&path).await?;
        let mod_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let etag = match tokio::fs::read_to_string(Self::etag_sidecar(&path)).await {
            Ok(s) => s.trim().to_string(),
            Err(_) => String::new(),
        };

        Ok(CacheEntry {
            path,
            meta: CacheMeta {
                size: metadata.len(),
                mod_time,
                etag,
            },
        })
    }

    /// Stores `content` under `name`, replacing any existing artifact.
    pub async fn put(&self, name: &str, content: Bytes) -> Result<()> {
        let path = self.resolve(name)?;
        let dir = path.parent().ok_or_else(|| {
            ProxyError::Internal("cache path has no parent directory".into())
        })?;
        tokio::fs::create_dir_all(dir).await?;
        #[cfg(unix)]
        {
            let perms = std::fs::Permissions::from_mode(0o750);
            tokio::fs::set_permissions(dir, perms).await?;
        }

        let etag = hex::encode(Sha256::digest(&content));

        self.write_atomic(&path, &content).await?;
        self.write_atomic(&Self::etag_sidecar(&path), etag.as_bytes())
            .await?;

        Ok(())
    }

    async fn write_atomic(&self, target: &Path, content: &[u8]) -> Result<()> {
        let dir = target.parent().ok_or_else(|| {
            ProxyError::Internal("cache path has no parent directory".into())
        })?;
        let basename = target
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{basename}.tmp{}", Uuid::new_v4()));

        let write_result = async {
            tokio::fs::write(&tmp_path, content).await?;
            tokio::fs::rename(&tmp_path, target).await?;
            Ok::<(), ProxyError>(())
        }
        .await;

        if write_result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        write_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_roundtrips_bytes_and_etag() {
        let dir = tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());
        cacher
            .put("example.com/foo/@v/v1.0.0.mod", Bytes::from_static(b"module foo\n"))
            .await
            .unwrap();

        let entry = cacher.get("example.com/foo/@v/v1.0.0.mod").await.unwrap();
        assert_eq!(entry.meta.size, 11);
        assert!(!entry.meta.etag.is_empty());

        let body = tokio::fs::read(&entry.path).await.unwrap();
        assert_eq!(body, b"module foo\n");
    }

    #[tokio::test]
    async fn get_on_missing_name_is_not_found() {
        let dir = tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());
        let err = cacher.get("example.com/foo/@v/list").await.unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(None)));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());
        let err = cacher
            .put("../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    #[tokio::test]
    async fn put_overwrites_existing_artifact() {
        let dir = tempdir().unwrap();
        let cacher = DirCacher::new(dir.path());
        cacher.put("m/@v/list", Bytes::from_static(b"v1.0.0\n")).await.unwrap();
        cacher
            .put("m/@v/list", Bytes::from_static(b"v1.0.0\nv1.1.0\n"))
            .await
            .unwrap();
        let entry = cacher.get("m/@v/list").await.unwrap();
        let body = tokio::fs::read(&entry.path).await.unwrap();
        assert_eq!(body, b"v1.0.0\nv1.1.0\n");
    }

    #[tokio::test]
    async fn concurrent_put_never_exposes_partial_content() {
        let dir = tempdir().unwrap();
        let cacher = std::sync::Arc::new(DirCacher::new(dir.path()));
        let big = Bytes::from(vec![b'a'; 64 * 1024]);
        let small = Bytes::from_static(b"short");

        let c1 = cacher.clone();
        let b1 = big.clone();
        let writer = tokio::spawn(async move { c1.put("m/@v/v1.zip", b1).await });
        let c2 = cacher.clone();
        let s2 = small.clone();
        let writer2 = tokio::spawn(async move { c2.put("m/@v/v1.zip", s2).await });

        writer.await.unwrap().unwrap();
        writer2.await.unwrap().unwrap();

        let entry = cacher.get("m/@v/v1.zip").await.unwrap();
        assert!(entry.meta.size == big.len() as u64 || entry.meta.size == small.len() as u64);
    }
}
