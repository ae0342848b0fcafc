//! Filesystem-backed object store.
//!
//! Objects live under `{root}/{bucket}/{key}` with keys using forward-slash
//! separators (`frames/<job>/frame_00000.png`). The store only ever touches
//! paths below the bucket root; keys with `..` components are rejected.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use reelgen_core::{Error, Result};
use walkdir::WalkDir;

/// Object store rooted at a bucket directory.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    bucket_root: PathBuf,
    public_base: String,
}

impl ObjectStore {
    /// Open (and provision) the store at `{root}/{bucket}`.
    pub fn open(root: &Path, bucket: &str, public_base_url: &str) -> Result<Self> {
        let bucket_root = root.join(bucket);
        std::fs::create_dir_all(&bucket_root).map_err(|e| {
            Error::storage(format!(
                "cannot create bucket directory {}: {e}",
                bucket_root.display()
            ))
        })?;
        Ok(Self {
            bucket_root,
            public_base: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Directory all objects live under.
    pub fn bucket_root(&self) -> &Path {
        &self.bucket_root
    }

    /// Public URL for an object key.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(Error::storage(format!("invalid object key: {key:?}")));
        }
        Ok(self.bucket_root.join(rel))
    }

    /// Write an object, creating parent directories as needed.
    pub async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(format!("mkdir for {key}: {e}")))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| Error::storage(format!("write {key}: {e}")))
    }

    /// Read an object's bytes.
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let path = self.key_path(key)?;
        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found("Object", key)
            } else {
                Error::storage(format!("read {key}: {e}"))
            }
        })?;
        Ok(Bytes::from(data))
    }

    /// List object keys under a prefix, sorted. Missing prefixes list empty.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.key_path(prefix)?;
        let bucket_root = self.bucket_root.clone();
        let keys = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !dir.is_dir() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&dir) {
                let entry =
                    entry.map_err(|e| Error::storage(format!("list walk failed: {e}")))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Ok(rel) = entry.path().strip_prefix(&bucket_root) {
                    let key = rel
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| Error::system(format!("list task panicked: {e}")))??;
        Ok(keys)
    }

    /// Delete a single object. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("delete {key}: {e}"))),
        }
    }

    /// Delete every object under a prefix, returning how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let dir = self.key_path(prefix)?;
        let removed = tokio::task::spawn_blocking(move || -> Result<u64> {
            if !dir.is_dir() {
                return Ok(0);
            }
            let count = WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .count() as u64;
            std::fs::remove_dir_all(&dir)
                .map_err(|e| Error::storage(format!("delete prefix: {e}")))?;
            Ok(count)
        })
        .await
        .map_err(|e| Error::system(format!("delete task panicked: {e}")))??;
        Ok(removed)
    }

    /// Move an object to a new key. The destination parent is created; an
    /// existing destination is replaced.
    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let src = self.key_path(from)?;
        let dst = self.key_path(to)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(format!("mkdir for {to}: {e}")))?;
        }
        tokio::fs::rename(&src, &dst).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::not_found("Object", from)
            } else {
                Error::storage(format!("rename {from} -> {to}: {e}"))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> ObjectStore {
        ObjectStore::open(dir.path(), "reelgen", "http://localhost:8700/media").unwrap()
    }

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store
            .upload("videos/abc/video.mp4", Bytes::from_static(b"mp4 bytes"))
            .await
            .unwrap();
        let data = store.download("videos/abc/video.mp4").await.unwrap();
        assert_eq!(&data[..], b"mp4 bytes");
    }

    #[tokio::test]
    async fn download_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let err = store.download("videos/nope/video.mp4").await.unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn list_is_sorted_and_scoped_to_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store
            .upload("frames/j1/frame_00001.png", Bytes::from_static(b"b"))
            .await
            .unwrap();
        store
            .upload("frames/j1/frame_00000.png", Bytes::from_static(b"a"))
            .await
            .unwrap();
        store
            .upload("videos/j1/video.mp4", Bytes::from_static(b"v"))
            .await
            .unwrap();

        let keys = store.list("frames").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "frames/j1/frame_00000.png".to_string(),
                "frames/j1/frame_00001.png".to_string(),
            ]
        );
        assert!(store.list("thumbnails").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_prefix_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store
            .upload("frames/j1/frame_00000.png", Bytes::from_static(b"a"))
            .await
            .unwrap();
        store
            .upload("frames/j1/frame_00001.png", Bytes::from_static(b"b"))
            .await
            .unwrap();

        assert_eq!(store.delete_prefix("frames/j1").await.unwrap(), 2);
        assert_eq!(store.delete_prefix("frames/j1").await.unwrap(), 0);
        assert!(store.list("frames").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.delete("videos/ghost/video.mp4").await.unwrap();
    }

    #[tokio::test]
    async fn rename_moves_across_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store
            .upload("staging/j1/video.mp4", Bytes::from_static(b"v"))
            .await
            .unwrap();

        store
            .rename("staging/j1/video.mp4", "videos/j1/video.mp4")
            .await
            .unwrap();

        assert!(store.download("staging/j1/video.mp4").await.is_err());
        let data = store.download("videos/j1/video.mp4").await.unwrap();
        assert_eq!(&data[..], b"v");
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.download("../outside").await.is_err());
        assert!(store
            .upload("videos/../../esc", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(store.download("/etc/passwd").await.is_err());
    }

    #[test]
    fn public_url_joins_base_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            ObjectStore::open(dir.path(), "reelgen", "http://cdn.local/media/").unwrap();
        assert_eq!(
            store.public_url("videos/j1/video.mp4"),
            "http://cdn.local/media/videos/j1/video.mp4"
        );
    }
}
