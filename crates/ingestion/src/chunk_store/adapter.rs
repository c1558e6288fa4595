//! Local-disk implementation of `ChunkStore`. The teacher's own
//! `ChunkStorage` implementations (Mongo/S3) are unfinished stand-ins; this
//! is the one the spec actually calls for — plain files under
//! `UPLOADS_PATH`.

use super::dto::AssembleResult;
use super::error::ChunkStoreError;
use super::ports::{ChunkResult, ChunkStore};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

pub struct FilesystemChunkStore {
    root: PathBuf,
    dirs: DashMap<String, PathBuf>,
}

impl FilesystemChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), dirs: DashMap::new() }
    }

    /// Rejects empty, `.`/`..`, and path-separator-bearing components, the
    /// path-traversal prevention spec.md §4.2 requires for `fileId`/`ownerId`.
    fn sanitize(component: &str) -> ChunkResult<&str> {
        if component.is_empty()
            || component == "."
            || component == ".."
            || component.contains('/')
            || component.contains('\\')
        {
            return Err(ChunkStoreError::InvalidPath(component.to_string()));
        }
        Ok(component)
    }

    fn dir_for(&self, file_id: &str) -> ChunkResult<PathBuf> {
        self.dirs
            .get(file_id)
            .map(|r| r.clone())
            .ok_or_else(|| ChunkStoreError::UnknownSession(file_id.to_string()))
    }

    fn part_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("chunk_{index}.part"))
    }

    fn chunk_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("chunk_{index}"))
    }
}

#[async_trait]
impl ChunkStore for FilesystemChunkStore {
    async fn prepare(&self, file_id: &str, owner_id: &str) -> ChunkResult<PathBuf> {
        let file_id = Self::sanitize(file_id)?;
        let owner_id = Self::sanitize(owner_id)?;
        let dir = self.root.join("temp").join("chunks").join(owner_id).join(file_id);
        tokio::fs::create_dir_all(&dir).await?;
        self.dirs.insert(file_id.to_string(), dir.clone());
        debug!(file_id, owner_id, dir = %dir.display(), "chunk directory prepared");
        Ok(dir)
    }

    async fn write(&self, file_id: &str, index: u64, bytes: Bytes) -> ChunkResult<()> {
        let dir = self.dir_for(file_id)?;
        let part = Self::part_path(&dir, index);
        let final_path = Self::chunk_path(&dir, index);

        let mut file = tokio::fs::File::create(&part).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&part, &final_path).await?;
        Ok(())
    }

    async fn exists(&self, file_id: &str, index: u64) -> ChunkResult<bool> {
        let dir = self.dir_for(file_id)?;
        Ok(tokio::fs::try_exists(Self::chunk_path(&dir, index)).await?)
    }

    async fn list(&self, file_id: &str) -> ChunkResult<Vec<u64>> {
        let dir = self.dir_for(file_id)?;
        let mut indices = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(idx_str) = name.strip_prefix("chunk_") {
                if idx_str.ends_with(".part") {
                    continue;
                }
                if let Ok(idx) = idx_str.parse::<u64>() {
                    indices.push(idx);
                }
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    async fn read(&self, file_id: &str, index: u64) -> ChunkResult<Bytes> {
        let dir = self.dir_for(file_id)?;
        let path = Self::chunk_path(&dir, index);
        if !tokio::fs::try_exists(&path).await? {
            return Err(ChunkStoreError::ChunkNotFound { file_id: file_id.to_string(), index });
        }
        let mut file = tokio::fs::File::open(&path).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn assemble(
        &self,
        file_id: &str,
        order: &[u64],
        out_path: &Path,
        expected_size: u64,
    ) -> ChunkResult<AssembleResult> {
        let dir = self.dir_for(file_id)?;
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut out = tokio::fs::File::create(out_path).await?;
        let mut total: u64 = 0;
        for &index in order {
            let path = Self::chunk_path(&dir, index);
            let mut chunk = tokio::fs::File::open(&path).await?;
            let mut buf = Vec::new();
            chunk.read_to_end(&mut buf).await?;
            total += buf.len() as u64;
            out.write_all(&buf).await?;
        }
        out.sync_all().await?;
        drop(out);

        if total != expected_size {
            return Err(ChunkStoreError::SizeMismatch { expected: expected_size, actual: total });
        }

        Ok(AssembleResult { size: total, path: out_path.to_path_buf() })
    }

    async fn purge(&self, file_id: &str) {
        if let Some((_, dir)) = self.dirs.remove(file_id) {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(file_id, error = %e, "failed to purge chunk directory");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path());
        store.prepare("f1", "owner").await.unwrap();
        store.write("f1", 0, Bytes::from_static(b"hello")).await.unwrap();

        let bytes = store.read("f1", 0).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn list_returns_sorted_indices() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path());
        store.prepare("f1", "owner").await.unwrap();
        store.write("f1", 2, Bytes::from_static(b"c")).await.unwrap();
        store.write("f1", 0, Bytes::from_static(b"a")).await.unwrap();
        store.write("f1", 1, Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(store.list("f1").await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn assemble_concatenates_in_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path());
        store.prepare("f1", "owner").await.unwrap();
        store.write("f1", 0, Bytes::from_static(b"AAA")).await.unwrap();
        store.write("f1", 1, Bytes::from_static(b"BBB")).await.unwrap();

        let out_path = dir.path().join("assembled.bin");
        let result = store.assemble("f1", &[0, 1], &out_path, 6).await.unwrap();

        assert_eq!(result.size, 6);
        let bytes = tokio::fs::read(&out_path).await.unwrap();
        assert_eq!(bytes, b"AAABBB");
    }

    #[tokio::test]
    async fn assemble_rejects_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path());
        store.prepare("f1", "owner").await.unwrap();
        store.write("f1", 0, Bytes::from_static(b"AAA")).await.unwrap();

        let out_path = dir.path().join("assembled.bin");
        let result = store.assemble("f1", &[0], &out_path, 999).await;
        assert!(matches!(result, Err(ChunkStoreError::SizeMismatch { .. })));
    }

    #[tokio::test]
    async fn purge_removes_directory_even_if_partially_populated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path());
        let session_dir = store.prepare("f1", "owner").await.unwrap();
        store.write("f1", 0, Bytes::from_static(b"x")).await.unwrap();

        store.purge("f1").await;
        assert!(!tokio::fs::try_exists(&session_dir).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_path_traversal_in_owner_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemChunkStore::new(dir.path());
        let result = store.prepare("f1", "../../etc").await;
        assert!(matches!(result, Err(ChunkStoreError::InvalidPath(_))));
    }
}
