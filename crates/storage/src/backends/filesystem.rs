//! Local filesystem block store.
//!
//! Layout under the root directory:
//!
//! ```text
//! {object}                     committed object
//! .props/{object}              content type of a committed object
//! .blocks/{object}/{index}     staged block, index zero-padded
//! ```

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlockStore, ObjectLocation, ObjectMeta, ObjectProperties, check_block_order};
use async_trait::async_trait;
use bytes::Bytes;
use cask_core::BlockId;
use cask_core::block::BLOCK_ID_WIDTH;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Directory holding staged, uncommitted blocks.
const STAGED_DIR: &str = ".blocks";

/// Directory holding object properties.
const PROPS_DIR: &str = ".props";

/// Local filesystem block store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve `key` under the root on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::resolve_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Map `key` to a path under `root`.
    ///
    /// Only plain relative components are accepted. The deepest part of the
    /// path that already exists must resolve inside the root, so a symlink
    /// anywhere along the way cannot lead writes or reads out of it.
    fn resolve_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || key.contains('\\') || !plain {
            return Err(StorageError::InvalidKey(format!("unsafe object key: {key}")));
        }

        let root_canonical = root
            .canonicalize()
            .map_err(|e| io_context(e, "failed to canonicalize root"))?;
        let path = root.join(relative);

        let mut existing = path.as_path();
        loop {
            match std::fs::symlink_metadata(existing) {
                Ok(_) => break,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    existing = existing.parent().ok_or_else(|| {
                        StorageError::InvalidKey(format!("no existing ancestor: {key}"))
                    })?;
                }
                Err(e) => return Err(io_context(e, "failed to stat path")),
            }
        }

        let resolved = existing.canonicalize().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
            } else {
                io_context(e, "failed to canonicalize path")
            }
        })?;
        if !resolved.starts_with(&root_canonical) {
            return Err(StorageError::InvalidKey(format!(
                "resolved path escapes storage root: {key}"
            )));
        }

        Ok(path)
    }

    /// Path of a committed object. Names inside the bookkeeping directories
    /// are not objects.
    async fn object_path(&self, object: &str) -> StorageResult<PathBuf> {
        let first = object.split('/').next().unwrap_or_default();
        if first == STAGED_DIR || first == PROPS_DIR {
            return Err(StorageError::InvalidKey(format!(
                "reserved object name: {object}"
            )));
        }
        self.key_path(object).await
    }

    async fn staged_dir(&self, object: &str) -> StorageResult<PathBuf> {
        self.key_path(&format!("{STAGED_DIR}/{object}")).await
    }

    async fn props_path(&self, object: &str) -> StorageResult<PathBuf> {
        self.key_path(&format!("{PROPS_DIR}/{object}")).await
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `data` to `path` through a uniquely named temp file, fsync, then
    /// rename.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.ensure_parent(path).await?;
        let temp_path = temp_sibling(path);
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Concatenate `sources` into `dest`. Returns the number of bytes written.
    async fn concat_into(dest: &Path, sources: &[PathBuf]) -> StorageResult<u64> {
        let mut out = fs::File::create(dest).await?;
        let mut total = 0u64;
        for source in sources {
            let mut block = fs::File::open(source).await?;
            total += tokio::io::copy(&mut block, &mut out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        Ok(total)
    }
}

fn block_file_name(id: &BlockId) -> String {
    format!("{:0width$}", id.index(), width = BLOCK_ID_WIDTH)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let temp_name = format!(".tmp.{}", Uuid::new_v4());
    path.with_file_name(
        path.file_name()
            .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
            .unwrap_or_else(|| temp_name.clone()),
    )
}

fn io_context(e: std::io::Error, what: &str) -> StorageError {
    StorageError::Io(std::io::Error::new(e.kind(), format!("{what}: {e}")))
}

fn not_found(object: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(object.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl BlockStore for FilesystemBackend {
    #[instrument(skip(self, data), fields(backend = "filesystem", block = id.index(), size = data.len()))]
    async fn stage_block(&self, object: &str, id: &BlockId, data: Bytes) -> StorageResult<()> {
        self.object_path(object).await?;
        let dir = self.staged_dir(object).await?;
        self.write_atomic(&dir.join(block_file_name(id)), &data)
            .await
    }

    #[instrument(skip(self, blocks, properties), fields(backend = "filesystem", blocks = blocks.len()))]
    async fn commit_block_list(
        &self,
        object: &str,
        blocks: &[BlockId],
        properties: ObjectProperties,
    ) -> StorageResult<ObjectLocation> {
        check_block_order(object, blocks)?;
        let path = self.object_path(object).await?;
        let staged_dir = self.staged_dir(object).await?;

        let mut sources = Vec::with_capacity(blocks.len());
        for id in blocks {
            let source = staged_dir.join(block_file_name(id));
            if !fs::try_exists(&source).await? {
                return Err(StorageError::MissingBlock {
                    object: object.to_string(),
                    block: id.to_string(),
                });
            }
            sources.push(source);
        }

        self.ensure_parent(&path).await?;
        let temp_path = temp_sibling(&path);
        let size = match Self::concat_into(&temp_path, &sources).await {
            Ok(size) => size,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        let props_path = self.props_path(object).await?;
        match properties.content_type {
            Some(content_type) => self.write_atomic(&props_path, content_type.as_bytes()).await?,
            None => match fs::remove_file(&props_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }

        if let Err(e) = fs::remove_dir_all(&staged_dir).await {
            tracing::warn!(
                object = %object,
                error = %e,
                "Failed to remove staged blocks after commit"
            );
        }

        Ok(ObjectLocation {
            name: object.to_string(),
            size,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn staged_blocks(&self, object: &str) -> StorageResult<Vec<BlockId>> {
        let dir = self.staged_dir(object).await?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Temp files left by an interrupted stage do not parse.
            if let Some(index) = entry
                .file_name()
                .to_str()
                .filter(|name| name.len() == BLOCK_ID_WIDTH)
                .and_then(|name| name.parse::<u32>().ok())
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices.into_iter().map(BlockId::from_index).collect())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, object: &str) -> StorageResult<Bytes> {
        let path = self.object_path(object).await?;
        let data = fs::read(&path).await.map_err(not_found(object))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, object: &str) -> StorageResult<bool> {
        let path = self.object_path(object).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, object: &str) -> StorageResult<ObjectMeta> {
        let path = self.object_path(object).await?;
        let metadata = fs::metadata(&path).await.map_err(not_found(object))?;

        let props_path = self.props_path(object).await?;
        let content_type = match fs::read_to_string(&props_path).await {
            Ok(content_type) => Some(content_type),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type,
        })
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root)
            .await
            .map_err(|e| io_context(e, "storage root not accessible"))?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        (dir, backend)
    }

    fn ids(n: u32) -> Vec<BlockId> {
        (0..n).map(BlockId::from_index).collect()
    }

    #[tokio::test]
    async fn test_stage_and_commit_roundtrip() {
        let (dir, backend) = backend().await;
        let blocks = ids(3);
        // Stage out of order.
        backend
            .stage_block("docs/a.bin", &blocks[2], Bytes::from("ccc"))
            .await
            .unwrap();
        backend
            .stage_block("docs/a.bin", &blocks[0], Bytes::from("aaaa"))
            .await
            .unwrap();
        backend
            .stage_block("docs/a.bin", &blocks[1], Bytes::from("bbbb"))
            .await
            .unwrap();

        assert!(!backend.exists("docs/a.bin").await.unwrap());
        assert_eq!(backend.staged_blocks("docs/a.bin").await.unwrap(), blocks);

        let location = backend
            .commit_block_list(
                "docs/a.bin",
                &blocks,
                ObjectProperties {
                    content_type: Some("application/octet-stream".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(location.name, "docs/a.bin");
        assert_eq!(location.size, 11);

        assert_eq!(
            backend.get("docs/a.bin").await.unwrap(),
            Bytes::from("aaaabbbbccc")
        );
        let meta = backend.head("docs/a.bin").await.unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.content_type.as_deref(), Some("application/octet-stream"));

        // Staged blocks are gone after commit.
        assert!(backend.staged_blocks("docs/a.bin").await.unwrap().is_empty());
        assert!(!dir.path().join(".blocks/docs/a.bin").exists());
    }

    #[tokio::test]
    async fn test_restage_overwrites() {
        let (_dir, backend) = backend().await;
        let id = BlockId::from_index(0);
        backend
            .stage_block("o", &id, Bytes::from("first"))
            .await
            .unwrap();
        backend
            .stage_block("o", &id, Bytes::from("second"))
            .await
            .unwrap();
        assert_eq!(backend.staged_blocks("o").await.unwrap().len(), 1);

        backend
            .commit_block_list("o", &[id], ObjectProperties::default())
            .await
            .unwrap();
        assert_eq!(backend.get("o").await.unwrap(), Bytes::from("second"));
        assert!(backend.head("o").await.unwrap().content_type.is_none());
    }

    #[tokio::test]
    async fn test_commit_missing_block_leaves_nothing() {
        let (_dir, backend) = backend().await;
        let blocks = ids(2);
        backend
            .stage_block("o", &blocks[0], Bytes::from("x"))
            .await
            .unwrap();

        let result = backend
            .commit_block_list("o", &blocks, ObjectProperties::default())
            .await;
        assert!(matches!(result, Err(StorageError::MissingBlock { .. })));
        assert!(!backend.exists("o").await.unwrap());
        // The staged block is still there for inspection.
        assert_eq!(backend.staged_blocks("o").await.unwrap(), vec![blocks[0].clone()]);
    }

    #[tokio::test]
    async fn test_commit_rejects_unordered_list() {
        let (_dir, backend) = backend().await;
        let blocks = ids(2);
        for id in &blocks {
            backend.stage_block("o", id, Bytes::from("x")).await.unwrap();
        }
        let reversed = vec![blocks[1].clone(), blocks[0].clone()];
        let result = backend
            .commit_block_list("o", &reversed, ObjectProperties::default())
            .await;
        assert!(matches!(result, Err(StorageError::UnorderedBlockList { .. })));
        assert!(!backend.exists("o").await.unwrap());
    }

    #[tokio::test]
    async fn test_unlisted_blocks_discarded() {
        let (_dir, backend) = backend().await;
        let blocks = ids(3);
        for id in &blocks {
            backend.stage_block("o", id, Bytes::from("xy")).await.unwrap();
        }
        let location = backend
            .commit_block_list("o", &blocks[..2], ObjectProperties::default())
            .await
            .unwrap();
        assert_eq!(location.size, 4);
        assert!(backend.staged_blocks("o").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reserved_names_rejected() {
        let (_dir, backend) = backend().await;
        let id = BlockId::from_index(0);
        for name in [".blocks/x", ".props/y", ".blocks"] {
            assert!(matches!(
                backend.stage_block(name, &id, Bytes::from("x")).await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, backend) = backend().await;

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(
            backend
                .stage_block("foo/../../etc/passwd", &BlockId::from_index(0), Bytes::new())
                .await
                .is_err()
        );

        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let (dir, backend) = backend().await;
        let outside_dir = tempfile::tempdir().unwrap();
        std::fs::write(outside_dir.path().join("secret.txt"), "secret data").unwrap();

        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();

        let result = backend.get("escape/secret.txt").await;
        match result {
            Err(StorageError::InvalidKey(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }

        let result = backend
            .stage_block("escape/nested/file", &BlockId::from_index(0), Bytes::from("x"))
            .await;
        assert!(result.is_err());
        assert!(!outside_dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_health_check() {
        let (dir, backend) = backend().await;
        backend.health_check().await.unwrap();
        assert_eq!(backend.backend_name(), "filesystem");

        drop(dir);
        assert!(backend.health_check().await.is_err());
    }
}
