//! Content-addressable blob storage on local disk.
//!
//! Blobs are named by the hex SHA-256 of their content and sharded two levels
//! deep beneath a storage root: `root/{hash[0..2]}/{hash[2..4]}/{hash}`.
//! Content is streamed through both digests into a `.tmp-<uuid>` file inside
//! the root, fsynced, and only then moved to its final name, so a blob that
//! exists at its shard path is always complete.

use crate::{
    config::DedupScope,
    errors::{StoreError, StoreResult},
    models::{item::FileContent, storage_box::StorageBox},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256, Sha512};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::debug;
use uuid::Uuid;

/// Directory beneath the storage dir that holds the shared pool in global scope.
const GLOBAL_POOL_DIR: &str = "objects";

/// Result of streaming content into a temporary file.
#[derive(Debug)]
pub struct Ingested {
    pub sha256: String,
    pub sha512: String,
    pub size: i64,
    pub temp_path: PathBuf,
}

impl Ingested {
    pub fn content(&self) -> FileContent {
        FileContent {
            sha256: self.sha256.clone(),
            sha512: self.sha512.clone(),
            size: self.size,
        }
    }
}

/// Where a blob ended up, and whether this call wrote it.
#[derive(Debug, Clone)]
pub struct Placement {
    pub path: PathBuf,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    scope: DedupScope,
    storage_dir: PathBuf,
}

impl ObjectStore {
    pub fn new(storage_dir: impl Into<PathBuf>, scope: DedupScope) -> Self {
        Self {
            scope,
            storage_dir: storage_dir.into(),
        }
    }

    pub fn scope(&self) -> DedupScope {
        self.scope
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Directory a new box gets as its own root.
    pub fn box_dir(&self, box_id: Uuid) -> PathBuf {
        self.storage_dir.join(box_id.to_string())
    }

    /// Root that holds the blobs of `record`'s files under the dedup scope.
    pub fn root_for(&self, record: &StorageBox) -> PathBuf {
        match self.scope {
            DedupScope::Box => PathBuf::from(&record.path),
            DedupScope::Global => self.storage_dir.join(GLOBAL_POOL_DIR),
        }
    }

    /// Stream `stream` into a temp file under `root`, hashing as it goes.
    ///
    /// The temp file is removed on any error or when `cancel` fires.
    pub async fn ingest<S>(
        &self,
        root: &Path,
        stream: S,
        cancel: &CancellationToken,
    ) -> StoreResult<Ingested>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(root).await?;
        let temp_path = root.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&temp_path).await?;

        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        let mut size: i64 = 0;

        pin_mut!(stream);
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    discard(&temp_path).await;
                    return Err(io::Error::new(ErrorKind::Interrupted, "ingest cancelled").into());
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    discard(&temp_path).await;
                    return Err(err.into());
                }
            };
            size += chunk.len() as i64;
            sha256.update(&chunk);
            sha512.update(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                discard(&temp_path).await;
                return Err(err.into());
            }
        }

        if let Err(err) = file.flush().await {
            discard(&temp_path).await;
            return Err(err.into());
        }
        if let Err(err) = file.sync_all().await {
            discard(&temp_path).await;
            return Err(err.into());
        }

        Ok(Ingested {
            sha256: hex::encode(sha256.finalize()),
            sha512: hex::encode(sha512.finalize()),
            size,
            temp_path,
        })
    }

    /// Move an ingested temp file to its shard path under `root`.
    ///
    /// When a blob with that digest already exists the temp file is dropped
    /// and the existing blob is kept.
    pub async fn place(&self, sha256: &str, temp_path: &Path, root: &Path) -> StoreResult<Placement> {
        let path = match self.locate(sha256, root) {
            Ok(path) => path,
            Err(err) => {
                discard(temp_path).await;
                return Err(err);
            }
        };

        match fs::try_exists(&path).await {
            Ok(true) => {
                discard(temp_path).await;
                debug!("blob {} already present under {}", sha256, root.display());
                return Ok(Placement {
                    path,
                    created: false,
                });
            }
            Ok(false) => {}
            Err(err) => {
                discard(temp_path).await;
                return Err(err.into());
            }
        }

        let Some(parent) = path.parent().map(Path::to_path_buf) else {
            discard(temp_path).await;
            return Err(io::Error::other("blob path missing parent directory").into());
        };
        if let Err(err) = fs::create_dir_all(&parent).await {
            discard(temp_path).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(temp_path, &path).await {
            discard(temp_path).await;
            return Err(err.into());
        }

        debug!("stored blob {}", path.display());
        Ok(Placement {
            path,
            created: true,
        })
    }

    /// Shard path of a digest under `root`. Pure; touches no files.
    pub fn locate(&self, sha256: &str, root: &Path) -> StoreResult<PathBuf> {
        if sha256.len() != 64 || !sha256.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(StoreError::InvalidRequest(format!(
                "`{}` is not a hex sha256 digest",
                sha256
            )));
        }
        Ok(root.join(&sha256[0..2]).join(&sha256[2..4]).join(sha256))
    }

    pub async fn contains(&self, sha256: &str, root: &Path) -> StoreResult<bool> {
        let path = self.locate(sha256, root)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Delete a blob if present and prune shard directories left empty.
    /// Returns whether a file was removed.
    pub async fn remove(&self, sha256: &str, root: &Path) -> StoreResult<bool> {
        let path = self.locate(sha256, root)?;
        let removed = match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed blob {}", path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
                false
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(parent) = path.parent() {
            prune_empty_dirs(parent, root).await;
        }
        Ok(removed)
    }

    /// Make the blob for `sha256` available under `dst_root`, copying it from
    /// `src_root` when the destination lacks it. Returns whether bytes were
    /// copied. The copy is re-hashed and rejected if it does not match.
    pub async fn copy_between(
        &self,
        sha256: &str,
        src_root: &Path,
        dst_root: &Path,
        cancel: &CancellationToken,
    ) -> StoreResult<bool> {
        if self.contains(sha256, dst_root).await? {
            return Ok(false);
        }

        let source = self.open(sha256, src_root).await?;
        let ingested = self
            .ingest(dst_root, ReaderStream::new(source), cancel)
            .await?;
        if ingested.sha256 != sha256 {
            discard(&ingested.temp_path).await;
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("blob {} is corrupt under {}", sha256, src_root.display()),
            )
            .into());
        }

        let placement = self.place(sha256, &ingested.temp_path, dst_root).await?;
        Ok(placement.created)
    }

    /// Open a blob for streaming out.
    pub async fn open(&self, sha256: &str, root: &Path) -> StoreResult<File> {
        let path = self.locate(sha256, root)?;
        File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(format!("blob `{}`", sha256))
            } else {
                StoreError::StorageIo(err)
            }
        })
    }

    /// Drop a temp file produced by [`ObjectStore::ingest`] that will not be placed.
    pub async fn discard(&self, temp_path: &Path) {
        discard(temp_path).await;
    }
}

async fn discard(temp_path: &Path) {
    if let Err(err) = fs::remove_file(temp_path).await {
        if err.kind() != ErrorKind::NotFound {
            debug!("failed to remove temp file {}: {}", temp_path.display(), err);
        }
    }
}

/// Remove empty directories from `start` upwards, stopping below `stop`.
pub async fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match fs::remove_dir(&current).await {
            Ok(_) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn chunks(parts: &[&str]) -> impl Stream<Item = io::Result<Bytes>> + use<> {
        let parts: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(parts)
    }

    fn count_files(dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() { count_files(&path) } else { 1 }
            })
            .sum()
    }

    #[tokio::test]
    async fn ingest_hashes_and_place_shards_by_digest() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path(), DedupScope::Box);
        let cancel = CancellationToken::new();

        let ingested = store
            .ingest(dir.path(), chunks(&["hel", "lo"]), &cancel)
            .await
            .unwrap();
        assert_eq!(ingested.sha256, HELLO_SHA256);
        assert_eq!(ingested.sha512.len(), 128);
        assert_eq!(ingested.size, 5);

        let placement = store
            .place(&ingested.sha256, &ingested.temp_path, dir.path())
            .await
            .unwrap();
        assert!(placement.created);
        assert_eq!(
            placement.path,
            dir.path().join("2c").join("f2").join(HELLO_SHA256)
        );
        assert_eq!(std::fs::read(&placement.path).unwrap(), b"hello");
        assert!(!ingested.temp_path.exists());
    }

    #[tokio::test]
    async fn identical_content_is_stored_once() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path(), DedupScope::Box);
        let cancel = CancellationToken::new();

        let mut paths = Vec::new();
        for parts in [vec!["hello"], vec!["he", "llo"]] {
            let ingested = store
                .ingest(dir.path(), chunks(&parts), &cancel)
                .await
                .unwrap();
            let placement = store
                .place(&ingested.sha256, &ingested.temp_path, dir.path())
                .await
                .unwrap();
            paths.push((placement.path, placement.created));
        }

        assert_eq!(paths[0].0, paths[1].0);
        assert!(paths[0].1);
        assert!(!paths[1].1);
        assert_eq!(count_files(dir.path()), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_prunes_shards() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path(), DedupScope::Box);
        let cancel = CancellationToken::new();

        let ingested = store
            .ingest(dir.path(), chunks(&["hello"]), &cancel)
            .await
            .unwrap();
        store
            .place(&ingested.sha256, &ingested.temp_path, dir.path())
            .await
            .unwrap();

        assert!(store.remove(HELLO_SHA256, dir.path()).await.unwrap());
        assert!(!dir.path().join("2c").exists());
        assert!(dir.path().exists());
        assert!(!store.remove(HELLO_SHA256, dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn failed_or_cancelled_ingest_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path(), DedupScope::Box);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = store
            .ingest(dir.path(), stream::pending::<io::Result<Bytes>>(), &cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageIo(_)));

        let broken = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ]);
        let err = store
            .ingest(dir.path(), broken, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageIo(_)));
        assert_eq!(count_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn failed_placement_discards_the_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path(), DedupScope::Box);
        let ingested = store
            .ingest(dir.path(), chunks(&["hello"]), &CancellationToken::new())
            .await
            .unwrap();

        // a regular file where the root directory should be
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let err = store
            .place(&ingested.sha256, &ingested.temp_path, &blocked)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StorageIo(_)));
        assert!(!ingested.temp_path.exists());
        assert_eq!(count_files(dir.path()), 1);
    }

    #[test]
    fn locate_is_pure_and_rejects_bad_digests() {
        let store = ObjectStore::new("/nonexistent", DedupScope::Box);
        let root = Path::new("/nonexistent/box");
        let path = store.locate(HELLO_SHA256, root).unwrap();
        assert_eq!(path, root.join("2c/f2").join(HELLO_SHA256));

        assert!(store.locate("abc", root).is_err());
        assert!(store.locate(&"../".repeat(22)[..64], root).is_err());
        assert!(store.locate(&HELLO_SHA256.to_uppercase(), root).is_err());
    }

    #[tokio::test]
    async fn copy_between_only_writes_when_destination_lacks_blob() {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path(), DedupScope::Box);
        let cancel = CancellationToken::new();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");

        let ingested = store.ingest(&src, chunks(&["hello"]), &cancel).await.unwrap();
        store
            .place(&ingested.sha256, &ingested.temp_path, &src)
            .await
            .unwrap();

        assert!(store.copy_between(HELLO_SHA256, &src, &dst, &cancel).await.unwrap());
        assert!(!store.copy_between(HELLO_SHA256, &src, &dst, &cancel).await.unwrap());
        assert!(store.contains(HELLO_SHA256, &src).await.unwrap());
        assert_eq!(count_files(&dst), 1);

        let missing = "0".repeat(64);
        let err = store
            .copy_between(&missing, &src, &dst, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn scope_decides_the_blob_root() {
        let record = StorageBox::new("docs", "/data/boxes/docs-id", Default::default());
        let per_box = ObjectStore::new("/data/boxes", DedupScope::Box);
        assert_eq!(per_box.root_for(&record), PathBuf::from("/data/boxes/docs-id"));
        let global = ObjectStore::new("/data/boxes", DedupScope::Global);
        assert_eq!(global.root_for(&record), PathBuf::from("/data/boxes/objects"));
    }
}
