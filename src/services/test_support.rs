//! Shared fixtures for service tests.

use crate::{
    config::DedupScope,
    models::{item::Item, properties::Properties, storage_box::StorageBox},
    repository::{Catalog, SqliteCatalog},
    services::{object_store::ObjectStore, path_tree::{self, PathTree}},
};
use bytes::Bytes;
use futures::stream;
use std::{io, path::Path, sync::Arc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct Fixture {
    pub dir: TempDir,
    pub catalog: Arc<SqliteCatalog>,
    pub store: ObjectStore,
    pub tree: PathTree<SqliteCatalog>,
}

impl Fixture {
    pub async fn new(scope: DedupScope) -> Self {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(SqliteCatalog::in_memory().await.unwrap());
        let store = ObjectStore::new(dir.path(), scope);
        let tree = PathTree::new(catalog.clone());
        Self {
            dir,
            catalog,
            store,
            tree,
        }
    }

    pub async fn create_box(&self, name: &str) -> StorageBox {
        let mut record = StorageBox::new(name, "", Properties::default());
        let root = self.store.box_dir(record.id);
        std::fs::create_dir_all(&root).unwrap();
        record.path = root.to_string_lossy().into_owned();
        self.catalog.create_box(&record).await.unwrap();
        record
    }

    /// Store `content` at `user_path`, creating parent folders.
    pub async fn put_file(&self, record: &StorageBox, user_path: &str, content: &str) -> Item {
        let parent = self.tree.ensure_parents(record, user_path).await.unwrap();
        let root = self.store.root_for(record);
        let chunks = stream::iter(vec![Ok::<_, io::Error>(Bytes::copy_from_slice(
            content.as_bytes(),
        ))]);
        let ingested = self
            .store
            .ingest(&root, chunks, &CancellationToken::new())
            .await
            .unwrap();
        self.store
            .place(&ingested.sha256, &ingested.temp_path, &root)
            .await
            .unwrap();

        let (_, name) = path_tree::split_parent(user_path).unwrap();
        let item = Item::new_file(
            record.id,
            parent.as_ref().map(|p| p.id),
            &name,
            path_tree::child_path(parent.as_ref().map(|p| p.path.as_str()), &name),
            &ingested.content(),
            Properties::default(),
        );
        self.catalog.create_item(&item).await.unwrap();
        item
    }
}

/// Number of regular files below `dir`.
pub fn file_count(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() { file_count(&path) } else { 1 }
        })
        .sum()
}
