//! Uploads, folder creation and downloads addressed by box name and user path.

use crate::{
    errors::{StoreError, StoreResult},
    models::{
        item::{Item, extension_of},
        properties::Properties,
        storage_box::StorageBox,
    },
    repository::Catalog,
    services::{
        janitor_service::Reclaimer,
        object_store::ObjectStore,
        path_tree::{self, PathTree},
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{io, sync::Arc};
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct FileService<C> {
    catalog: Arc<C>,
    tree: PathTree<C>,
    store: ObjectStore,
    reclaimer: Reclaimer<C>,
}

impl<C> Clone for FileService<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            tree: self.tree.clone(),
            store: self.store.clone(),
            reclaimer: self.reclaimer.clone(),
        }
    }
}

impl<C: Catalog> FileService<C> {
    pub fn new(catalog: Arc<C>, store: ObjectStore, reclaimer: Reclaimer<C>) -> Self {
        let tree = PathTree::new(catalog.clone());
        Self {
            catalog,
            tree,
            store,
            reclaimer,
        }
    }

    /// Parent of a new item: the materialized folder chain, or the box root
    /// for flat uploads.
    async fn parent_for(
        &self,
        record: &StorageBox,
        user_path: &str,
        flat: bool,
    ) -> StoreResult<(Option<Item>, String)> {
        let (_, name) = path_tree::split_parent(user_path)?;
        if flat {
            return Ok((None, name));
        }
        let parent = self.tree.ensure_parents(record, user_path).await?;
        Ok((parent, name))
    }

    /// Stream a file into the box at `user_path`.
    ///
    /// Missing parent folders are created. Uploading over an existing file
    /// keeps its id and replaces content and properties; the previous blob is
    /// released if nothing else references it.
    pub async fn upload_file<S>(
        &self,
        box_name: &str,
        user_path: &str,
        flat: bool,
        properties: Properties,
        stream: S,
        cancel: &CancellationToken,
    ) -> StoreResult<Item>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let record = self.tree.find_box(box_name).await?;
        let (parent, name) = self.parent_for(&record, user_path, flat).await?;
        let path = path_tree::child_path(parent.as_ref().map(|p| p.path.as_str()), &name);
        let root = self.store.root_for(&record);

        let ingested = self.store.ingest(&root, stream, cancel).await?;
        let existing = match self.catalog.find_item_by_path(&path, record.id).await {
            Ok(existing) => existing,
            Err(err) => {
                self.store.discard(&ingested.temp_path).await;
                return Err(err);
            }
        };
        if existing.as_ref().is_some_and(Item::is_folder) {
            self.store.discard(&ingested.temp_path).await;
            return Err(StoreError::AlreadyExists(format!(
                "folder `{}` in box `{}`",
                user_path, record.name
            )));
        }

        let content = ingested.content();
        self.store
            .place(&content.sha256, &ingested.temp_path, &root)
            .await?;

        let saved = match existing {
            Some(mut item) => {
                let previous = std::mem::replace(&mut item.sha256, content.sha256.clone());
                item.sha512 = content.sha512.clone();
                item.size = content.size;
                item.extension = extension_of(&name);
                item.properties = properties;
                match self.catalog.update_item(&item).await {
                    Ok(()) => {
                        if previous != item.sha256 {
                            self.release(&record, &previous).await;
                        }
                        Ok(item)
                    }
                    Err(err) => Err(err),
                }
            }
            None => {
                let item = Item::new_file(
                    record.id,
                    parent.as_ref().map(|p| p.id),
                    &name,
                    path,
                    &content,
                    properties,
                );
                self.catalog.create_item(&item).await.map(|()| item)
            }
        };

        match saved {
            Ok(item) => {
                info!(
                    "stored {} ({} bytes) in box {}",
                    user_path, item.size, record.name
                );
                Ok(item)
            }
            Err(err) => {
                // The blob may have been written for this upload alone.
                self.release(&record, &content.sha256).await;
                Err(err)
            }
        }
    }

    /// Create (or return the existing) folder at `user_path`.
    pub async fn create_folder(
        &self,
        box_name: &str,
        user_path: &str,
        flat: bool,
        properties: Properties,
    ) -> StoreResult<Item> {
        let record = self.tree.find_box(box_name).await?;
        let (parent, name) = self.parent_for(&record, user_path, flat).await?;
        let mut folder = self
            .tree
            .get_or_create_folder(&record, parent.as_ref(), &name)
            .await?;
        if !properties.is_empty() {
            folder.properties = properties;
            self.catalog.update_item(&folder).await?;
        }
        Ok(folder)
    }

    /// Open the content of the file at `user_path` for streaming.
    pub async fn download(&self, box_name: &str, user_path: &str) -> StoreResult<(Item, File)> {
        let (record, node) = self.tree.resolve(box_name, user_path).await?;
        let item = node.into_item(user_path)?;
        if item.is_folder() {
            return Err(StoreError::InvalidRequest(format!(
                "`{}` is a folder and cannot be downloaded",
                user_path
            )));
        }
        let file = self
            .store
            .open(&item.sha256, &self.store.root_for(&record))
            .await?;
        Ok((item, file))
    }

    async fn release(&self, record: &StorageBox, sha256: &str) {
        if let Err(err) = self.reclaimer.release_blob(record, sha256).await {
            warn!(blob = %sha256, error = %err, "failed to release blob");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DedupScope,
        models::properties::PropertyValue,
        repository::SqliteCatalog,
        services::test_support::{Fixture, file_count},
    };
    use futures::stream;
    use tokio::io::AsyncReadExt;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn service(fx: &Fixture) -> FileService<SqliteCatalog> {
        let reclaimer = Reclaimer::new(fx.catalog.clone(), fx.store.clone());
        FileService::new(fx.catalog.clone(), fx.store.clone(), reclaimer)
    }

    fn body(content: &str) -> impl Stream<Item = io::Result<Bytes>> + Send + use<> {
        stream::iter(vec![Ok(Bytes::copy_from_slice(content.as_bytes()))])
    }

    #[tokio::test]
    async fn upload_creates_parents_and_one_sharded_blob() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let files = service(&fx);
        let cancel = CancellationToken::new();

        let a = files
            .upload_file("docs", "folder/a.txt", false, Properties::new(), body("hello"), &cancel)
            .await
            .unwrap();
        assert!(a.is_file());
        assert_eq!(a.size, 5);
        assert_eq!(a.sha256, HELLO_SHA256);
        assert_eq!(a.extension.as_deref(), Some("txt"));
        let folder = fx.tree.find_in(&docs, "folder").await.unwrap().unwrap();
        assert_eq!(a.parent_id, Some(folder.id));

        let root = fx.store.root_for(&docs);
        assert!(root.join("2c").join("f2").join(HELLO_SHA256).is_file());

        let b = files
            .upload_file("docs", "folder/b.txt", false, Properties::new(), body("hello"), &cancel)
            .await
            .unwrap();
        assert_eq!(b.sha256, a.sha256);
        assert_ne!(b.id, a.id);
        assert_eq!(file_count(&root), 1);
    }

    #[tokio::test]
    async fn reupload_keeps_id_and_releases_old_blob() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let files = service(&fx);
        let cancel = CancellationToken::new();

        let first = files
            .upload_file("docs", "a.txt", false, Properties::new(), body("hello"), &cancel)
            .await
            .unwrap();
        let mut props = Properties::new();
        props.insert("rev", PropertyValue::Integer(2));
        let second = files
            .upload_file("docs", "a.txt", false, props, body("hello again"), &cancel)
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_ne!(second.sha256, first.sha256);
        assert_eq!(second.properties.get("rev"), Some(&PropertyValue::Integer(2)));
        let root = fx.store.root_for(&docs);
        assert!(!fx.store.contains(HELLO_SHA256, &root).await.unwrap());
        assert_eq!(file_count(&root), 1);
    }

    #[tokio::test]
    async fn flat_upload_ignores_parent_segments() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let files = service(&fx);

        let item = files
            .upload_file(
                "docs",
                "deep/nested/a.txt",
                true,
                Properties::new(),
                body("x"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(item.parent_id, None);
        assert_eq!(path_tree::to_user_path(&item), "a.txt");
        assert!(fx.tree.find_in(&docs, "deep").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_cannot_replace_a_folder() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let files = service(&fx);
        files
            .create_folder("docs", "reports", false, Properties::new())
            .await
            .unwrap();

        let err = files
            .upload_file("docs", "reports", false, Properties::new(), body("x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(file_count(&fx.store.root_for(&docs)), 0);
    }

    #[tokio::test]
    async fn create_folder_is_idempotent() {
        let fx = Fixture::new(DedupScope::Box).await;
        fx.create_box("docs").await;
        let files = service(&fx);

        let first = files
            .create_folder("docs", "a/b", false, Properties::new())
            .await
            .unwrap();
        let second = files
            .create_folder("docs", "a/b", false, Properties::new())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_folder());
    }

    #[tokio::test]
    async fn download_streams_content_and_rejects_folders() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        fx.put_file(&docs, "folder/a.txt", "hello").await;
        let files = service(&fx);

        let (item, mut file) = files.download("docs", "folder/a.txt").await.unwrap();
        let mut content = String::new();
        file.read_to_string(&mut content).await.unwrap();
        assert_eq!(item.name, "a.txt");
        assert_eq!(content, "hello");

        assert!(matches!(
            files.download("docs", "folder").await,
            Err(StoreError::InvalidRequest(_))
        ));
        assert!(matches!(
            files.download("docs", "missing.txt").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            files.download("nope", "a.txt").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
