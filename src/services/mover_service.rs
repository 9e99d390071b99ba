//! Copy and move of items and folder subtrees, within or across boxes.
//!
//! Addresses are `box/path/to/item`. A copied file gets a new row pointing at
//! the same digests as its source; bytes are only copied when the destination
//! root does not hold that blob yet. A same-box move is a pure metadata
//! update. A cross-box move is a copy followed by reclaiming the source, so a
//! crash between the two steps leaves both copies in place.

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
        path_tree::{self, PathTree, SEPARATOR},
    },
};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Result of a copy or move: the top item at its destination and the number
/// of descendants that could not be copied.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub item: Item,
    pub skipped: usize,
}

pub struct Mover<C> {
    catalog: Arc<C>,
    tree: PathTree<C>,
    store: ObjectStore,
    reclaimer: Reclaimer<C>,
}

impl<C> Clone for Mover<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            tree: self.tree.clone(),
            store: self.store.clone(),
            reclaimer: self.reclaimer.clone(),
        }
    }
}

/// A resolved source item and the destination it should land at.
struct Plan {
    src_box: StorageBox,
    item: Item,
    dst_box: StorageBox,
    dst_path: String,
}

impl<C: Catalog> Mover<C> {
    pub fn new(catalog: Arc<C>, store: ObjectStore, reclaimer: Reclaimer<C>) -> Self {
        let tree = PathTree::new(catalog.clone());
        Self {
            catalog,
            tree,
            store,
            reclaimer,
        }
    }

    /// Copy `source` to `destination`. The source is never modified.
    pub async fn copy(
        &self,
        source: &str,
        destination: &str,
        properties: Option<Properties>,
        cancel: &CancellationToken,
    ) -> StoreResult<Transfer> {
        let plan = self.plan(source, destination).await?;
        let transfer = self.copy_planned(&plan, properties, cancel).await?;
        info!(
            "copied {} to {} ({} skipped)",
            source, destination, transfer.skipped
        );
        Ok(transfer)
    }

    /// Move `source` to `destination`.
    pub async fn move_item(
        &self,
        source: &str,
        destination: &str,
        properties: Option<Properties>,
        cancel: &CancellationToken,
    ) -> StoreResult<Transfer> {
        let plan = self.plan(source, destination).await?;

        if plan.src_box.id == plan.dst_box.id {
            let item = self.relocate(&plan, properties).await?;
            info!("moved {} to {}", source, destination);
            return Ok(Transfer { item, skipped: 0 });
        }

        let transfer = self.copy_planned(&plan, properties, cancel).await?;
        if transfer.skipped > 0 {
            warn!(
                "{} descendants of {} failed to copy; keeping the source",
                transfer.skipped, source
            );
            return Ok(transfer);
        }

        let reclaimed = self.reclaimer.reclaim_tree(&plan.src_box, &plan.item).await?;
        info!(
            "moved {} to {} ({} rows and {} blobs reclaimed at the source)",
            source, destination, reclaimed.rows, reclaimed.blobs_removed
        );
        Ok(transfer)
    }

    async fn plan(&self, source: &str, destination: &str) -> StoreResult<Plan> {
        let (src_box_name, src_path) = path_tree::split_address(source)?;
        let (src_box, node) = self.tree.resolve(&src_box_name, &src_path).await?;
        let item = node.into_item(&src_path)?;

        let (dst_box_name, dst_path) = path_tree::split_address(destination)?;
        let dst_box = self.tree.find_box(&dst_box_name).await?;

        if src_box.id == dst_box.id && item.is_folder() {
            let internal = path_tree::to_internal_path(&dst_path)?;
            if internal.starts_with(&format!("{}{}", item.path, SEPARATOR)) {
                return Err(StoreError::invalid_path(
                    destination,
                    "a folder cannot be placed inside itself",
                ));
            }
        }
        if self.tree.find_in(&dst_box, &dst_path).await?.is_some() {
            return Err(StoreError::AlreadyExists(format!(
                "item `{}` in box `{}`",
                dst_path, dst_box.name
            )));
        }

        Ok(Plan {
            src_box,
            item,
            dst_box,
            dst_path,
        })
    }

    async fn copy_planned(
        &self,
        plan: &Plan,
        properties: Option<Properties>,
        cancel: &CancellationToken,
    ) -> StoreResult<Transfer> {
        let parent = self.tree.ensure_parents(&plan.dst_box, &plan.dst_path).await?;
        let (_, name) = path_tree::split_parent(&plan.dst_path)?;
        let properties = properties.unwrap_or_else(|| plan.item.properties.clone());
        self.copy_node(
            &plan.src_box,
            &plan.item,
            &plan.dst_box,
            parent.as_ref(),
            &name,
            properties,
            cancel,
        )
        .await
    }

    /// Copy one item below `parent`; folders recurse one level at a time.
    #[allow(clippy::too_many_arguments)]
    fn copy_node<'a>(
        &'a self,
        src_box: &'a StorageBox,
        item: &'a Item,
        dst_box: &'a StorageBox,
        parent: Option<&'a Item>,
        name: &'a str,
        properties: Properties,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, StoreResult<Transfer>> {
        async move {
            let path = path_tree::child_path(parent.map(|p| p.path.as_str()), name);
            let parent_id = parent.map(|p| p.id);

            if item.is_file() {
                let copy =
                    Item::new_file(dst_box.id, parent_id, name, path, &item.content(), properties);
                self.catalog.create_item(&copy).await?;

                let placed = self
                    .store
                    .copy_between(
                        &item.sha256,
                        &self.store.root_for(src_box),
                        &self.store.root_for(dst_box),
                        cancel,
                    )
                    .await;
                if let Err(err) = placed {
                    return Err(self.compensate(&copy, err).await);
                }
                return Ok(Transfer {
                    item: copy,
                    skipped: 0,
                });
            }

            let mut folder = Item::new_folder(dst_box.id, parent_id, name, path);
            folder.properties = properties;
            self.catalog.create_item(&folder).await?;

            let mut skipped = 0;
            for child in self.catalog.find_children(Some(item.id), src_box.id).await? {
                let outcome = self
                    .copy_node(
                        src_box,
                        &child,
                        dst_box,
                        Some(&folder),
                        &child.name,
                        child.properties.clone(),
                        cancel,
                    )
                    .await;
                match outcome {
                    Ok(done) => skipped += done.skipped,
                    Err(err) => {
                        warn!(item = %child.id, name = %child.name, error = %err, "skipping child during copy");
                        skipped += 1;
                    }
                }
            }

            Ok(Transfer {
                item: folder,
                skipped,
            })
        }
        .boxed()
    }

    /// Undo a just-inserted row after its blob could not be placed.
    async fn compensate(&self, inserted: &Item, err: StoreError) -> StoreError {
        match self.catalog.hard_delete_item(inserted).await {
            Ok(_) => err,
            Err(cleanup) => {
                error!(
                    item = %inserted.id,
                    error = %err,
                    cleanup = %cleanup,
                    "blob copy failed and the new row could not be removed"
                );
                StoreError::Compensation {
                    source: Box::new(err),
                    cleanup: Box::new(cleanup),
                }
            }
        }
    }

    /// Rename/reparent within one box. Descendant paths follow the item.
    async fn relocate(&self, plan: &Plan, properties: Option<Properties>) -> StoreResult<Item> {
        let parent = self.tree.ensure_parents(&plan.dst_box, &plan.dst_path).await?;
        let (_, name) = path_tree::split_parent(&plan.dst_path)?;

        let mut item = plan.item.clone();
        let old_path = std::mem::replace(
            &mut item.path,
            path_tree::child_path(parent.as_ref().map(|p| p.path.as_str()), &name),
        );
        item.parent_id = parent.map(|p| p.id);
        if item.is_file() {
            item.extension = extension_of(&name);
        }
        item.name = name;
        if let Some(properties) = properties {
            item.properties = properties;
        }

        self.catalog.relocate_item(&item, &old_path).await?;
        Ok(item)
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

    fn mover(fx: &Fixture) -> Mover<SqliteCatalog> {
        let reclaimer = Reclaimer::new(fx.catalog.clone(), fx.store.clone());
        Mover::new(fx.catalog.clone(), fx.store.clone(), reclaimer)
    }

    #[tokio::test]
    async fn cross_box_copy_shares_digest_and_copies_blob_once() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let archive = fx.create_box("archive").await;
        let source = fx.put_file(&docs, "folder/a.txt", "hello").await;
        let cancel = CancellationToken::new();
        let mover = mover(&fx);

        let copied = mover
            .copy("docs/folder/a.txt", "archive/copy.txt", None, &cancel)
            .await
            .unwrap();
        assert_eq!(copied.item.box_id, archive.id);
        assert_eq!(copied.item.sha256, source.sha256);
        assert_eq!(copied.item.size, 5);
        assert_eq!(copied.item.extension.as_deref(), Some("txt"));
        assert_eq!(file_count(&fx.store.root_for(&archive)), 1);

        mover
            .copy("docs/folder/a.txt", "archive/again/copy.txt", None, &cancel)
            .await
            .unwrap();
        assert_eq!(file_count(&fx.store.root_for(&archive)), 1);

        // Source row and blob are untouched.
        let still = fx.tree.find_in(&docs, "folder/a.txt").await.unwrap().unwrap();
        assert_eq!(still.id, source.id);
        assert_eq!(file_count(&fx.store.root_for(&docs)), 1);
    }

    #[tokio::test]
    async fn copy_refuses_occupied_destination() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        fx.put_file(&docs, "a.txt", "hello").await;
        fx.put_file(&docs, "b.txt", "world").await;

        let err = mover(&fx)
            .copy("docs/a.txt", "docs/b.txt", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));

        let err = mover(&fx)
            .copy("docs/missing.txt", "docs/c.txt", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn folder_copy_recreates_the_subtree() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let archive = fx.create_box("archive").await;
        fx.put_file(&docs, "reports/2025/q1.txt", "q1").await;
        fx.put_file(&docs, "reports/q2.txt", "q2").await;

        let mut tagged = Properties::new();
        tagged.insert("origin", PropertyValue::Text("docs".into()));
        let copied = mover(&fx)
            .copy("docs/reports", "archive/backup/reports", Some(tagged), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(copied.skipped, 0);
        assert!(copied.item.is_folder());
        assert!(copied.item.properties.get("origin").is_some());
        let q1 = fx
            .tree
            .find_in(&archive, "backup/reports/2025/q1.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q1.size, 2);
        let descendants = fx.tree.descendants_of(&copied.item, -1).await.unwrap();
        assert_eq!(descendants.len(), 3);
        assert_eq!(file_count(&fx.store.root_for(&archive)), 2);
    }

    #[tokio::test]
    async fn folder_cannot_be_copied_or_moved_into_itself() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        fx.put_file(&docs, "reports/q2.txt", "q2").await;
        let cancel = CancellationToken::new();

        for result in [
            mover(&fx).copy("docs/reports", "docs/reports/inner", None, &cancel).await,
            mover(&fx).move_item("docs/reports", "docs/reports/a/b", None, &cancel).await,
        ] {
            assert!(matches!(result, Err(StoreError::InvalidPath { .. })));
        }
    }

    #[tokio::test]
    async fn same_box_move_only_touches_metadata() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let source = fx.put_file(&docs, "inbox/a.txt", "hello").await;
        let root = fx.store.root_for(&docs);
        let blob = fx.store.locate(&source.sha256, &root).unwrap();

        let moved = mover(&fx)
            .move_item("docs/inbox/a.txt", "docs/done/a.md", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(moved.item.id, source.id);
        assert_eq!(moved.item.extension.as_deref(), Some("md"));
        assert!(fx.tree.find_in(&docs, "inbox/a.txt").await.unwrap().is_none());
        assert!(fx.tree.find_in(&docs, "done/a.md").await.unwrap().is_some());
        assert!(blob.exists());
        assert_eq!(file_count(&root), 1);
    }

    #[tokio::test]
    async fn folder_move_rewrites_descendant_paths() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        fx.put_file(&docs, "reports/2025/q1.txt", "q1").await;

        mover(&fx)
            .move_item("docs/reports", "docs/old/reports", None, &CancellationToken::new())
            .await
            .unwrap();

        let q1 = fx
            .tree
            .find_in(&docs, "old/reports/2025/q1.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path_tree::to_user_path(&q1), "old/reports/2025/q1.txt");
        assert!(fx.tree.find_in(&docs, "reports").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cross_box_move_reclaims_the_source() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let archive = fx.create_box("archive").await;
        fx.put_file(&docs, "reports/q1.txt", "q1").await;

        let moved = mover(&fx)
            .move_item("docs/reports", "archive/reports", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(moved.item.box_id, archive.id);
        assert!(fx.tree.find_in(&docs, "reports").await.unwrap().is_none());
        assert!(fx.tree.find_in(&archive, "reports/q1.txt").await.unwrap().is_some());
        assert_eq!(file_count(&fx.store.root_for(&docs)), 0);
        assert_eq!(file_count(&fx.store.root_for(&archive)), 1);
    }

    #[tokio::test]
    async fn failed_blob_copy_removes_the_new_row() {
        let fx = Fixture::new(DedupScope::Box).await;
        let docs = fx.create_box("docs").await;
        let archive = fx.create_box("archive").await;
        let source = fx.put_file(&docs, "a.txt", "hello").await;
        fx.store
            .remove(&source.sha256, &fx.store.root_for(&docs))
            .await
            .unwrap();

        let result = mover(&fx)
            .copy("docs/a.txt", "archive/a.txt", None, &CancellationToken::new())
            .await;

        assert!(result.is_err());
        assert!(fx.tree.find_in(&archive, "a.txt").await.unwrap().is_none());
    }
}
