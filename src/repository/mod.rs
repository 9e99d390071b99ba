//! Persistence boundary for boxes and items.
//!
//! The core services only talk to the catalog through [`Catalog`]; the SQLite
//! backend in [`sqlite`] is the implementation wired up by `main`.
//!
//! Paths handed to and returned by a catalog are always in the internal
//! materialized encoding produced by `services::path_tree`.

pub mod sqlite;

use crate::{
    errors::StoreResult,
    models::{item::Item, storage_box::StorageBox},
    services::query_filter::Filter,
};
use std::future::Future;
use uuid::Uuid;

pub use sqlite::SqliteCatalog;

pub trait Catalog: Send + Sync + 'static {
    // --- Boxes ---

    fn create_box(&self, record: &StorageBox) -> impl Future<Output = StoreResult<()>> + Send;

    /// Looks up a box by id, including soft-deleted boxes.
    fn find_box_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<StorageBox>>> + Send;

    /// Looks up a live box by name.
    fn find_box_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = StoreResult<Option<StorageBox>>> + Send;

    fn find_all_boxes(&self) -> impl Future<Output = StoreResult<Vec<StorageBox>>> + Send;

    fn update_box(&self, record: &StorageBox) -> impl Future<Output = StoreResult<()>> + Send;

    /// Soft-deletes a box. Returns false when no live box had that id.
    fn delete_box(&self, id: Uuid) -> impl Future<Output = StoreResult<bool>> + Send;

    fn find_deleted_boxes(&self) -> impl Future<Output = StoreResult<Vec<StorageBox>>> + Send;

    /// Soft-deletes every live item of a box, returning how many were marked.
    fn soft_delete_box_items(&self, box_id: Uuid)
    -> impl Future<Output = StoreResult<u64>> + Send;

    /// Counts every item row of a box, live or soft-deleted.
    fn count_box_items(&self, box_id: Uuid) -> impl Future<Output = StoreResult<i64>> + Send;

    fn hard_delete_box(&self, id: Uuid) -> impl Future<Output = StoreResult<()>> + Send;

    // --- Items ---

    fn create_item(&self, item: &Item) -> impl Future<Output = StoreResult<()>> + Send;

    /// Looks up a live item by id.
    fn find_item_by_id(&self, id: Uuid) -> impl Future<Output = StoreResult<Option<Item>>> + Send;

    fn find_all_items(&self) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    /// Persists name, path, parent, content and properties of an existing item.
    fn update_item(&self, item: &Item) -> impl Future<Output = StoreResult<()>> + Send;

    /// Persists a renamed/moved item and rewrites the materialized path of
    /// every descendant from `old_path` to `item.path` in one transaction.
    fn relocate_item(
        &self,
        item: &Item,
        old_path: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Soft-deletes an item together with its whole subtree.
    fn soft_delete_item(&self, item: &Item) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Removes an item row; for folders the entire subtree goes with it.
    /// Deleting rows that are already gone is not an error.
    fn hard_delete_item(&self, item: &Item) -> impl Future<Output = StoreResult<u64>> + Send;

    fn find_item_by_path(
        &self,
        path: &str,
        box_id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<Item>>> + Send;

    fn find_children(
        &self,
        parent_id: Option<Uuid>,
        box_id: Uuid,
    ) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    fn find_folder_by_name_and_parent(
        &self,
        name: &str,
        parent_id: Option<Uuid>,
        box_id: Uuid,
    ) -> impl Future<Output = StoreResult<Option<Item>>> + Send;

    fn find_soft_deleted(&self) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    /// Live descendants of `item`, bounded to `max_depth` levels below it
    /// (`max_depth < 0` means unbounded).
    fn find_descendants(
        &self,
        item: &Item,
        max_depth: i32,
    ) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    /// Every row in the subtree rooted at `item` (the item included),
    /// regardless of deletion state.
    fn find_subtree(&self, item: &Item) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    fn search_items(
        &self,
        filter: &Filter,
        order: &str,
        limit: i64,
        offset: i64,
    ) -> impl Future<Output = StoreResult<Vec<Item>>> + Send;

    /// Number of live file items referencing `sha256`, optionally limited to one box.
    fn count_live_by_digest(
        &self,
        sha256: &str,
        box_id: Option<Uuid>,
    ) -> impl Future<Output = StoreResult<i64>> + Send;

    /// Cheap connectivity probe.
    fn ping(&self) -> impl Future<Output = StoreResult<()>> + Send;
}
