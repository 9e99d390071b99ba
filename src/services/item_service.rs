//! Item queries and metadata updates: lookup, search, listings, descendant
//! trees, property edits, renames and delete requests.

use crate::{
    errors::{StoreError, StoreResult},
    models::{
        item::{Item, ItemView, extension_of},
        properties::Properties,
    },
    repository::Catalog,
    services::{
        path_tree::{self, Node, PathTree},
        query_filter,
    },
};
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tracing::info;
use uuid::Uuid;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Paging and ordering for [`ItemService::search`].
#[derive(Debug, Default, Clone)]
pub struct SearchParams {
    pub filter: Option<String>,
    pub orderby: Option<String>,
    pub limit: Option<i64>,
    pub skip: Option<i64>,
}

pub struct ItemService<C> {
    catalog: Arc<C>,
    tree: PathTree<C>,
}

impl<C> Clone for ItemService<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            tree: self.tree.clone(),
        }
    }
}

impl<C: Catalog> ItemService<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        let tree = PathTree::new(catalog.clone());
        Self { catalog, tree }
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Item> {
        self.catalog
            .find_item_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("item `{}`", id)))
    }

    pub async fn list_all(&self) -> StoreResult<Vec<Item>> {
        self.catalog.find_all_items().await
    }

    /// Items waiting for the janitor.
    pub async fn list_deleted(&self) -> StoreResult<Vec<Item>> {
        self.catalog.find_soft_deleted().await
    }

    /// Filtered, ordered and paged search over live items.
    pub async fn search(&self, params: &SearchParams) -> StoreResult<Vec<Item>> {
        let filter = match params.filter.as_deref() {
            Some(expr) => query_filter::translate(expr)?,
            None => query_filter::Filter::all(),
        };
        let order = query_filter::order_clause(params.orderby.as_deref().unwrap_or(""))?;
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let skip = params.skip.unwrap_or(0).max(0);
        self.catalog.search_items(&filter, &order, limit, skip).await
    }

    /// The item with its descendants nested `level` deep (`< 0` unbounded).
    pub async fn tree(&self, id: Uuid, level: i32) -> StoreResult<Item> {
        let root = self.get(id).await?;
        if root.is_file() || level == 0 {
            return Ok(root);
        }
        let descendants = self.tree.descendants_of(&root, level).await?;

        let mut by_parent: HashMap<Uuid, Vec<Item>> = HashMap::new();
        for item in descendants {
            if let Some(parent_id) = item.parent_id {
                by_parent.entry(parent_id).or_default().push(item);
            }
        }
        Ok(attach_children(root, &mut by_parent))
    }

    /// View of the node at `user_path` with its direct children.
    pub async fn list_path(&self, box_name: &str, user_path: &str) -> StoreResult<ItemView> {
        let (record, node) = self.tree.resolve(box_name, user_path).await?;
        let children = self.tree.children_of(&record, &node).await?;
        Ok(match node {
            Node::Root => ItemView::root(record.id, &record.name, &children),
            Node::Item(mut item) => {
                item.children = children;
                ItemView::from(&item)
            }
        })
    }

    pub async fn get_properties(&self, box_name: &str, user_path: &str) -> StoreResult<Properties> {
        let (_, node) = self.tree.resolve(box_name, user_path).await?;
        Ok(node.into_item(user_path)?.properties)
    }

    /// Replace the property bag of the item at `user_path`.
    pub async fn update_properties(
        &self,
        box_name: &str,
        user_path: &str,
        properties: Properties,
    ) -> StoreResult<Item> {
        let (_, node) = self.tree.resolve(box_name, user_path).await?;
        let mut item = node.into_item(user_path)?;
        item.properties = properties;
        item.updated_at = Utc::now();
        self.catalog.update_item(&item).await?;
        Ok(item)
    }

    /// Rename an item and/or replace its properties. Renaming a folder
    /// rewrites the paths of everything below it.
    pub async fn update(
        &self,
        id: Uuid,
        name: Option<String>,
        properties: Option<Properties>,
    ) -> StoreResult<Item> {
        let mut item = self.get(id).await?;
        if let Some(properties) = properties {
            item.properties = properties;
        }
        item.updated_at = Utc::now();

        let Some(name) = name.filter(|name| *name != item.name) else {
            self.catalog.update_item(&item).await?;
            return Ok(item);
        };
        path_tree::validate_name(&name).map_err(|reason| StoreError::invalid_path(&name, reason))?;

        let parent_path = match item.parent_id {
            Some(parent_id) => Some(self.get(parent_id).await?.path),
            None => None,
        };
        let path = path_tree::child_path(parent_path.as_deref(), &name);
        if self.catalog.find_item_by_path(&path, item.box_id).await?.is_some() {
            return Err(StoreError::AlreadyExists(format!("item `{}`", name)));
        }

        let old_path = std::mem::replace(&mut item.path, path);
        if item.is_file() {
            item.extension = extension_of(&name);
        }
        info!("renamed {} to {}", item.name, name);
        item.name = name;
        self.catalog.relocate_item(&item, &old_path).await?;
        Ok(item)
    }

    /// Soft-delete the item at `user_path`. Folders need `force`, and then
    /// take their whole subtree with them.
    pub async fn request_delete(&self, box_name: &str, user_path: &str, force: bool) -> StoreResult<u64> {
        let (record, node) = self.tree.resolve(box_name, user_path).await?;
        let item = node.into_item(user_path)?;
        if item.is_folder() && !force {
            return Err(StoreError::InvalidRequest(format!(
                "`{}` is a folder; pass force to delete it with its contents",
                user_path
            )));
        }
        let marked = self.catalog.soft_delete_item(&item).await?;
        info!(
            "marked {} item(s) under {} in box {} for deletion",
            marked, user_path, record.name
        );
        Ok(marked)
    }
}

fn attach_children(mut item: Item, by_parent: &mut HashMap<Uuid, Vec<Item>>) -> Item {
    if let Some(children) = by_parent.remove(&item.id) {
        item.children = children
            .into_iter()
            .map(|child| attach_children(child, by_parent))
            .collect();
    }
    item
}
