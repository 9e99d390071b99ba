//! Hierarchical path model for boxes and items.
//!
//! Clients address items with slash-delimited paths (`reports/2025/q1.pdf`).
//! Internally each item stores a *materialized path*: every segment is
//! sanitized to `[A-Za-z0-9_]` and the segments are joined with [`SEPARATOR`].
//! Sanitizing escapes every byte outside `[A-Za-z0-9]` as `_XX` (upper-case
//! hex), so the encoding is lossless and [`to_user_path`] is its exact
//! inverse.

use crate::{
    errors::{StoreError, StoreResult},
    models::{item::Item, storage_box::StorageBox},
    repository::Catalog,
};
use std::sync::Arc;
use tracing::debug;

/// Joins sanitized segments of a materialized path.
pub const SEPARATOR: char = '.';

const ESCAPE: u8 = b'_';
const MAX_SEGMENT_LEN: usize = 255;

/// What a user path resolves to inside a box.
#[derive(Debug, Clone)]
pub enum Node {
    /// The synthetic root folder of a box. It is never stored.
    Root,
    Item(Item),
}

impl Node {
    /// The stored item, rejecting the synthetic root.
    pub fn into_item(self, user_path: &str) -> StoreResult<Item> {
        match self {
            Node::Item(item) => Ok(item),
            Node::Root => Err(StoreError::invalid_path(
                user_path,
                "the box root is not an item",
            )),
        }
    }
}

/// Split a user path into validated segments.
///
/// Leading and trailing slashes are ignored; an empty result denotes the box
/// root. Empty, `.` and `..` segments and control characters are rejected.
pub fn split_user_path(user_path: &str) -> StoreResult<Vec<&str>> {
    let trimmed = user_path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split('/')
        .map(|segment| {
            validate_name(segment).map_err(|reason| StoreError::invalid_path(user_path, reason))?;
            Ok(segment)
        })
        .collect()
}

/// Check that `name` is usable as a single path segment.
pub fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty path segment");
    }
    if name == "." || name == ".." {
        return Err("relative segments are not allowed");
    }
    if name.len() > MAX_SEGMENT_LEN {
        return Err("path segment is too long");
    }
    if name.contains('/') {
        return Err("segment contains a slash");
    }
    if name.chars().any(char::is_control) {
        return Err("segment contains control characters");
    }
    Ok(())
}

/// Escape a name into the identifier alphabet used by materialized paths.
pub fn sanitize_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(char::from(byte));
        } else {
            out.push(char::from(ESCAPE));
            out.push_str(&format!("{:02X}", byte));
        }
    }
    out
}

/// Reverse [`sanitize_segment`]. Returns `None` for malformed input.
pub fn decode_segment(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE {
            let hex = segment.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Translate a user path into its materialized form.
pub fn to_internal_path(user_path: &str) -> StoreResult<String> {
    let segments = split_user_path(user_path)?;
    if segments.is_empty() {
        return Err(StoreError::invalid_path(user_path, "path is empty"));
    }
    Ok(segments
        .iter()
        .map(|segment| sanitize_segment(segment))
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string()))
}

/// Materialized path of a child called `name` below `parent_path`.
pub fn child_path(parent_path: Option<&str>, name: &str) -> String {
    match parent_path {
        Some(parent) if !parent.is_empty() => {
            format!("{}{}{}", parent, SEPARATOR, sanitize_segment(name))
        }
        _ => sanitize_segment(name),
    }
}

/// User-facing path of a stored item.
///
/// For files the final segment is always the item's own `name`, so the result
/// never disagrees with it even if the stored path was produced elsewhere.
pub fn to_user_path(item: &Item) -> String {
    let mut parts: Vec<String> = item
        .path
        .split(SEPARATOR)
        .map(|segment| decode_segment(segment).unwrap_or_else(|| segment.to_string()))
        .collect();
    if item.is_file() {
        if let Some(last) = parts.last_mut() {
            *last = item.name.clone();
        }
    }
    parts.join("/")
}

/// User-path prefixes of every ancestor of `user_path`, outermost first.
///
/// `a/b/c.txt` yields `["a", "a/b"]`.
pub fn ancestors_of(user_path: &str) -> StoreResult<Vec<String>> {
    let segments = split_user_path(user_path)?;
    let mut prefixes = Vec::with_capacity(segments.len().saturating_sub(1));
    let mut current = String::new();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    Ok(prefixes)
}

/// Split a user path into its parent path (`None` at top level) and leaf name.
pub fn split_parent(user_path: &str) -> StoreResult<(Option<String>, String)> {
    let segments = split_user_path(user_path)?;
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(StoreError::invalid_path(user_path, "path is empty"));
    };
    let parent = if parents.is_empty() {
        None
    } else {
        Some(parents.join("/"))
    };
    Ok((parent, leaf.to_string()))
}

/// Split a `box/path/to/item` address into the box name and the item path.
pub fn split_address(address: &str) -> StoreResult<(String, String)> {
    let trimmed = address.trim_matches('/');
    match trimmed.split_once('/') {
        Some((box_name, item_path)) if !box_name.is_empty() && !item_path.is_empty() => {
            Ok((box_name.to_string(), item_path.to_string()))
        }
        _ => Err(StoreError::invalid_path(
            address,
            "expected `box/path/to/item`",
        )),
    }
}

/// Tree queries and folder materialization over a [`Catalog`].
pub struct PathTree<C> {
    catalog: Arc<C>,
}

impl<C> Clone for PathTree<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
        }
    }
}

impl<C: Catalog> PathTree<C> {
    pub fn new(catalog: Arc<C>) -> Self {
        Self { catalog }
    }

    /// Fetch a live box by name.
    pub async fn find_box(&self, box_name: &str) -> StoreResult<StorageBox> {
        self.catalog
            .find_box_by_name(box_name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("box `{}`", box_name)))
    }

    /// Resolve `box_name` + `user_path` to the box and the node it names.
    pub async fn resolve(&self, box_name: &str, user_path: &str) -> StoreResult<(StorageBox, Node)> {
        let record = self.find_box(box_name).await?;
        let node = self.resolve_in(&record, user_path).await?;
        Ok((record, node))
    }

    /// Resolve a user path within an already known box.
    pub async fn resolve_in(&self, record: &StorageBox, user_path: &str) -> StoreResult<Node> {
        if split_user_path(user_path)?.is_empty() {
            return Ok(Node::Root);
        }
        self.find_in(record, user_path)
            .await?
            .map(Node::Item)
            .ok_or_else(|| {
                StoreError::NotFound(format!("item `{}` in box `{}`", user_path, record.name))
            })
    }

    /// Look up the live item at `user_path`, if any.
    pub async fn find_in(&self, record: &StorageBox, user_path: &str) -> StoreResult<Option<Item>> {
        let internal = to_internal_path(user_path)?;
        self.catalog.find_item_by_path(&internal, record.id).await
    }

    /// Direct children of a resolved node.
    pub async fn children_of(&self, record: &StorageBox, node: &Node) -> StoreResult<Vec<Item>> {
        match node {
            Node::Root => self.catalog.find_children(None, record.id).await,
            Node::Item(item) if item.is_folder() => {
                self.catalog.find_children(Some(item.id), record.id).await
            }
            Node::Item(_) => Ok(Vec::new()),
        }
    }

    /// Live descendants of `item`, `max_depth` levels deep (`< 0` unbounded).
    pub async fn descendants_of(&self, item: &Item, max_depth: i32) -> StoreResult<Vec<Item>> {
        self.catalog.find_descendants(item, max_depth).await
    }

    /// Get or create every folder along `user_path` (inclusive), chaining
    /// parent ids. Returns the deepest folder, or `None` for the box root.
    pub async fn ensure_folder_path(
        &self,
        record: &StorageBox,
        user_path: &str,
    ) -> StoreResult<Option<Item>> {
        let mut parent: Option<Item> = None;
        for segment in split_user_path(user_path)? {
            let folder = self.get_or_create_folder(record, parent.as_ref(), segment).await?;
            parent = Some(folder);
        }
        Ok(parent)
    }

    /// Ensure the parents of `user_path` exist and return the direct parent.
    pub async fn ensure_parents(
        &self,
        record: &StorageBox,
        user_path: &str,
    ) -> StoreResult<Option<Item>> {
        match split_parent(user_path)?.0 {
            Some(parent_path) => self.ensure_folder_path(record, &parent_path).await,
            None => Ok(None),
        }
    }

    /// Return the folder `name` below `parent`, creating it when absent.
    pub async fn get_or_create_folder(
        &self,
        record: &StorageBox,
        parent: Option<&Item>,
        name: &str,
    ) -> StoreResult<Item> {
        let parent_id = parent.map(|p| p.id);
        if let Some(existing) = self
            .catalog
            .find_folder_by_name_and_parent(name, parent_id, record.id)
            .await?
        {
            return Ok(existing);
        }

        let path = child_path(parent.map(|p| p.path.as_str()), name);
        if let Some(occupant) = self.catalog.find_item_by_path(&path, record.id).await? {
            return Err(StoreError::AlreadyExists(format!(
                "file `{}` where a folder was expected",
                occupant.name
            )));
        }

        let folder = Item::new_folder(record.id, parent_id, name, path);
        match self.catalog.create_item(&folder).await {
            Ok(()) => {
                debug!("created folder {} in box {}", folder.path, record.name);
                Ok(folder)
            }
            // Lost a race against a concurrent creator; use theirs.
            Err(StoreError::AlreadyExists(_)) => self
                .catalog
                .find_folder_by_name_and_parent(name, parent_id, record.id)
                .await?
                .ok_or_else(|| StoreError::AlreadyExists(format!("item `{}`", name))),
            Err(err) => Err(err),
        }
    }
}
