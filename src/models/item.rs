//! Represents an item (file or folder) in a box's tree.

use super::properties::Properties;
use crate::services::path_tree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether an item carries content or only children.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// A node in a box's tree.
///
/// `path` holds the internal materialized path (see [`path_tree`]); the
/// user-facing slash-delimited path is produced by [`ItemView`]. File items
/// always carry both digests, folders never do.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Item {
    pub id: Uuid,

    /// Parent folder, `None` for top-level items.
    pub parent_id: Option<Uuid>,

    /// Owning box.
    pub box_id: Uuid,

    /// Human name; authoritative over whatever the materialized path decodes to.
    pub name: String,

    /// Materialized path of the ancestor chain including this item.
    pub path: String,

    pub kind: ItemKind,

    /// Content length in bytes, 0 for folders.
    pub size: i64,

    /// Hex SHA-256 of the content, empty for folders.
    pub sha256: String,

    /// Hex SHA-512 of the content, empty for folders.
    pub sha512: String,

    /// Lower-cased extension derived from the name, files only.
    pub extension: Option<String>,

    #[sqlx(json)]
    pub properties: Properties,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set once the item has been soft-deleted.
    pub deleted_at: Option<DateTime<Utc>>,

    /// Direct children, populated only by listings.
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Item>,
}

impl Item {
    /// Build a folder item. `path` must already be the materialized path.
    pub fn new_folder(box_id: Uuid, parent_id: Option<Uuid>, name: &str, path: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            box_id,
            name: name.to_string(),
            path,
            kind: ItemKind::Folder,
            size: 0,
            sha256: String::new(),
            sha512: String::new(),
            extension: None,
            properties: Properties::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            children: Vec::new(),
        }
    }

    /// Build a file item referencing already-stored content.
    pub fn new_file(
        box_id: Uuid,
        parent_id: Option<Uuid>,
        name: &str,
        path: String,
        content: &FileContent,
        properties: Properties,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            box_id,
            name: name.to_string(),
            path,
            kind: ItemKind::File,
            size: content.size,
            sha256: content.sha256.clone(),
            sha512: content.sha512.clone(),
            extension: extension_of(name),
            properties,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            children: Vec::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Digests and length of this item's content.
    pub fn content(&self) -> FileContent {
        FileContent {
            sha256: self.sha256.clone(),
            sha512: self.sha512.clone(),
            size: self.size,
        }
    }
}

/// Digest pair and length identifying a blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileContent {
    pub sha256: String,
    pub sha512: String,
    pub size: i64,
}

/// Lower-cased extension of a file name, if it has one.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Client-facing representation of an item, carrying the user path.
#[derive(Serialize, Debug, Clone)]
pub struct ItemView {
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub box_id: Uuid,
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub size: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ItemView>,
}

impl ItemView {
    /// View of a box's synthetic root folder, which is never stored.
    pub fn root(box_id: Uuid, box_name: &str, children: &[Item]) -> Self {
        Self {
            id: None,
            parent_id: None,
            box_id,
            name: box_name.to_string(),
            path: String::new(),
            kind: ItemKind::Folder,
            size: 0,
            sha256: String::new(),
            extension: None,
            properties: Properties::default(),
            deleted_at: None,
            children: children.iter().map(ItemView::from).collect(),
        }
    }
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        Self {
            id: Some(item.id),
            parent_id: item.parent_id,
            box_id: item.box_id,
            name: item.name.clone(),
            path: path_tree::to_user_path(item),
            kind: item.kind,
            size: item.size,
            sha256: item.sha256.clone(),
            extension: item.extension.clone(),
            properties: item.properties.clone(),
            deleted_at: item.deleted_at,
            children: item.children.iter().map(ItemView::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_and_optional() {
        assert_eq!(extension_of("Report.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("Makefile"), None);
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn folders_carry_no_content() {
        let folder = Item::new_folder(Uuid::new_v4(), None, "docs", "docs".into());
        assert!(folder.is_folder());
        assert_eq!(folder.size, 0);
        assert!(folder.sha256.is_empty() && folder.sha512.is_empty());
        assert!(folder.extension.is_none());
    }
}
