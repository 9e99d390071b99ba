//! Represents a box: a named top-level container for an item tree.

use super::properties::Properties;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named container holding an independent tree of items.
///
/// Every box owns a storage root on disk. Depending on the configured dedup
/// scope, blobs for its files are sharded beneath that root or beneath a
/// store-wide pool.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StorageBox {
    /// Unique identifier for this box.
    pub id: Uuid,

    /// Unique box name, used as the first segment of every item address.
    pub name: String,

    /// Storage root of this box on disk.
    pub path: String,

    /// Arbitrary user-defined properties.
    #[sqlx(json)]
    pub properties: Properties,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Set when the box has been soft-deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StorageBox {
    pub fn new(name: impl Into<String>, path: impl Into<String>, properties: Properties) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            properties,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
