//! src/repository/sqlite.rs
//!
//! SqliteCatalog: the `Catalog` implementation backed by SQLite.
//!
//! Subtree operations (soft/hard delete, relocation) walk the `parent_id`
//! adjacency list with recursive CTEs, so rows sharing a stale materialized
//! path are never touched by accident. Depth-bounded descendant listings use
//! a prefix range over the live, unique `path` column.

use super::Catalog;
use crate::{
    errors::{StoreError, StoreResult},
    models::{item::Item, storage_box::StorageBox},
    services::{path_tree::SEPARATOR, query_filter::Filter},
};
use chrono::Utc;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
};
use std::{str::FromStr, sync::Arc};
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

macro_rules! item_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, parent_id, box_id, name, path, kind, size, sha256, sha512, extension, \
             properties, created_at, updated_at, deleted_at FROM items ",
            $tail
        )
    };
}

macro_rules! box_select {
    ($tail:literal) => {
        concat!(
            "SELECT id, name, path, properties, created_at, updated_at, deleted_at FROM boxes ",
            $tail
        )
    };
}

/// Recursive CTE selecting the ids of an item and all of its descendants.
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (\
     SELECT ? UNION ALL \
     SELECT items.id FROM items JOIN subtree ON items.parent_id = subtree.id) ";

#[derive(Clone, Debug)]
pub struct SqliteCatalog {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
}

impl SqliteCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open (and create if missing) the database at `url`.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// A private in-memory database on a single pinned connection.
    #[cfg(test)]
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let catalog = Self::new(Arc::new(pool));
        catalog.migrate().await?;
        Ok(catalog)
    }

    /// Run the embedded schema migration statement by statement.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }

        Ok(statements.len())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Number of separators in a materialized path, i.e. its depth minus one.
fn separator_count(path: &str) -> i64 {
    path.matches(SEPARATOR).count() as i64
}

impl Catalog for SqliteCatalog {
    async fn create_box(&self, record: &StorageBox) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO boxes (id, name, path, properties, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.path)
        .bind(Json(&record.properties))
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.deleted_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists(format!(
                "box `{}`",
                record.name
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_box_by_id(&self, id: Uuid) -> StoreResult<Option<StorageBox>> {
        let record = sqlx::query_as::<_, StorageBox>(box_select!("WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    async fn find_box_by_name(&self, name: &str) -> StoreResult<Option<StorageBox>> {
        let record =
            sqlx::query_as::<_, StorageBox>(box_select!("WHERE name = ? AND deleted_at IS NULL"))
                .bind(name)
                .fetch_optional(&*self.db)
                .await?;
        Ok(record)
    }

    async fn find_all_boxes(&self) -> StoreResult<Vec<StorageBox>> {
        let records =
            sqlx::query_as::<_, StorageBox>(box_select!("WHERE deleted_at IS NULL ORDER BY name"))
                .fetch_all(&*self.db)
                .await?;
        Ok(records)
    }

    async fn update_box(&self, record: &StorageBox) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE boxes SET name = ?, properties = ?, updated_at = ?
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&record.name)
        .bind(Json(&record.properties))
        .bind(Utc::now())
        .bind(record.id)
        .execute(&*self.db)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(StoreError::NotFound(format!("box `{}`", record.id)))
            }
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists(format!(
                "box `{}`",
                record.name
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_box(&self, id: Uuid) -> StoreResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE boxes SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_deleted_boxes(&self) -> StoreResult<Vec<StorageBox>> {
        let records = sqlx::query_as::<_, StorageBox>(box_select!("WHERE deleted_at IS NOT NULL"))
            .fetch_all(&*self.db)
            .await?;
        Ok(records)
    }

    async fn soft_delete_box_items(&self, box_id: Uuid) -> StoreResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE items SET deleted_at = ?, updated_at = ? WHERE box_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(box_id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_box_items(&self, box_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE box_id = ?")
            .bind(box_id)
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }

    async fn hard_delete_box(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM boxes WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn create_item(&self, item: &Item) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO items (
                id, parent_id, box_id, name, path, kind, size, sha256, sha512,
                extension, properties, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id)
        .bind(item.parent_id)
        .bind(item.box_id)
        .bind(&item.name)
        .bind(&item.path)
        .bind(item.kind)
        .bind(item.size)
        .bind(&item.sha256)
        .bind(&item.sha512)
        .bind(&item.extension)
        .bind(Json(&item.properties))
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.deleted_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::AlreadyExists(format!("item `{}`", item.name)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_item_by_id(&self, id: Uuid) -> StoreResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(item_select!("WHERE id = ? AND deleted_at IS NULL"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(item)
    }

    async fn find_all_items(&self) -> StoreResult<Vec<Item>> {
        let items =
            sqlx::query_as::<_, Item>(item_select!("WHERE deleted_at IS NULL ORDER BY box_id, path"))
                .fetch_all(&*self.db)
                .await?;
        Ok(items)
    }

    async fn update_item(&self, item: &Item) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE items SET parent_id = ?, name = ?, path = ?, size = ?, sha256 = ?, sha512 = ?,
                extension = ?, properties = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(item.parent_id)
        .bind(&item.name)
        .bind(&item.path)
        .bind(item.size)
        .bind(&item.sha256)
        .bind(&item.sha512)
        .bind(&item.extension)
        .bind(Json(&item.properties))
        .bind(Utc::now())
        .bind(item.id)
        .execute(&*self.db)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(StoreError::NotFound(format!("item `{}`", item.id)))
            }
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::AlreadyExists(format!("item `{}`", item.name)))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn relocate_item(&self, item: &Item, old_path: &str) -> StoreResult<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let moved = sqlx::query(
            "UPDATE items SET parent_id = ?, name = ?, path = ?, extension = ?, properties = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(item.parent_id)
        .bind(&item.name)
        .bind(&item.path)
        .bind(&item.extension)
        .bind(Json(&item.properties))
        .bind(now)
        .bind(item.id)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::AlreadyExists(format!("item `{}`", item.name))
            } else {
                StoreError::Persistence(err)
            }
        })?;
        if moved.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("item `{}`", item.id)));
        }

        if item.is_folder() {
            // substr() is 1-based; keep everything after the old prefix.
            let rewritten = sqlx::query(&format!(
                "{SUBTREE_CTE}UPDATE items SET path = ? || substr(path, ?), updated_at = ?
                 WHERE id IN (SELECT id FROM subtree) AND id != ?"
            ))
            .bind(item.id)
            .bind(&item.path)
            .bind(old_path.len() as i64 + 1)
            .bind(now)
            .bind(item.id)
            .execute(&mut *tx)
            .await?;
            debug!(
                "rewrote {} descendant paths from {} to {}",
                rewritten.rows_affected(),
                old_path,
                item.path
            );
        }

        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete_item(&self, item: &Item) -> StoreResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(&format!(
            "{SUBTREE_CTE}UPDATE items SET deleted_at = ?, updated_at = ?
             WHERE id IN (SELECT id FROM subtree) AND deleted_at IS NULL"
        ))
        .bind(item.id)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn hard_delete_item(&self, item: &Item) -> StoreResult<u64> {
        let result = if item.is_folder() {
            sqlx::query(&format!(
                "{SUBTREE_CTE}DELETE FROM items WHERE id IN (SELECT id FROM subtree)"
            ))
            .bind(item.id)
            .execute(&*self.db)
            .await?
        } else {
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(item.id)
                .execute(&*self.db)
                .await?
        };

        if result.rows_affected() == 0 {
            debug!("item {} was already removed", item.id);
        }
        Ok(result.rows_affected())
    }

    async fn find_item_by_path(&self, path: &str, box_id: Uuid) -> StoreResult<Option<Item>> {
        let item = sqlx::query_as::<_, Item>(item_select!(
            "WHERE path = ? AND box_id = ? AND deleted_at IS NULL"
        ))
        .bind(path)
        .bind(box_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(item)
    }

    async fn find_children(&self, parent_id: Option<Uuid>, box_id: Uuid) -> StoreResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(item_select!(
            "WHERE parent_id IS ? AND box_id = ? AND deleted_at IS NULL ORDER BY name"
        ))
        .bind(parent_id)
        .bind(box_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    async fn find_folder_by_name_and_parent(
        &self,
        name: &str,
        parent_id: Option<Uuid>,
        box_id: Uuid,
    ) -> StoreResult<Option<Item>> {
        let folder = sqlx::query_as::<_, Item>(item_select!(
            "WHERE name = ? AND parent_id IS ? AND box_id = ? AND kind = 'folder'
               AND deleted_at IS NULL"
        ))
        .bind(name)
        .bind(parent_id)
        .bind(box_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(folder)
    }

    async fn find_soft_deleted(&self) -> StoreResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(item_select!("WHERE deleted_at IS NOT NULL"))
            .fetch_all(&*self.db)
            .await?;
        Ok(items)
    }

    async fn find_descendants(&self, item: &Item, max_depth: i32) -> StoreResult<Vec<Item>> {
        if max_depth == 0 {
            return Ok(Vec::new());
        }

        // Every path below `item` sorts strictly between "path." and "path/",
        // since '/' is the code point right after the separator.
        let lower = format!("{}{}", item.path, SEPARATOR);
        let upper = format!("{}{}", item.path, char::from(SEPARATOR as u8 + 1));

        let items = if max_depth < 0 {
            sqlx::query_as::<_, Item>(item_select!(
                "WHERE box_id = ? AND path > ? AND path < ? AND deleted_at IS NULL ORDER BY path"
            ))
            .bind(item.box_id)
            .bind(&lower)
            .bind(&upper)
            .fetch_all(&*self.db)
            .await?
        } else {
            let max_separators = separator_count(&item.path) + i64::from(max_depth);
            sqlx::query_as::<_, Item>(item_select!(
                "WHERE box_id = ? AND path > ? AND path < ? AND deleted_at IS NULL
                   AND length(path) - length(replace(path, '.', '')) <= ?
                 ORDER BY path"
            ))
            .bind(item.box_id)
            .bind(&lower)
            .bind(&upper)
            .bind(max_separators)
            .fetch_all(&*self.db)
            .await?
        };
        Ok(items)
    }

    async fn find_subtree(&self, item: &Item) -> StoreResult<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(&format!(
            "{SUBTREE_CTE}{}",
            item_select!("WHERE id IN (SELECT id FROM subtree)")
        ))
        .bind(item.id)
        .fetch_all(&*self.db)
        .await?;
        Ok(items)
    }

    async fn search_items(
        &self,
        filter: &Filter,
        order: &str,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Item>> {
        let sql = format!(
            "{} AND ({}) ORDER BY {} LIMIT ? OFFSET ?",
            item_select!("WHERE deleted_at IS NULL"),
            filter.clause,
            order
        );
        debug!("item search: {}", sql);

        let mut query = sqlx::query_as::<_, Item>(&sql);
        for param in &filter.params {
            query = query.bind(param);
        }
        let items = query.bind(limit).bind(offset).fetch_all(&*self.db).await?;
        Ok(items)
    }

    async fn count_live_by_digest(&self, sha256: &str, box_id: Option<Uuid>) -> StoreResult<i64> {
        let count = match box_id {
            Some(box_id) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM items
                     WHERE sha256 = ? AND kind = 'file' AND box_id = ? AND deleted_at IS NULL",
                )
                .bind(sha256)
                .bind(box_id)
                .fetch_one(&*self.db)
                .await?
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM items
                     WHERE sha256 = ? AND kind = 'file' AND deleted_at IS NULL",
                )
                .bind(sha256)
                .fetch_one(&*self.db)
                .await?
            }
        };
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
