//! Core data models for the box/item store.
//!
//! These entities describe the logical tree of boxes and items. They map to
//! database rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod item;
pub mod properties;
pub mod storage_box;
