pub mod box_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod item_handlers;
pub mod janitor_handlers;
pub mod path_handlers;
