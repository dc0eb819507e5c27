//! Application configuration
//!
//! `AppConfig` is a plain serde tree with defaults for every section;
//! `ConfigStore` persists it as JSON and serves lock-free snapshots.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
