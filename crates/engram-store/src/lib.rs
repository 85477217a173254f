//! SQLite persistence for the engram engine: entries, optimization
//! telemetry, pipeline snapshots and the on-disk config.

pub mod config;
pub mod error;
mod json_bridge;
pub mod schema;
pub mod store;
pub mod workspace;

pub use config::{CONFIG_FILE, load_config, parse_config};
pub use error::{Result, StoreError};
pub use store::{OptimizationStats, SharedStore, Store};
pub use workspace::{DB_FILE, Workspace, default_base_dir};
