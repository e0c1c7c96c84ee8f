pub mod analytics;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod loader;
pub mod pipeline;
pub mod snapshot;
pub mod table;

pub use cache::{CacheState, Orchestrator, RefreshOutcome};
pub use config::Config;
pub use snapshot::{Snapshot, SnapshotData};
