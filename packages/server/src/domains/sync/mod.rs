//! Account sync scheduling.

pub mod scheduler;

pub use scheduler::{SyncConfig, SyncPassSummary, SyncScheduler};
