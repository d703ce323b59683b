//! Shared types used across domains.

pub mod entity_ids;
pub mod id;
pub mod types;
pub mod utils;

pub use entity_ids::*;
pub use types::*;
