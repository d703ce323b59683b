//! Keepsake: an ingestion pipeline that archives a user's social and
//! fitness posts.
//!
//! Stages, each its own durable queue in Postgres:
//!
//! ```text
//! webhooks / sync scheduler
//!         │
//!         ▼
//!    raw_items ──extraction──► extracted_posts ──normalization──► canonical_posts
//!                                                      │
//!                                                      └──► media_downloads ──media worker──► object storage
//! ```

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
