//! Domain modules for the ingestion pipeline.

pub mod accounts;
pub mod ingest;
pub mod media;
pub mod posts;
pub mod sync;
