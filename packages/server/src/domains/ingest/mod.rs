//! Raw item ingestion: the durable front door of the pipeline.
//!
//! Webhook receivers and the sync scheduler enqueue raw platform payloads
//! here; the extraction worker explodes them into individual posts.

pub mod extractors;
pub mod models;
pub mod worker;

pub use models::raw_item::{EnqueueResult, RawItem, RawSource};
pub use worker::ExtractionWorker;
