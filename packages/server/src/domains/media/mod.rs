//! Media archiving: content-addressed downloads of post media.

pub mod models;
pub mod worker;

pub use models::media_download::{MediaDownload, MediaStatus};
pub use worker::MediaWorker;
