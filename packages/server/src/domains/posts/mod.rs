//! Post normalization: native platform shapes become canonical posts.

pub mod models;
pub mod normalizers;
pub mod worker;

pub use models::canonical_post::{CanonicalPost, UpsertOutcome};
pub use models::extracted_post::ExtractedPost;
pub use worker::NormalizationWorker;
