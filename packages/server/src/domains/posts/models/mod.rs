pub mod canonical_post;
pub mod extracted_post;
