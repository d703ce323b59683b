pub mod content_address;
pub mod search_text;

pub use content_address::{content_address, storage_path};
pub use search_text::search_text;
