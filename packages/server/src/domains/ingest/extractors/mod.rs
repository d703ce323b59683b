//! Per-platform payload parsers.
//!
//! Platform payload shapes are a tagged union keyed by `Platform`; each tag
//! gets one `Extractor` implementation, selected from the registry's
//! dispatch table. No inheritance, no downcasting.

mod instagram;
mod strava;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::Platform;
use crate::domains::accounts::TokenManager;
use crate::domains::ingest::models::raw_item::RawItem;
use crate::kernel::Kernel;

pub use instagram::InstagramExtractor;
pub use strava::StravaExtractor;

/// One individual post in its native platform shape, pulled out of a raw
/// item's payload.
#[derive(Debug, Clone)]
pub struct NativePost {
    pub platform_post_id: String,
    pub payload: serde_json::Value,
}

impl NativePost {
    /// A tombstone shape for a post deleted upstream. Normalization flips
    /// `deleted_upstream` instead of dropping the canonical record.
    pub fn tombstone(platform_post_id: impl Into<String>) -> Self {
        let platform_post_id = platform_post_id.into();
        Self {
            payload: serde_json::json!({ "id": platform_post_id, "deleted": true }),
            platform_post_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The payload cannot be parsed for this (platform, event_type).
    /// Retried to the attempt cap, then dead-lettered with the parse error
    /// attached for manual inspection.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The account needs re-authorization; the item goes back to pending
    /// without consuming an attempt.
    #[error("account auth expired")]
    AuthExpired,

    #[error("transient failure: {0}")]
    Transient(String),
}

/// Parses raw item payloads for one platform.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn platform(&self) -> Platform;

    /// Explode a raw item into zero-or-more native post shapes.
    async fn extract(&self, item: &RawItem) -> Result<Vec<NativePost>, ExtractError>;
}

/// Dispatch table from platform tag to extractor.
pub struct ExtractorRegistry {
    extractors: HashMap<Platform, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry with every production extractor.
    pub fn with_defaults(kernel: Arc<Kernel>, tokens: Arc<TokenManager>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StravaExtractor::new(kernel, tokens)));
        registry.register(Arc::new(InstagramExtractor::new()));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.platform(), extractor);
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn Extractor>> {
        self.extractors.get(&platform)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform IDs arrive as JSON numbers or strings; store them uniformly as
/// strings.
pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract native posts from a `sync.page` payload (`{"items": [...]}`),
/// shared by all platforms since the scheduler writes a uniform envelope.
pub(crate) fn extract_page_items(
    payload: &serde_json::Value,
) -> Result<Vec<NativePost>, ExtractError> {
    let items = payload["items"]
        .as_array()
        .ok_or_else(|| ExtractError::Malformed("sync.page payload missing items array".into()))?;

    items
        .iter()
        .map(|item| {
            let platform_post_id = id_string(&item["id"])
                .ok_or_else(|| ExtractError::Malformed("page item missing id".into()))?;
            Ok(NativePost {
                platform_post_id,
                payload: item.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_string_handles_numbers_and_strings() {
        assert_eq!(id_string(&json!(123)), Some("123".to_string()));
        assert_eq!(id_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_string(&json!("")), None);
        assert_eq!(id_string(&json!(null)), None);
    }

    #[test]
    fn page_items_become_native_posts() {
        let payload = json!({"items": [{"id": 1, "name": "a"}, {"id": "2", "name": "b"}]});
        let posts = extract_page_items(&payload).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].platform_post_id, "1");
        assert_eq!(posts[1].platform_post_id, "2");
    }

    #[test]
    fn page_without_items_is_malformed() {
        let err = extract_page_items(&json!({"nope": []})).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[test]
    fn tombstone_carries_deleted_flag() {
        let post = NativePost::tombstone("42");
        assert_eq!(post.platform_post_id, "42");
        assert_eq!(post.payload["deleted"], serde_json::json!(true));
    }
}
