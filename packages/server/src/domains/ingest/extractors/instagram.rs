//! Instagram extraction.
//!
//! Instagram deliveries carry the full media object inline, so extraction
//! is a pure parse with no upstream calls.

use async_trait::async_trait;

use crate::common::Platform;
use crate::domains::ingest::models::raw_item::RawItem;

use super::{extract_page_items, id_string, ExtractError, Extractor, NativePost};

#[derive(Default)]
pub struct InstagramExtractor;

impl InstagramExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_media(&self, item: &RawItem) -> Result<Vec<NativePost>, ExtractError> {
        // The media object is either nested under "media" or is the payload
        // itself, depending on the delivery path.
        let media = match &item.payload["media"] {
            serde_json::Value::Object(_) => &item.payload["media"],
            _ => &item.payload,
        };

        let platform_post_id = id_string(&media["id"])
            .ok_or_else(|| ExtractError::Malformed("instagram media missing id".into()))?;

        Ok(vec![NativePost {
            platform_post_id,
            payload: media.clone(),
        }])
    }
}

#[async_trait]
impl Extractor for InstagramExtractor {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn extract(&self, item: &RawItem) -> Result<Vec<NativePost>, ExtractError> {
        match item.event_type.as_str() {
            "sync.page" => extract_page_items(&item.payload),
            "media.create" | "media.update" => self.extract_media(item),
            "media.delete" => {
                let id = id_string(&item.payload["id"])
                    .or_else(|| id_string(&item.payload["media"]["id"]))
                    .ok_or_else(|| {
                        ExtractError::Malformed("instagram delete missing media id".into())
                    })?;
                Ok(vec![NativePost::tombstone(id)])
            }
            other => Err(ExtractError::Malformed(format!(
                "unsupported instagram event type: {other}"
            ))),
        }
    }
}
