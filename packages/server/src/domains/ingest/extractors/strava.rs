//! Strava extraction.
//!
//! Strava webhooks carry only `(object_id, aspect_type)`, never the
//! activity body, so create/update events cost one authenticated fetch.
//! Sync pages arrive with full activity objects inline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::common::Platform;
use crate::domains::accounts::{TokenError, TokenManager};
use crate::domains::ingest::models::raw_item::RawItem;
use crate::kernel::{GatewayError, Kernel};

use super::{extract_page_items, id_string, ExtractError, Extractor, NativePost};

pub struct StravaExtractor {
    kernel: Arc<Kernel>,
    tokens: Arc<TokenManager>,
}

impl StravaExtractor {
    pub fn new(kernel: Arc<Kernel>, tokens: Arc<TokenManager>) -> Self {
        Self { kernel, tokens }
    }

    /// Resolve a webhook event to the full activity body.
    async fn extract_event(&self, item: &RawItem) -> Result<Vec<NativePost>, ExtractError> {
        let payload = &item.payload;

        // Athlete-level events (deauthorizations) carry no post.
        if payload["object_type"].as_str() != Some("activity") {
            debug!(item_id = %item.id, "skipping non-activity strava event");
            return Ok(vec![]);
        }

        let object_id = id_string(&payload["object_id"])
            .ok_or_else(|| ExtractError::Malformed("strava event missing object_id".into()))?;

        if payload["aspect_type"].as_str() == Some("delete") {
            return Ok(vec![NativePost::tombstone(object_id)]);
        }

        let account_id = item
            .account_id
            .ok_or_else(|| ExtractError::Malformed("strava event item missing account".into()))?;

        let access_token = match self.tokens.valid_access_token(account_id).await {
            Ok(token) => token,
            Err(TokenError::AuthExpired) => return Err(ExtractError::AuthExpired),
            Err(TokenError::Internal(e)) => return Err(ExtractError::Transient(e.to_string())),
        };

        match self
            .kernel
            .gateway
            .fetch_post(Platform::Strava, &access_token, &object_id)
            .await
        {
            Ok(activity) => Ok(vec![NativePost {
                platform_post_id: object_id,
                payload: activity,
            }]),
            // Deleted between the webhook and our fetch.
            Err(GatewayError::NotFound) => Ok(vec![NativePost::tombstone(object_id)]),
            Err(GatewayError::Auth) => Err(ExtractError::AuthExpired),
            Err(GatewayError::Transient(message)) => Err(ExtractError::Transient(message)),
        }
    }
}

#[async_trait]
impl Extractor for StravaExtractor {
    fn platform(&self) -> Platform {
        Platform::Strava
    }

    async fn extract(&self, item: &RawItem) -> Result<Vec<NativePost>, ExtractError> {
        match item.event_type.as_str() {
            "sync.page" => extract_page_items(&item.payload),
            "activity.create" | "activity.update" | "activity.delete" => {
                self.extract_event(item).await
            }
            other => Err(ExtractError::Malformed(format!(
                "unsupported strava event type: {other}"
            ))),
        }
    }
}
