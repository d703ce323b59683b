//! Extraction worker: raw items in, extracted posts out.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::common::{ItemStatus, PROCESSING_TIMEOUT_MINUTES};
use crate::domains::ingest::extractors::{ExtractError, ExtractorRegistry};
use crate::domains::ingest::models::raw_item::RawItem;
use crate::domains::posts::models::extracted_post::ExtractedPost;
use crate::kernel::{Kernel, PipelineWorker};

pub struct ExtractionWorker {
    kernel: Arc<Kernel>,
    extractors: Arc<ExtractorRegistry>,
}

impl ExtractionWorker {
    pub fn new(kernel: Arc<Kernel>, extractors: Arc<ExtractorRegistry>) -> Self {
        Self { kernel, extractors }
    }

    async fn process_item(&self, item: &RawItem, pool: &PgPool) -> Result<()> {
        let Some(extractor) = self.extractors.get(item.platform) else {
            // No extractor registered for the platform tag: not retryable.
            let reason = format!("no extractor for platform {}", item.platform);
            RawItem::mark_dead_letter(item.id, &reason, pool).await?;
            error!(item_id = %item.id, platform = %item.platform, "{reason}");
            return Ok(());
        };

        match extractor.extract(item).await {
            Ok(posts) => {
                let mut inserted = 0usize;
                for post in &posts {
                    let row = ExtractedPost::builder()
                        .source_raw_item_id(item.id)
                        .platform(item.platform)
                        .platform_post_id(post.platform_post_id.clone())
                        .native_payload(post.payload.clone());
                    let row = match item.account_id {
                        Some(account_id) => row.account_id(account_id).build(),
                        None => row.build(),
                    };
                    if row.insert_deduped(pool).await? {
                        inserted += 1;
                    }
                }

                RawItem::mark_completed(item.id, pool).await?;
                debug!(
                    item_id = %item.id,
                    extracted = posts.len(),
                    inserted,
                    "extracted raw item"
                );
            }
            Err(ExtractError::AuthExpired) => {
                RawItem::release_for_auth(item.id, "account auth expired", pool).await?;
                warn!(item_id = %item.id, "released raw item pending re-authorization");
            }
            Err(err @ (ExtractError::Malformed(_) | ExtractError::Transient(_))) => {
                let message = err.to_string();
                let status = RawItem::mark_failed(item.id, &message, pool).await?;
                if status == Some(ItemStatus::DeadLetter) {
                    error!(item_id = %item.id, error = %message, "raw item dead-lettered");
                } else {
                    warn!(item_id = %item.id, error = %message, "raw item failed, will retry");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl PipelineWorker for ExtractionWorker {
    fn name(&self) -> &'static str {
        "extraction"
    }

    async fn tick(&self, batch_size: i64) -> Result<usize> {
        let pool = &self.kernel.db_pool;

        let reclaimed =
            RawItem::reclaim_stale(Duration::minutes(PROCESSING_TIMEOUT_MINUTES), pool).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "requeued raw items orphaned by crashed workers");
        }

        let items = RawItem::claim_pending(batch_size, pool).await?;
        if items.is_empty() {
            return Ok(0);
        }

        info!(count = items.len(), "claimed raw items");
        for item in &items {
            if let Err(e) = self.process_item(item, pool).await {
                // Store write failed; leave the item processing. The
                // stale-claim reclaim returns it to the queue after the
                // processing timeout.
                error!(item_id = %item.id, error = %e, "extraction write-back failed");
            }
        }

        Ok(items.len())
    }
}
