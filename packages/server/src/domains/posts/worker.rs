//! Normalization worker: extracted posts in, canonical posts and media
//! download records out.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::common::{ItemStatus, PROCESSING_TIMEOUT_MINUTES};
use crate::domains::accounts::ConnectedAccount;
use crate::domains::media::models::media_download::MediaDownload;
use crate::domains::posts::models::canonical_post::{CanonicalPost, UpsertOutcome};
use crate::domains::posts::models::extracted_post::ExtractedPost;
use crate::domains::posts::normalizers::{is_tombstone, Normalized, NormalizerRegistry};
use crate::kernel::{Kernel, PipelineWorker};

pub struct NormalizationWorker {
    kernel: Arc<Kernel>,
    normalizers: Arc<NormalizerRegistry>,
}

impl NormalizationWorker {
    pub fn new(kernel: Arc<Kernel>, normalizers: Arc<NormalizerRegistry>) -> Self {
        Self { kernel, normalizers }
    }

    async fn process_post(&self, post: &ExtractedPost, pool: &PgPool) -> Result<()> {
        // Deletions are platform-agnostic: flip the tombstone flag on
        // whatever canonical row exists.
        if is_tombstone(&post.native_payload) {
            let existed =
                CanonicalPost::mark_deleted_upstream(post.platform, &post.platform_post_id, pool)
                    .await?;
            ExtractedPost::mark_completed(post.id, pool).await?;
            debug!(
                post_id = %post.id,
                platform_post_id = %post.platform_post_id,
                existed,
                "processed upstream deletion"
            );
            return Ok(());
        }

        let Some(account_id) = post.account_id else {
            self.fail_post(post, "extracted post has no account", pool)
                .await?;
            return Ok(());
        };
        let Some(account) = ConnectedAccount::find_by_id(account_id, pool).await? else {
            self.fail_post(post, "connected account no longer exists", pool)
                .await?;
            return Ok(());
        };

        let Some(normalizer) = self.normalizers.get(post.platform) else {
            let reason = format!("no normalizer for platform {}", post.platform);
            ExtractedPost::mark_dead_letter(post.id, &reason, pool).await?;
            error!(post_id = %post.id, platform = %post.platform, "{reason}");
            return Ok(());
        };

        let draft = match normalizer.normalize(&post.native_payload) {
            Ok(Normalized::Post(draft)) => draft,
            Ok(Normalized::Deletion) => {
                CanonicalPost::mark_deleted_upstream(post.platform, &post.platform_post_id, pool)
                    .await?;
                ExtractedPost::mark_completed(post.id, pool).await?;
                return Ok(());
            }
            Err(e) => {
                self.fail_post(post, &e.to_string(), pool).await?;
                return Ok(());
            }
        };

        let canonical = CanonicalPost::builder()
            .user_id(account.user_id)
            .account_id(account.id)
            .platform(post.platform)
            .platform_post_id(post.platform_post_id.clone())
            .content_kind(draft.content_kind)
            .body_text(draft.body_text)
            .native_created_at(draft.native_created_at)
            .published(draft.published)
            .build();
        let canonical = CanonicalPost {
            title: draft.title,
            native_updated_at: draft.native_updated_at,
            ..canonical
        };

        match canonical.upsert(pool).await? {
            UpsertOutcome::Applied(stored) => {
                self.enqueue_media(&stored, &draft.media_urls, pool).await?;
                debug!(
                    post_id = %post.id,
                    canonical_id = %stored.id,
                    media = draft.media_urls.len(),
                    "normalized post"
                );
            }
            UpsertOutcome::Stale => {
                // A strictly newer version is already archived. Its media
                // still gets enqueued: a crash between a previous upsert
                // and its media enqueue would otherwise lose the download
                // forever, and the (user, url) key absorbs repeats.
                if let Some(stored) =
                    CanonicalPost::find_by_platform_id(post.platform, &post.platform_post_id, pool)
                        .await?
                {
                    self.enqueue_media(&stored, &draft.media_urls, pool).await?;
                }
                debug!(
                    post_id = %post.id,
                    platform_post_id = %post.platform_post_id,
                    "skipped stale version"
                );
            }
        }

        ExtractedPost::mark_completed(post.id, pool).await?;
        Ok(())
    }

    async fn enqueue_media(
        &self,
        stored: &CanonicalPost,
        urls: &[String],
        pool: &PgPool,
    ) -> Result<()> {
        for url in urls {
            MediaDownload::builder()
                .canonical_post_id(stored.id)
                .user_id(stored.user_id)
                .platform(stored.platform)
                .original_url(url.clone())
                .build()
                .enqueue(pool)
                .await?;
        }
        Ok(())
    }

    async fn fail_post(&self, post: &ExtractedPost, error: &str, pool: &PgPool) -> Result<()> {
        let status = ExtractedPost::mark_failed(post.id, error, pool).await?;
        if status == Some(ItemStatus::DeadLetter) {
            error!(post_id = %post.id, error, "extracted post dead-lettered");
        } else {
            warn!(post_id = %post.id, error, "extracted post failed, will retry");
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineWorker for NormalizationWorker {
    fn name(&self) -> &'static str {
        "normalization"
    }

    async fn tick(&self, batch_size: i64) -> Result<usize> {
        let pool = &self.kernel.db_pool;

        let reclaimed =
            ExtractedPost::reclaim_stale(Duration::minutes(PROCESSING_TIMEOUT_MINUTES), pool)
                .await?;
        if reclaimed > 0 {
            warn!(reclaimed, "requeued posts orphaned by crashed workers");
        }

        let posts = ExtractedPost::claim_pending(batch_size, pool).await?;
        if posts.is_empty() {
            return Ok(0);
        }

        info!(count = posts.len(), "claimed extracted posts");
        for post in &posts {
            if let Err(e) = self.process_post(post, pool).await {
                error!(post_id = %post.id, error = %e, "normalization write-back failed");
            }
        }

        Ok(posts.len())
    }
}
