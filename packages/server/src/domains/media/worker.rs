//! Media download worker: fetches original media bytes and archives them
//! under their content address.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::common::{MAX_ATTEMPTS, PROCESSING_TIMEOUT_MINUTES};
use crate::domains::media::models::media_download::MediaDownload;
use crate::kernel::{Kernel, MediaFetchError, PipelineWorker};

pub struct MediaWorker {
    kernel: Arc<Kernel>,
}

impl MediaWorker {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    async fn process_download(&self, download: &MediaDownload, pool: &PgPool) -> Result<()> {
        let path = download.storage_path();

        // The object may already exist: a crashed worker that stored bytes
        // but never wrote back, or a requeued record. The path is pure, so
        // checking is cheap and re-downloading is pointless.
        if self.kernel.object_storage.exists(&path).await? {
            MediaDownload::mark_downloaded(download.id, pool).await?;
            debug!(download_id = %download.id, path, "object already stored");
            return Ok(());
        }

        match self.kernel.media_fetcher.fetch(&download.original_url).await {
            Ok(bytes) => {
                self.kernel.object_storage.put(&path, &bytes).await?;
                MediaDownload::mark_downloaded(download.id, pool).await?;
                debug!(
                    download_id = %download.id,
                    path,
                    size = bytes.len(),
                    "archived media"
                );
            }
            Err(err @ MediaFetchError::Gone(_)) => {
                MediaDownload::mark_unavailable(download.id, &err.to_string(), pool).await?;
                info!(
                    download_id = %download.id,
                    url = %download.original_url,
                    "media gone upstream"
                );
            }
            Err(MediaFetchError::Transient(message)) => {
                MediaDownload::mark_failed(download.id, &message, pool).await?;
                if download.attempts >= MAX_ATTEMPTS {
                    error!(
                        download_id = %download.id,
                        url = %download.original_url,
                        error = %message,
                        "media download exhausted retries"
                    );
                } else {
                    warn!(
                        download_id = %download.id,
                        attempt = download.attempts,
                        error = %message,
                        "media download failed, will retry after backoff"
                    );
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl PipelineWorker for MediaWorker {
    fn name(&self) -> &'static str {
        "media"
    }

    async fn tick(&self, batch_size: i64) -> Result<usize> {
        let pool = &self.kernel.db_pool;

        let reclaimed =
            MediaDownload::reclaim_stale(Duration::minutes(PROCESSING_TIMEOUT_MINUTES), pool)
                .await?;
        if reclaimed > 0 {
            warn!(reclaimed, "requeued downloads orphaned by crashed workers");
        }

        let downloads = MediaDownload::claim_due(batch_size, pool).await?;
        if downloads.is_empty() {
            return Ok(0);
        }

        info!(count = downloads.len(), "claimed media downloads");
        for download in &downloads {
            if let Err(e) = self.process_download(download, pool).await {
                error!(download_id = %download.id, error = %e, "media write-back failed");
            }
        }

        Ok(downloads.len())
    }
}
