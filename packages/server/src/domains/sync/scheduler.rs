//! Periodic sync: walks each due account's post history and enqueues one
//! raw item per page.
//!
//! The scheduler owns pagination; extraction never talks to the list API.
//! Each page lands as its own raw item so a mid-walk crash loses at most
//! the pages not yet enqueued, and every enqueued page survives.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use serde_json::json;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::domains::accounts::{ConnectedAccount, TokenError, TokenManager};
use crate::domains::ingest::models::raw_item::{RawItem, RawSource};
use crate::kernel::{GatewayError, Kernel};

/// Warn this many days before a token with no refresh path dies.
const EXPIRY_WARN_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between sync passes for one account.
    pub sync_interval: Duration,
    /// Page cap per periodic sync. Backfills are uncapped.
    pub max_pages_per_sync: u32,
    /// Cron expression for the periodic pass.
    pub cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::hours(6),
            max_pages_per_sync: 5,
            // Scan every minute; sync_interval decides who is actually due.
            cron: "0 * * * * *".to_string(),
        }
    }
}

/// Counts from one scheduler pass, for logging.
#[derive(Debug, Default)]
pub struct SyncPassSummary {
    pub accounts_synced: usize,
    pub accounts_failed: usize,
    pub pages_enqueued: usize,
}

pub struct SyncScheduler {
    kernel: Arc<Kernel>,
    tokens: Arc<TokenManager>,
    config: SyncConfig,
}

impl SyncScheduler {
    pub fn new(kernel: Arc<Kernel>, tokens: Arc<TokenManager>, config: SyncConfig) -> Self {
        Self {
            kernel,
            tokens,
            config,
        }
    }

    /// One pass over every due account.
    pub async fn run_pass(&self) -> Result<SyncPassSummary> {
        let pool = &self.kernel.db_pool;
        let accounts = ConnectedAccount::due_for_sync(self.config.sync_interval, pool).await?;
        let mut summary = SyncPassSummary::default();

        for account in accounts {
            self.warn_on_expiry(&account);

            match self
                .walk_pages(&account, RawSource::Fetch, Some(self.config.max_pages_per_sync))
                .await
            {
                Ok(pages) => {
                    ConnectedAccount::record_sync_success(account.id, pool).await?;
                    summary.accounts_synced += 1;
                    summary.pages_enqueued += pages;
                }
                Err(SyncError::Auth) => {
                    // Status was already flipped by the token manager or is
                    // flipped on the gateway's word; either way the account
                    // drops out of due_for_sync until re-authorization.
                    summary.accounts_failed += 1;
                    warn!(account_id = %account.id, "sync skipped, account needs re-authorization");
                }
                Err(SyncError::Other(e)) => {
                    ConnectedAccount::record_sync_error(account.id, pool).await?;
                    summary.accounts_failed += 1;
                    error!(account_id = %account.id, error = %e, "sync pass failed");
                }
            }
        }

        info!(
            synced = summary.accounts_synced,
            failed = summary.accounts_failed,
            pages = summary.pages_enqueued,
            "sync pass complete"
        );
        Ok(summary)
    }

    /// Full-history backfill for a newly connected account. Uncapped walk.
    pub async fn backfill(&self, account: &ConnectedAccount) -> Result<usize> {
        match self.walk_pages(account, RawSource::Backfill, None).await {
            Ok(pages) => {
                info!(account_id = %account.id, pages, "backfill enqueued");
                Ok(pages)
            }
            Err(SyncError::Auth) => {
                anyhow::bail!("account {} needs re-authorization", account.id)
            }
            Err(SyncError::Other(e)) => Err(e),
        }
    }

    /// Walk the account's pages, enqueueing one raw item per page, until
    /// the platform reports no next cursor or the cap is hit.
    async fn walk_pages(
        &self,
        account: &ConnectedAccount,
        source: RawSource,
        max_pages: Option<u32>,
    ) -> Result<usize, SyncError> {
        let pool = &self.kernel.db_pool;
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let access_token = self
                .tokens
                .valid_access_token(account.id)
                .await
                .map_err(|e| match e {
                    TokenError::AuthExpired => SyncError::Auth,
                    TokenError::Internal(e) => SyncError::Other(e),
                })?;

            let page = self
                .kernel
                .gateway
                .fetch_page(account.platform, &access_token, cursor.as_deref())
                .await
                .map_err(|e| match e {
                    GatewayError::Auth => SyncError::Auth,
                    GatewayError::NotFound => {
                        SyncError::Other(anyhow::anyhow!("list endpoint returned not found"))
                    }
                    GatewayError::Transient(message) => {
                        SyncError::Other(anyhow::anyhow!("page fetch failed: {message}"))
                    }
                })?;

            if !page.items.is_empty() {
                RawItem::builder()
                    .source(source)
                    .platform(account.platform)
                    .account_id(account.id)
                    .event_type("sync.page".to_string())
                    .payload(json!({
                        "items": page.items,
                        "cursor": cursor,
                        "next_cursor": page.next_cursor,
                    }))
                    .build()
                    .enqueue(pool)
                    .await
                    .context("enqueue sync page")
                    .map_err(SyncError::Other)?;
                pages += 1;
            }

            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
            if let Some(max) = max_pages {
                if pages as u32 >= max {
                    break;
                }
            }
        }

        Ok(pages)
    }

    fn warn_on_expiry(&self, account: &ConnectedAccount) {
        if account.platform.uses_refresh_tokens() {
            return;
        }
        if let Some(days) = account.days_to_expiry(chrono::Utc::now()) {
            if days <= EXPIRY_WARN_DAYS {
                warn!(
                    account_id = %account.id,
                    platform = %account.platform,
                    days_to_expiry = days,
                    "token expires soon and cannot be refreshed"
                );
            }
        }
    }

    /// Register the periodic pass on a cron scheduler. The returned
    /// scheduler must be started by the caller.
    pub async fn register(self: Arc<Self>, scheduler: &JobScheduler) -> Result<()> {
        let cron = self.config.cron.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let scheduler = self.clone();
            Box::pin(async move {
                if let Err(e) = scheduler.run_pass().await {
                    error!(error = %e, "scheduled sync pass failed");
                }
            })
        })
        .context("build sync cron job")?;

        scheduler.add(job).await.context("register sync cron job")?;
        Ok(())
    }
}

enum SyncError {
    Auth,
    Other(anyhow::Error),
}
