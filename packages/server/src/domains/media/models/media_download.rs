//! Media download model: one download record per (user, original URL).
//!
//! The storage path is derived from the row (`storage_path`), never
//! stored. Dedup is per user: two posts sharing a URL share one record
//! and one stored object; two users never share objects.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::common::utils::content_address::storage_path;
use crate::common::{CanonicalPostId, MediaDownloadId, Platform, UserId, MAX_ATTEMPTS};

const COLUMNS: &str = "id, canonical_post_id, user_id, platform, original_url, status, \
                       attempts, last_attempt_at, last_error, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "media_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    /// Queued, or waiting out its retry backoff after a transient
    /// failure.
    #[default]
    Pending,
    Downloading,
    Downloaded,
    /// Attempts exhausted. Terminal.
    Failed,
    /// The media no longer exists upstream (404/410). Terminal.
    Unavailable,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct MediaDownload {
    #[builder(default = MediaDownloadId::new())]
    pub id: MediaDownloadId,
    pub canonical_post_id: CanonicalPostId,
    pub user_id: UserId,
    pub platform: Platform,
    pub original_url: String,

    #[builder(default)]
    pub status: MediaStatus,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default, setter(strip_option))]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl MediaDownload {
    /// Where the bytes land in object storage. Derived, never stored.
    pub fn storage_path(&self) -> String {
        storage_path(self.user_id, self.platform, &self.original_url)
    }

    /// Enqueue a download, deduplicating on `(user_id, original_url)`.
    /// A URL this user already has (in any status) inserts nothing.
    ///
    /// Returns `true` when a new record was created.
    pub async fn enqueue(&self, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO media_downloads (
                id, canonical_post_id, user_id, platform, original_url, status,
                attempts, last_attempt_at, last_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (user_id, original_url) DO NOTHING
            "#,
        )
        .bind(self.id)
        .bind(self.canonical_post_id)
        .bind(self.user_id)
        .bind(self.platform)
        .bind(&self.original_url)
        .bind(self.status)
        .bind(self.attempts)
        .bind(self.last_attempt_at)
        .bind(&self.last_error)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(id: MediaDownloadId, pool: &PgPool) -> Result<Option<Self>> {
        let download = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM media_downloads WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(download)
    }

    pub async fn find_by_post(post_id: CanonicalPostId, pool: &PgPool) -> Result<Vec<Self>> {
        let downloads = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM media_downloads
            WHERE canonical_post_id = $1
            ORDER BY created_at
            "#,
        ))
        .bind(post_id)
        .fetch_all(pool)
        .await?;

        Ok(downloads)
    }

    /// Claim up to `limit` due downloads: fresh ones immediately, retries
    /// once their exponential backoff (2^attempts seconds since the last
    /// attempt) has elapsed.
    ///
    /// The claim itself records the attempt: `attempts` increments and
    /// `last_attempt_at` stamps here, not at completion, so a crashed
    /// worker still burned its attempt.
    pub async fn claim_due(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let downloads = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH due AS (
                SELECT id
                FROM media_downloads
                WHERE status = 'pending'
                  AND (last_attempt_at IS NULL
                       OR last_attempt_at + make_interval(secs => 2 ^ attempts) <= NOW())
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE media_downloads
            SET status = 'downloading',
                attempts = attempts + 1,
                last_attempt_at = NOW(),
                updated_at = NOW()
            WHERE id IN (SELECT id FROM due)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(downloads)
    }

    /// Return downloads stuck in `downloading` longer than `older_than`
    /// to the queue. The attempt was already burned at claim time, so the
    /// reclaim only flips status: back to `pending` while attempts
    /// remain, `failed` at the cap.
    pub async fn reclaim_stale(older_than: Duration, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE media_downloads
            SET status = CASE WHEN attempts >= $2
                         THEN 'failed'::media_status
                         ELSE 'pending'::media_status END,
                last_error = 'download timed out',
                updated_at = NOW()
            WHERE status = 'downloading'
              AND last_attempt_at <= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.num_seconds() as f64)
        .bind(MAX_ATTEMPTS)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fenced on `status = 'downloading'` like the other stage
    /// write-backs.
    pub async fn mark_downloaded(id: MediaDownloadId, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media_downloads
            SET status = 'downloaded',
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'downloading'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transient failure: back to `pending` while attempts remain (the
    /// attempt itself was consumed at claim time), `failed` at the cap.
    /// `failed` is terminal; only an operator requeue revives it.
    pub async fn mark_failed(id: MediaDownloadId, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media_downloads
            SET status = CASE WHEN attempts >= $3
                         THEN 'failed'::media_status
                         ELSE 'pending'::media_status END,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'downloading'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(MAX_ATTEMPTS)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The URL is gone upstream (404/410). Terminal immediately, no matter
    /// how many attempts remain.
    pub async fn mark_unavailable(id: MediaDownloadId, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media_downloads
            SET status = 'unavailable',
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'downloading'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_is_derived_from_row() {
        let user_id = UserId::new();
        let download = MediaDownload::builder()
            .canonical_post_id(CanonicalPostId::new())
            .user_id(user_id)
            .platform(Platform::Instagram)
            .original_url("https://cdn.ig.test/a.jpg".to_string())
            .build();

        let path = download.storage_path();
        assert!(path.starts_with(&format!("{user_id}/instagram/")));
        assert!(path.ends_with(".jpg"));

        // Same row, same path, every time.
        assert_eq!(path, download.storage_path());
    }

    #[test]
    fn new_download_starts_pending() {
        let download = MediaDownload::builder()
            .canonical_post_id(CanonicalPostId::new())
            .user_id(UserId::new())
            .platform(Platform::Strava)
            .original_url("https://cdn.strava.test/p.jpg".to_string())
            .build();

        assert_eq!(download.status, MediaStatus::Pending);
        assert_eq!(download.attempts, 0);
        assert!(download.last_attempt_at.is_none());
    }
}
