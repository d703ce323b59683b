//! Extracted post model: one individual post in native platform shape,
//! queued for normalization.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::common::{AccountId, ExtractedPostId, ItemStatus, Platform, RawItemId, MAX_ATTEMPTS};

const COLUMNS: &str = "id, source_raw_item_id, platform, account_id, platform_post_id, \
                       native_payload, status, attempts, last_error, received_at, \
                       started_at, completed_at";

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ExtractedPost {
    #[builder(default = ExtractedPostId::new())]
    pub id: ExtractedPostId,

    #[builder(default, setter(strip_option))]
    pub source_raw_item_id: Option<RawItemId>,
    pub platform: Platform,
    #[builder(default, setter(strip_option))]
    pub account_id: Option<AccountId>,
    pub platform_post_id: String,
    pub native_payload: serde_json::Value,

    #[builder(default)]
    pub status: ItemStatus,
    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    #[builder(default = Utc::now())]
    pub received_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractedPost {
    /// Insert, skipping rows that already exist for this
    /// `(source_raw_item_id, platform_post_id)`. A retried extraction that
    /// produces the same posts inserts nothing the second time.
    ///
    /// Returns `true` when a row was actually inserted.
    pub async fn insert_deduped(&self, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO extracted_posts (
                id, source_raw_item_id, platform, account_id, platform_post_id,
                native_payload, status, attempts, last_error, received_at,
                started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (source_raw_item_id, platform_post_id) DO NOTHING
            "#,
        )
        .bind(self.id)
        .bind(self.source_raw_item_id)
        .bind(self.platform)
        .bind(self.account_id)
        .bind(&self.platform_post_id)
        .bind(&self.native_payload)
        .bind(self.status)
        .bind(self.attempts)
        .bind(&self.last_error)
        .bind(self.received_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(id: ExtractedPostId, pool: &PgPool) -> Result<Option<Self>> {
        let post = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM extracted_posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(post)
    }

    /// All posts extracted from one raw item, in insertion order. Test and
    /// operator tooling.
    pub async fn find_by_raw_item(raw_item_id: RawItemId, pool: &PgPool) -> Result<Vec<Self>> {
        let posts = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM extracted_posts
            WHERE source_raw_item_id = $1
            ORDER BY received_at, platform_post_id
            "#,
        ))
        .bind(raw_item_id)
        .fetch_all(pool)
        .await?;

        Ok(posts)
    }

    /// Claim up to `limit` pending posts, `pending -> processing`, with
    /// FOR UPDATE SKIP LOCKED so concurrent claimants never overlap.
    pub async fn claim_pending(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let posts = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_posts AS (
                SELECT id
                FROM extracted_posts
                WHERE status = 'pending'
                ORDER BY received_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE extracted_posts
            SET status = 'processing',
                started_at = NOW()
            WHERE id IN (SELECT id FROM next_posts)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(posts)
    }

    /// Return posts stuck in `processing` longer than `older_than` to the
    /// queue, counting an attempt, same as the raw item reclaim.
    pub async fn reclaim_stale(older_than: Duration, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE extracted_posts
            SET attempts = attempts + 1,
                last_error = 'processing timed out',
                status = CASE WHEN attempts + 1 >= $2
                         THEN 'dead_letter'::pipeline_status
                         ELSE 'pending'::pipeline_status END,
                completed_at = CASE WHEN attempts + 1 >= $2 THEN NOW() ELSE completed_at END,
                started_at = NULL
            WHERE status = 'processing'
              AND started_at <= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.num_seconds() as f64)
        .bind(MAX_ATTEMPTS)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Fenced on `status = 'processing'` like the raw item write-backs.
    pub async fn mark_completed(id: ExtractedPostId, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE extracted_posts
            SET status = 'completed',
                completed_at = NOW(),
                last_error = NULL
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Failed attempt: back to `pending` while attempts remain,
    /// `dead_letter` at the cap. Returns the resulting status, or `None`
    /// when fenced out.
    pub async fn mark_failed(
        id: ExtractedPostId,
        error: &str,
        pool: &PgPool,
    ) -> Result<Option<ItemStatus>> {
        let status = sqlx::query_scalar::<_, ItemStatus>(
            r#"
            UPDATE extracted_posts
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3
                         THEN 'dead_letter'::pipeline_status
                         ELSE 'pending'::pipeline_status END,
                completed_at = CASE WHEN attempts + 1 >= $3 THEN NOW() ELSE completed_at END,
                started_at = NULL
            WHERE id = $1 AND status = 'processing'
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(MAX_ATTEMPTS)
        .fetch_optional(pool)
        .await?;

        Ok(status)
    }

    /// Back to `pending` without consuming an attempt (auth failures).
    pub async fn release_for_auth(id: ExtractedPostId, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE extracted_posts
            SET status = 'pending',
                last_error = $2,
                started_at = NULL
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Operator action: force into `dead_letter` from any non-terminal
    /// state.
    pub async fn mark_dead_letter(id: ExtractedPostId, reason: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE extracted_posts
            SET status = 'dead_letter',
                last_error = $2,
                completed_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'dead_letter')
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
