//! Raw item model: one row per ingestion event, payload stored verbatim.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::common::{AccountId, ItemStatus, Platform, RawItemId, MAX_ATTEMPTS};

const COLUMNS: &str = "id, source, platform, account_id, event_type, external_id, payload, \
                       status, attempts, last_error, received_at, started_at, completed_at";

/// Where an ingestion event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "raw_item_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RawSource {
    #[default]
    Webhook,
    Fetch,
    Backfill,
    /// Manual re-injection of a dead-lettered item.
    Retry,
}

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone)]
pub enum EnqueueResult {
    /// Item was enqueued, returns new item ID
    Created(RawItemId),
    /// A matching in-flight item already exists, returns its ID
    Duplicate(RawItemId),
}

impl EnqueueResult {
    /// Get the item ID regardless of whether it was created or duplicate
    pub fn item_id(&self) -> RawItemId {
        match self {
            EnqueueResult::Created(id) | EnqueueResult::Duplicate(id) => *id,
        }
    }

    /// Returns true if this was a newly created item
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created(_))
    }
}

/// An unprocessed ingestion event (webhook delivery or poll-fetch page),
/// stored verbatim. Rows are never deleted: the table is the audit trail
/// and the reprocessing source.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct RawItem {
    #[builder(default = RawItemId::new())]
    pub id: RawItemId,

    pub source: RawSource,
    pub platform: Platform,
    #[builder(default, setter(strip_option))]
    pub account_id: Option<AccountId>,
    pub event_type: String,
    #[builder(default, setter(strip_option))]
    pub external_id: Option<String>,
    pub payload: serde_json::Value,

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

impl RawItem {
    /// Durably persist this item, returning before any processing happens.
    ///
    /// Webhook receivers call this and answer 200 immediately. If the item
    /// carries an `external_id` and an item with the same
    /// `(platform, source, external_id)` is already in flight, the existing
    /// ID is returned instead (webhook redelivery). The partial unique
    /// index on the delivery key makes this hold under concurrent
    /// deliveries too.
    pub async fn enqueue(self, pool: &PgPool) -> Result<EnqueueResult> {
        let Some(external_id) = self.external_id.clone() else {
            let inserted = self.insert(pool).await?;
            return Ok(EnqueueResult::Created(inserted.id));
        };

        for _ in 0..2 {
            if let Some(inserted) = self.insert_unless_in_flight(pool).await? {
                return Ok(EnqueueResult::Created(inserted.id));
            }
            if let Some(existing) =
                Self::find_in_flight(self.platform, self.source, &external_id, pool).await?
            {
                return Ok(EnqueueResult::Duplicate(existing.id));
            }
            // The conflicting duplicate completed between the insert and
            // the lookup; this delivery is new work after all.
        }

        anyhow::bail!(
            "enqueue for {}/{external_id} kept racing completing duplicates",
            self.platform
        )
    }

    /// Conflict-guarded insert against the in-flight partial unique index.
    /// Returns `None` when a pending/processing item already holds this
    /// delivery key.
    async fn insert_unless_in_flight(&self, pool: &PgPool) -> Result<Option<Self>> {
        let item = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO raw_items (
                id, source, platform, account_id, event_type, external_id, payload,
                status, attempts, last_error, received_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (platform, source, external_id)
                WHERE status IN ('pending', 'processing')
                DO NOTHING
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.source)
        .bind(self.platform)
        .bind(self.account_id)
        .bind(&self.event_type)
        .bind(&self.external_id)
        .bind(&self.payload)
        .bind(self.status)
        .bind(self.attempts)
        .bind(&self.last_error)
        .bind(self.received_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .fetch_optional(pool)
        .await?;

        Ok(item)
    }

    /// Find an in-flight (pending/processing) item for a delivery key.
    pub async fn find_in_flight(
        platform: Platform,
        source: RawSource,
        external_id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let item = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM raw_items
            WHERE platform = $1 AND source = $2 AND external_id = $3
              AND status IN ('pending', 'processing')
            LIMIT 1
            "#,
        ))
        .bind(platform)
        .bind(source)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

        Ok(item)
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        let item = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO raw_items (
                id, source, platform, account_id, event_type, external_id, payload,
                status, attempts, last_error, received_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.source)
        .bind(self.platform)
        .bind(self.account_id)
        .bind(&self.event_type)
        .bind(&self.external_id)
        .bind(&self.payload)
        .bind(self.status)
        .bind(self.attempts)
        .bind(&self.last_error)
        .bind(self.received_at)
        .bind(self.started_at)
        .bind(self.completed_at)
        .fetch_one(pool)
        .await?;

        Ok(item)
    }

    pub async fn find_by_id(id: RawItemId, pool: &PgPool) -> Result<Option<Self>> {
        let item = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM raw_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(item)
    }

    /// Claim up to `limit` pending items atomically using
    /// FOR UPDATE SKIP LOCKED, transitioning them `pending -> processing`.
    ///
    /// Two concurrent claimants can never receive the same row.
    pub async fn claim_pending(limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let items = sqlx::query_as::<_, Self>(&format!(
            r#"
            WITH next_items AS (
                SELECT id
                FROM raw_items
                WHERE status = 'pending'
                ORDER BY received_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE raw_items
            SET status = 'processing',
                started_at = NOW()
            WHERE id IN (SELECT id FROM next_items)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(items)
    }

    /// Return items stuck in `processing` longer than `older_than` to the
    /// queue. A worker that died after claiming never writes back, so
    /// nothing else would ever re-surface its claims. The reclaim counts
    /// an attempt: an item that keeps crashing its worker still reaches
    /// `dead_letter`.
    pub async fn reclaim_stale(older_than: Duration, pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE raw_items
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

    /// Mark a claimed item completed.
    ///
    /// Conditional on `status = 'processing'`: an operator dead-letter that
    /// raced this in-flight attempt wins, and the call reports `false`.
    pub async fn mark_completed(id: RawItemId, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE raw_items
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

    /// Record a failed attempt: back to `pending` while attempts remain,
    /// `dead_letter` at the cap. Returns the resulting status, or `None`
    /// if the item was no longer `processing` (fenced out).
    pub async fn mark_failed(id: RawItemId, error: &str, pool: &PgPool) -> Result<Option<ItemStatus>> {
        let status = sqlx::query_scalar::<_, ItemStatus>(
            r#"
            UPDATE raw_items
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

    /// Return a claimed item to `pending` without consuming an attempt.
    ///
    /// Used when the account's auth failed: the item may still be valid
    /// once the user re-authorizes, so it waits rather than burning
    /// retries.
    pub async fn release_for_auth(id: RawItemId, error: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE raw_items
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

    /// Operator action: force an item into `dead_letter` out-of-band.
    ///
    /// Works from any non-terminal state, including `processing` — the
    /// conditional write-backs above guarantee a lagging worker cannot
    /// resurrect it.
    pub async fn mark_dead_letter(id: RawItemId, reason: &str, pool: &PgPool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE raw_items
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

    /// Manual reprocessing of a dead-lettered item: clone its payload into
    /// a fresh item with `source = 'retry'` and a zeroed attempt counter.
    /// The original row is left untouched as the audit record. A second
    /// requeue while the first retry is still in flight returns the
    /// existing retry item.
    pub async fn requeue_dead_letter(id: RawItemId, pool: &PgPool) -> Result<Option<RawItemId>> {
        let Some(original) = Self::find_by_id(id, pool).await? else {
            return Ok(None);
        };
        if original.status != ItemStatus::DeadLetter {
            return Ok(None);
        }

        let retry = Self::builder()
            .source(RawSource::Retry)
            .platform(original.platform)
            .event_type(original.event_type.clone())
            .payload(original.payload.clone())
            .build();
        let retry = Self {
            account_id: original.account_id,
            external_id: original.external_id.clone(),
            ..retry
        };

        let result = retry.enqueue(pool).await?;
        Ok(Some(result.item_id()))
    }
}
