//! Canonical post model: the platform-agnostic archived post.
//!
//! `(platform, platform_post_id)` is the idempotency key for the whole
//! pipeline: no matter how many times upstream redelivers a post, exactly
//! one canonical row exists, carrying the newest version.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::common::utils::search_text::search_text;
use crate::common::{AccountId, CanonicalPostId, Platform, UserId};

const COLUMNS: &str = "id, user_id, account_id, platform, platform_post_id, content_kind, \
                       title, body_text, native_created_at, native_updated_at, published, \
                       deleted_upstream, search_text, created_at, updated_at";

/// Outcome of the last-writer-wins upsert.
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    /// The row was inserted or replaced with this version.
    Applied(CanonicalPost),
    /// A strictly newer version is already stored; nothing changed.
    Stale,
}

impl UpsertOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpsertOutcome::Applied(_))
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct CanonicalPost {
    #[builder(default = CanonicalPostId::new())]
    pub id: CanonicalPostId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub platform: Platform,
    pub platform_post_id: String,

    pub content_kind: String,
    #[builder(default, setter(strip_option))]
    pub title: Option<String>,
    #[builder(default)]
    pub body_text: String,

    pub native_created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub native_updated_at: Option<DateTime<Utc>>,

    #[builder(default = true)]
    pub published: bool,
    #[builder(default = false)]
    pub deleted_upstream: bool,

    #[builder(default)]
    pub search_text: String,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl CanonicalPost {
    /// The version timestamp used for last-writer-wins ordering.
    pub fn version_timestamp(&self) -> DateTime<Utc> {
        self.native_updated_at.unwrap_or(self.native_created_at)
    }

    /// Last-writer-wins upsert on `(platform, platform_post_id)`.
    ///
    /// An incoming version replaces the stored row when its version
    /// timestamp is at least as new: strictly older versions are
    /// rejected, so out-of-order deliveries converge on the newest one,
    /// while among equal platform timestamps the last processed wins.
    /// The equal-timestamp case is what lets platforms without an
    /// update timestamp (Strava) land edits via webhook re-fetch.
    pub async fn upsert(&self, pool: &PgPool) -> Result<UpsertOutcome> {
        let search_text = search_text(self.title.as_deref(), &self.body_text);

        let row = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO canonical_posts (
                id, user_id, account_id, platform, platform_post_id, content_kind,
                title, body_text, native_created_at, native_updated_at, published,
                deleted_upstream, search_text, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            ON CONFLICT (platform, platform_post_id) DO UPDATE SET
                content_kind = EXCLUDED.content_kind,
                title = EXCLUDED.title,
                body_text = EXCLUDED.body_text,
                native_created_at = EXCLUDED.native_created_at,
                native_updated_at = EXCLUDED.native_updated_at,
                published = EXCLUDED.published,
                search_text = EXCLUDED.search_text,
                updated_at = NOW()
            WHERE COALESCE(EXCLUDED.native_updated_at, EXCLUDED.native_created_at)
                >= COALESCE(canonical_posts.native_updated_at, canonical_posts.native_created_at)
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.user_id)
        .bind(self.account_id)
        .bind(self.platform)
        .bind(&self.platform_post_id)
        .bind(&self.content_kind)
        .bind(&self.title)
        .bind(&self.body_text)
        .bind(self.native_created_at)
        .bind(self.native_updated_at)
        .bind(self.published)
        .bind(self.deleted_upstream)
        .bind(&search_text)
        .fetch_optional(pool)
        .await?;

        Ok(match row {
            Some(post) => UpsertOutcome::Applied(post),
            None => UpsertOutcome::Stale,
        })
    }

    /// Tombstone a post deleted upstream. The archived content stays; only
    /// the flag flips. A deletion for a post that was never archived is a
    /// no-op.
    pub async fn mark_deleted_upstream(
        platform: Platform,
        platform_post_id: &str,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE canonical_posts
            SET deleted_upstream = TRUE,
                updated_at = NOW()
            WHERE platform = $1 AND platform_post_id = $2
            "#,
        )
        .bind(platform)
        .bind(platform_post_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_platform_id(
        platform: Platform,
        platform_post_id: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let post = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM canonical_posts WHERE platform = $1 AND platform_post_id = $2"
        ))
        .bind(platform)
        .bind(platform_post_id)
        .fetch_optional(pool)
        .await?;

        Ok(post)
    }

    pub async fn find_by_user(user_id: UserId, pool: &PgPool) -> Result<Vec<Self>> {
        let posts = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM canonical_posts
            WHERE user_id = $1
            ORDER BY native_created_at DESC
            "#,
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(posts)
    }

    /// Full-text search over the user's archive.
    pub async fn search(user_id: UserId, query: &str, pool: &PgPool) -> Result<Vec<Self>> {
        let posts = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS} FROM canonical_posts
            WHERE user_id = $1
              AND to_tsvector('simple', search_text) @@ plainto_tsquery('simple', $2)
            ORDER BY native_created_at DESC
            "#,
        ))
        .bind(user_id)
        .bind(query)
        .fetch_all(pool)
        .await?;

        Ok(posts)
    }
}
