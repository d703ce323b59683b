//! Connected account model: one row per (user, platform) OAuth connection.
//!
//! Tokens are stored encrypted; only the token manager reads or writes
//! them.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use typed_builder::TypedBuilder;

use crate::common::{AccountId, Platform, UserId};

const COLUMNS: &str = "id, user_id, platform, access_token_enc, refresh_token_enc, \
                       token_expires_at, scope, status, error_count, sync_enabled, \
                       last_sync_at, created_at, updated_at";

/// Consecutive sync failures before the account is flagged `error`.
/// Flagged accounts still sync; the status is an operator signal.
pub const ERROR_FLAG_THRESHOLD: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    /// Repeated sync failures; still scheduled, flagged for operators.
    Error,
    /// Refresh token rejected. Excluded from sync until re-authorization.
    Disconnected,
    /// Token expired with no refresh path (Instagram). Excluded from sync
    /// until re-authorization.
    TokenExpired,
}

impl AccountStatus {
    /// Whether the scheduler may enqueue syncs for this account.
    pub fn is_syncable(&self) -> bool {
        matches!(self, AccountStatus::Active | AccountStatus::Error)
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ConnectedAccount {
    #[builder(default = AccountId::new())]
    pub id: AccountId,
    pub user_id: UserId,
    pub platform: Platform,

    /// Ciphertext from the token cipher, never the bare token.
    pub access_token_enc: String,
    #[builder(default, setter(strip_option))]
    pub refresh_token_enc: Option<String>,
    #[builder(default, setter(strip_option))]
    pub token_expires_at: Option<DateTime<Utc>>,
    #[builder(default)]
    pub scope: String,

    #[builder(default)]
    pub status: AccountStatus,
    #[builder(default = 0)]
    pub error_count: i32,
    #[builder(default = true)]
    pub sync_enabled: bool,
    #[builder(default, setter(strip_option))]
    pub last_sync_at: Option<DateTime<Utc>>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl ConnectedAccount {
    /// Insert or replace the connection for this (user, platform). A user
    /// re-authorizing overwrites the old grant and clears error state.
    pub async fn upsert(&self, pool: &PgPool) -> Result<Self> {
        let account = sqlx::query_as::<_, Self>(&format!(
            r#"
            INSERT INTO connected_accounts (
                id, user_id, platform, access_token_enc, refresh_token_enc,
                token_expires_at, scope, status, error_count, sync_enabled,
                last_sync_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id, platform) DO UPDATE SET
                access_token_enc = EXCLUDED.access_token_enc,
                refresh_token_enc = EXCLUDED.refresh_token_enc,
                token_expires_at = EXCLUDED.token_expires_at,
                scope = EXCLUDED.scope,
                status = 'active',
                error_count = 0,
                updated_at = NOW()
            RETURNING {COLUMNS}
            "#,
        ))
        .bind(self.id)
        .bind(self.user_id)
        .bind(self.platform)
        .bind(&self.access_token_enc)
        .bind(&self.refresh_token_enc)
        .bind(self.token_expires_at)
        .bind(&self.scope)
        .bind(self.status)
        .bind(self.error_count)
        .bind(self.sync_enabled)
        .bind(self.last_sync_at)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(pool)
        .await?;

        Ok(account)
    }

    pub async fn find_by_id(id: AccountId, pool: &PgPool) -> Result<Option<Self>> {
        let account = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM connected_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(account)
    }

    /// Row-lock the account for a token refresh. Serializes concurrent
    /// refreshes for the same account; the caller must re-check expiry
    /// after acquiring the lock.
    pub async fn lock_for_refresh(id: AccountId, conn: &mut PgConnection) -> Result<Option<Self>> {
        let account = sqlx::query_as::<_, Self>(&format!(
            "SELECT {COLUMNS} FROM connected_accounts WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(account)
    }

    /// Accounts the scheduler should sync: enabled, in a syncable status,
    /// and not synced within the last `interval`.
    pub async fn due_for_sync(interval: Duration, pool: &PgPool) -> Result<Vec<Self>> {
        let accounts = sqlx::query_as::<_, Self>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM connected_accounts
            WHERE sync_enabled
              AND status IN ('active', 'error')
              AND (last_sync_at IS NULL
                   OR last_sync_at <= NOW() - make_interval(secs => $1))
            ORDER BY last_sync_at NULLS FIRST
            "#,
        ))
        .bind(interval.num_seconds() as f64)
        .fetch_all(pool)
        .await?;

        Ok(accounts)
    }

    /// Store a fresh token grant after a successful refresh. Keeps the old
    /// refresh token when the platform did not rotate it.
    pub async fn store_tokens(
        id: AccountId,
        access_token_enc: &str,
        refresh_token_enc: Option<&str>,
        token_expires_at: Option<DateTime<Utc>>,
        conn: &mut PgConnection,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE connected_accounts
            SET access_token_enc = $2,
                refresh_token_enc = COALESCE($3, refresh_token_enc),
                token_expires_at = $4,
                status = 'active',
                error_count = 0,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(access_token_enc)
        .bind(refresh_token_enc)
        .bind(token_expires_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn set_status(
        id: AccountId,
        status: AccountStatus,
        conn: &mut PgConnection,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE connected_accounts SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Record a completed sync pass: reset the error counter and stamp
    /// `last_sync_at`.
    pub async fn record_sync_success(id: AccountId, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE connected_accounts
            SET last_sync_at = NOW(),
                error_count = 0,
                status = CASE WHEN status = 'error' THEN 'active'::account_status ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Record a failed sync pass. After enough consecutive failures the
    /// account is flagged `error`.
    pub async fn record_sync_error(id: AccountId, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE connected_accounts
            SET error_count = error_count + 1,
                status = CASE WHEN error_count + 1 >= $2 AND status = 'active'
                         THEN 'error'::account_status ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ERROR_FLAG_THRESHOLD)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Days until the current token expires, negative when already expired.
    /// `None` when the token has no recorded expiry.
    pub fn days_to_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.token_expires_at
            .map(|expires_at| (expires_at - now).num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account() -> ConnectedAccount {
        ConnectedAccount::builder()
            .user_id(UserId::new())
            .platform(Platform::Strava)
            .access_token_enc("enc:tok".to_string())
            .build()
    }

    #[test]
    fn new_account_defaults() {
        let account = sample_account();
        assert_eq!(account.status, AccountStatus::Active);
        assert_eq!(account.error_count, 0);
        assert!(account.sync_enabled);
        assert!(account.refresh_token_enc.is_none());
    }

    #[test]
    fn syncable_statuses() {
        assert!(AccountStatus::Active.is_syncable());
        assert!(AccountStatus::Error.is_syncable());
        assert!(!AccountStatus::Disconnected.is_syncable());
        assert!(!AccountStatus::TokenExpired.is_syncable());
    }

    #[test]
    fn days_to_expiry_rounds_down() {
        let now = Utc::now();
        let mut account = sample_account();

        account.token_expires_at = Some(now + Duration::days(10) + Duration::hours(5));
        assert_eq!(account.days_to_expiry(now), Some(10));

        account.token_expires_at = Some(now - Duration::days(2));
        assert_eq!(account.days_to_expiry(now), Some(-2));

        account.token_expires_at = None;
        assert_eq!(account.days_to_expiry(now), None);
    }
}
