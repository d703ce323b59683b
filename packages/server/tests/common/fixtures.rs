//! Test fixtures.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use keepsake_core::common::{Platform, UserId};
use keepsake_core::domains::accounts::ConnectedAccount;
use keepsake_core::domains::ingest::models::raw_item::{RawItem, RawSource};

/// A healthy connected account with a token valid for hours. Tokens are
/// stored through the stub cipher (`enc:` prefix).
pub async fn connected_account(platform: Platform, pool: &PgPool) -> Result<ConnectedAccount> {
    let account = ConnectedAccount::builder()
        .user_id(UserId::new())
        .platform(platform)
        .access_token_enc("enc:access-token".to_string())
        .refresh_token_enc("enc:refresh-token".to_string())
        .token_expires_at(Utc::now() + Duration::hours(6))
        .build();

    account.upsert(pool).await
}

/// An account whose token is already inside the refresh margin.
pub async fn expiring_account(platform: Platform, pool: &PgPool) -> Result<ConnectedAccount> {
    let account = ConnectedAccount::builder()
        .user_id(UserId::new())
        .platform(platform)
        .access_token_enc("enc:stale-access".to_string())
        .refresh_token_enc("enc:refresh-token".to_string())
        .token_expires_at(Utc::now() + Duration::minutes(1))
        .build();

    account.upsert(pool).await
}

/// A Strava activity-created webhook item, as the receiver would enqueue
/// it.
pub fn strava_webhook(account: &ConnectedAccount, object_id: i64) -> RawItem {
    RawItem::builder()
        .source(RawSource::Webhook)
        .platform(Platform::Strava)
        .account_id(account.id)
        .event_type("activity.create".to_string())
        .external_id(format!("strava-{object_id}"))
        .payload(serde_json::json!({
            "object_type": "activity",
            "aspect_type": "create",
            "object_id": object_id,
            "owner_id": 42,
        }))
        .build()
}

/// A Strava activity payload as the API returns it.
pub fn strava_activity(id: i64, name: &str, photo_url: Option<&str>) -> serde_json::Value {
    let mut activity = serde_json::json!({
        "id": id,
        "name": name,
        "description": "",
        "start_date": "2024-03-01T06:30:00Z",
        "private": false,
    });
    if let Some(url) = photo_url {
        activity["photos"] = serde_json::json!({"primary": {"urls": {"600": url}}});
    }
    activity
}
