//! Raw item queue semantics: claims, retries, dead-lettering.

mod common;

use chrono::Duration;
use test_context::test_context;

use keepsake_core::common::{ItemStatus, Platform, MAX_ATTEMPTS};
use keepsake_core::domains::ingest::models::raw_item::{RawItem, RawSource};

use common::TestHarness;

fn pending_item(n: i64) -> RawItem {
    RawItem::builder()
        .source(RawSource::Fetch)
        .platform(Platform::Strava)
        .event_type("sync.page".to_string())
        .payload(serde_json::json!({"items": [], "n": n}))
        .build()
}

fn webhook_item(external_id: &str) -> RawItem {
    RawItem::builder()
        .source(RawSource::Webhook)
        .platform(Platform::Strava)
        .event_type("activity.create".to_string())
        .external_id(external_id.to_string())
        .payload(serde_json::json!({"object_id": 1}))
        .build()
}

/// Backdate a claim past the processing timeout, as if the claiming
/// worker died long ago.
async fn age_claim(id: keepsake_core::common::RawItemId, pool: &sqlx::PgPool) {
    sqlx::query("UPDATE raw_items SET started_at = NOW() - INTERVAL '11 minutes' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
async fn claims_never_overlap(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    for n in 0..6 {
        pending_item(n).insert(pool).await.unwrap();
    }

    let (a, b) = tokio::join!(
        RawItem::claim_pending(3, pool),
        RawItem::claim_pending(3, pool)
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.len() + b.len(), 6);
    for item in a.iter().chain(b.iter()) {
        assert_eq!(item.status, ItemStatus::Processing);
        assert!(item.started_at.is_some());
    }

    let a_ids: Vec<_> = a.iter().map(|i| i.id).collect();
    assert!(b.iter().all(|item| !a_ids.contains(&item.id)));

    // Nothing left to claim.
    assert!(RawItem::claim_pending(10, pool).await.unwrap().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failures_retry_until_the_cap_then_dead_letter(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = pending_item(0).insert(pool).await.unwrap();

    for attempt in 1..=MAX_ATTEMPTS {
        let claimed = RawItem::claim_pending(10, pool).await.unwrap();
        assert_eq!(claimed.len(), 1, "attempt {attempt} should claim the item");

        let status = RawItem::mark_failed(item.id, "boom", pool)
            .await
            .unwrap()
            .unwrap();
        if attempt < MAX_ATTEMPTS {
            assert_eq!(status, ItemStatus::Pending);
        } else {
            assert_eq!(status, ItemStatus::DeadLetter);
        }
    }

    // Dead-lettered: no fourth attempt.
    assert!(RawItem::claim_pending(10, pool).await.unwrap().is_empty());

    let stored = RawItem::find_by_id(item.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::DeadLetter);
    assert_eq!(stored.attempts, MAX_ATTEMPTS);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn crashed_claims_return_to_the_queue(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = pending_item(0).insert(pool).await.unwrap();

    // Claimed, then the worker dies without writing back.
    RawItem::claim_pending(10, pool).await.unwrap();

    // Still within the processing window: nothing to reclaim.
    assert_eq!(
        RawItem::reclaim_stale(Duration::minutes(10), pool)
            .await
            .unwrap(),
        0
    );

    age_claim(item.id, pool).await;
    assert_eq!(
        RawItem::reclaim_stale(Duration::minutes(10), pool)
            .await
            .unwrap(),
        1
    );

    let stored = RawItem::find_by_id(item.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.last_error.as_deref(), Some("processing timed out"));

    // Back on the queue for the next worker.
    assert_eq!(RawItem::claim_pending(10, pool).await.unwrap().len(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn crash_looping_item_still_dead_letters(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = pending_item(0).insert(pool).await.unwrap();

    for _ in 0..MAX_ATTEMPTS {
        assert_eq!(RawItem::claim_pending(10, pool).await.unwrap().len(), 1);
        age_claim(item.id, pool).await;
        assert_eq!(
            RawItem::reclaim_stale(Duration::minutes(10), pool)
                .await
                .unwrap(),
            1
        );
    }

    let stored = RawItem::find_by_id(item.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::DeadLetter);
    assert_eq!(stored.attempts, MAX_ATTEMPTS);
    assert!(RawItem::claim_pending(10, pool).await.unwrap().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn concurrent_redeliveries_insert_once(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;

    let (a, b) = tokio::join!(
        webhook_item("strava-1").enqueue(pool),
        webhook_item("strava-1").enqueue(pool)
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.item_id(), b.item_id());
    assert!(a.is_created() ^ b.is_created());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_items")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn auth_release_consumes_no_attempt(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = pending_item(0).insert(pool).await.unwrap();

    RawItem::claim_pending(10, pool).await.unwrap();
    assert!(RawItem::release_for_auth(item.id, "token expired", pool)
        .await
        .unwrap());

    let stored = RawItem::find_by_id(item.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::Pending);
    assert_eq!(stored.attempts, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn operator_dead_letter_beats_lagging_worker(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = pending_item(0).insert(pool).await.unwrap();

    // Worker claims, then the operator forces a dead-letter while the
    // worker is still processing.
    RawItem::claim_pending(10, pool).await.unwrap();
    assert!(RawItem::mark_dead_letter(item.id, "operator", pool)
        .await
        .unwrap());

    // The lagging worker's write-backs are fenced out.
    assert!(!RawItem::mark_completed(item.id, pool).await.unwrap());
    assert!(RawItem::mark_failed(item.id, "late", pool)
        .await
        .unwrap()
        .is_none());

    let stored = RawItem::find_by_id(item.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.status, ItemStatus::DeadLetter);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn requeue_clones_the_dead_letter(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = pending_item(0).insert(pool).await.unwrap();

    RawItem::claim_pending(10, pool).await.unwrap();
    RawItem::mark_dead_letter(item.id, "bad batch", pool)
        .await
        .unwrap();

    let new_id = RawItem::requeue_dead_letter(item.id, pool)
        .await
        .unwrap()
        .expect("dead-lettered item should requeue");
    assert_ne!(new_id, item.id);

    let clone = RawItem::find_by_id(new_id, pool).await.unwrap().unwrap();
    assert_eq!(clone.status, ItemStatus::Pending);
    assert_eq!(clone.source, RawSource::Retry);
    assert_eq!(clone.attempts, 0);
    assert_eq!(clone.payload, item.payload);

    // The original stays as the audit record.
    let original = RawItem::find_by_id(item.id, pool).await.unwrap().unwrap();
    assert_eq!(original.status, ItemStatus::DeadLetter);

    // Only dead-lettered items requeue.
    assert!(RawItem::requeue_dead_letter(new_id, pool)
        .await
        .unwrap()
        .is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn double_requeue_reuses_the_in_flight_retry(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let item = webhook_item("strava-9").insert(pool).await.unwrap();

    RawItem::claim_pending(10, pool).await.unwrap();
    RawItem::mark_dead_letter(item.id, "bad payload", pool)
        .await
        .unwrap();

    let first = RawItem::requeue_dead_letter(item.id, pool)
        .await
        .unwrap()
        .unwrap();
    // An operator requeueing again while the retry is still pending gets
    // the same retry item back.
    let second = RawItem::requeue_dead_letter(item.id, pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, second);
}
