//! Media download dedup, backoff, and terminal states.

mod common;

use chrono::{Duration, Utc};
use test_context::test_context;

use keepsake_core::common::{Platform, UserId, MAX_ATTEMPTS};
use keepsake_core::domains::media::models::media_download::{MediaDownload, MediaStatus};
use keepsake_core::domains::media::MediaWorker;
use keepsake_core::domains::posts::CanonicalPost;
use keepsake_core::kernel::{BaseObjectStorage, PipelineWorker};

use common::{connected_account, TestHarness};

async fn canonical_post(
    account: &keepsake_core::domains::accounts::ConnectedAccount,
    platform_post_id: &str,
    pool: &sqlx::PgPool,
) -> CanonicalPost {
    let post = CanonicalPost::builder()
        .user_id(account.user_id)
        .account_id(account.id)
        .platform(account.platform)
        .platform_post_id(platform_post_id.to_string())
        .content_kind("image".to_string())
        .native_created_at(Utc::now())
        .build();
    match post.upsert(pool).await.unwrap() {
        keepsake_core::domains::posts::UpsertOutcome::Applied(post) => post,
        keepsake_core::domains::posts::UpsertOutcome::Stale => unreachable!(),
    }
}

fn download(post: &CanonicalPost, url: &str) -> MediaDownload {
    MediaDownload::builder()
        .canonical_post_id(post.id)
        .user_id(post.user_id)
        .platform(post.platform)
        .original_url(url.to_string())
        .build()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn same_user_same_url_deduplicates(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let a = canonical_post(&account, "1", pool).await;
    let b = canonical_post(&account, "2", pool).await;

    let url = "https://cdn.ig.test/shared.jpg";
    assert!(download(&a, url).enqueue(pool).await.unwrap());
    // Second post reusing the URL: one record, one eventual object.
    assert!(!download(&b, url).enqueue(pool).await.unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn different_users_store_separately(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let first = connected_account(Platform::Instagram, pool).await.unwrap();
    let second = connected_account(Platform::Instagram, pool).await.unwrap();
    assert_ne!(first.user_id, second.user_id);

    let a = canonical_post(&first, "1", pool).await;
    let b = canonical_post(&second, "1b", pool).await;

    let url = "https://cdn.ig.test/shared.jpg";
    let da = download(&a, url);
    let db = download(&b, url);
    assert!(da.enqueue(pool).await.unwrap());
    assert!(db.enqueue(pool).await.unwrap());

    // Per-user isolation extends to the storage layout.
    assert_ne!(da.storage_path(), db.storage_path());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn gone_upstream_is_terminal_on_first_attempt(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let post = canonical_post(&account, "1", pool).await;

    let url = "https://cdn.ig.test/deleted.jpg";
    ctx.deps.media_fetcher.seed_gone(url);
    let record = download(&post, url);
    record.enqueue(pool).await.unwrap();

    let worker = MediaWorker::new(ctx.kernel.clone());
    assert_eq!(worker.tick(10).await.unwrap(), 1);

    let stored = MediaDownload::find_by_id(record.id, pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MediaStatus::Unavailable);
    assert_eq!(stored.attempts, 1);
    // The audit trail keeps the upstream status line.
    assert_eq!(
        stored.last_error.as_deref(),
        Some("media gone upstream: 404 Not Found")
    );

    // Terminal: never claimed again.
    assert!(MediaDownload::claim_due(10, pool).await.unwrap().is_empty());
    assert!(ctx.deps.object_storage.stored_paths().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_download_waits_out_its_backoff(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let post = canonical_post(&account, "1", pool).await;

    let url = "https://cdn.ig.test/flaky.jpg";
    ctx.deps.media_fetcher.seed_transient(url, "503");
    let record = download(&post, url);
    record.enqueue(pool).await.unwrap();

    let worker = MediaWorker::new(ctx.kernel.clone());
    assert_eq!(worker.tick(10).await.unwrap(), 1);

    let stored = MediaDownload::find_by_id(record.id, pool)
        .await
        .unwrap()
        .unwrap();
    // Attempts remain, so the download goes back to pending.
    assert_eq!(stored.status, MediaStatus::Pending);
    assert_eq!(stored.attempts, 1);

    // Backoff has not elapsed yet.
    assert!(MediaDownload::claim_due(10, pool).await.unwrap().is_empty());

    // Age the last attempt past the backoff window; it becomes claimable
    // and the claim records the next attempt.
    sqlx::query("UPDATE media_downloads SET last_attempt_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(record.id)
        .execute(pool)
        .await
        .unwrap();

    let claimed = MediaDownload::claim_due(10, pool).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 2);
    assert_eq!(claimed[0].status, MediaStatus::Downloading);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn attempt_cap_ends_retries(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let post = canonical_post(&account, "1", pool).await;

    let url = "https://cdn.ig.test/always-down.jpg";
    ctx.deps.media_fetcher.seed_transient(url, "503");
    let record = download(&post, url);
    record.enqueue(pool).await.unwrap();

    let worker = MediaWorker::new(ctx.kernel.clone());
    for _ in 0..MAX_ATTEMPTS {
        assert_eq!(worker.tick(10).await.unwrap(), 1);
        sqlx::query(
            "UPDATE media_downloads SET last_attempt_at = NOW() - INTERVAL '1 minute' WHERE id = $1",
        )
        .bind(record.id)
        .execute(pool)
        .await
        .unwrap();
    }

    let stored = MediaDownload::find_by_id(record.id, pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MediaStatus::Failed);
    assert_eq!(stored.attempts, MAX_ATTEMPTS);

    // Attempts exhausted: even with backoff elapsed, nothing to claim.
    assert!(MediaDownload::claim_due(10, pool).await.unwrap().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn orphaned_download_is_reclaimed(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let post = canonical_post(&account, "1", pool).await;

    let record = download(&post, "https://cdn.ig.test/slow.jpg");
    record.enqueue(pool).await.unwrap();

    // Claimed, then the worker dies mid-download.
    assert_eq!(MediaDownload::claim_due(10, pool).await.unwrap().len(), 1);
    assert_eq!(
        MediaDownload::reclaim_stale(Duration::minutes(10), pool)
            .await
            .unwrap(),
        0
    );

    sqlx::query(
        "UPDATE media_downloads SET last_attempt_at = NOW() - INTERVAL '11 minutes' WHERE id = $1",
    )
    .bind(record.id)
    .execute(pool)
    .await
    .unwrap();

    assert_eq!(
        MediaDownload::reclaim_stale(Duration::minutes(10), pool)
            .await
            .unwrap(),
        1
    );

    let stored = MediaDownload::find_by_id(record.id, pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MediaStatus::Pending);
    assert_eq!(stored.last_error.as_deref(), Some("download timed out"));

    // Claimable again; the attempt burned at the first claim stands.
    let claimed = MediaDownload::claim_due(10, pool).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 2);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn reclaim_at_the_attempt_cap_fails_the_download(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let post = canonical_post(&account, "1", pool).await;

    let record = download(&post, "https://cdn.ig.test/doomed.jpg");
    record.enqueue(pool).await.unwrap();

    for _ in 0..MAX_ATTEMPTS {
        assert_eq!(MediaDownload::claim_due(10, pool).await.unwrap().len(), 1);
        sqlx::query(
            "UPDATE media_downloads SET last_attempt_at = NOW() - INTERVAL '11 minutes' WHERE id = $1",
        )
        .bind(record.id)
        .execute(pool)
        .await
        .unwrap();
        MediaDownload::reclaim_stale(Duration::minutes(10), pool)
            .await
            .unwrap();
    }

    let stored = MediaDownload::find_by_id(record.id, pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MediaStatus::Failed);
    assert_eq!(stored.attempts, MAX_ATTEMPTS);
    assert!(MediaDownload::claim_due(10, pool).await.unwrap().is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn existing_object_skips_the_fetch(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let account = connected_account(Platform::Instagram, pool).await.unwrap();
    let post = canonical_post(&account, "1", pool).await;

    // Bytes already archived (say, by a worker that crashed before its
    // write-back); the URL is deliberately not seeded, so any fetch would
    // fail the test.
    let record = download(&post, "https://cdn.ig.test/archived.jpg");
    ctx.deps
        .object_storage
        .put(&record.storage_path(), b"already-there")
        .await
        .unwrap();
    record.enqueue(pool).await.unwrap();

    let worker = MediaWorker::new(ctx.kernel.clone());
    assert_eq!(worker.tick(10).await.unwrap(), 1);

    let stored = MediaDownload::find_by_id(record.id, pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MediaStatus::Downloaded);
}
