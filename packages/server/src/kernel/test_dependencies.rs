//! In-memory fakes for the kernel's infrastructure boundaries.
//!
//! Used by unit and integration tests; no network, no filesystem.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::PgPool;

use crate::common::Platform;
use crate::kernel::traits::{
    BaseMediaFetcher, BaseOAuthClient, BaseObjectStorage, BaseTokenCipher, BasePlatformGateway,
    GatewayError, MediaFetchError, OAuthError, PostPage, TokenGrant,
};
use crate::kernel::Kernel;

/// Gateway fake: posts and pages are seeded per platform.
#[derive(Default)]
pub struct FakeGateway {
    posts: Mutex<HashMap<(Platform, String), serde_json::Value>>,
    pages: Mutex<HashMap<Platform, Vec<PostPage>>>,
    /// When set, the next call fails with this error.
    fail_next: Mutex<Option<GatewayError>>,
}

impl FakeGateway {
    pub fn seed_post(&self, platform: Platform, post_id: &str, payload: serde_json::Value) {
        self.posts
            .lock()
            .unwrap()
            .insert((platform, post_id.to_string()), payload);
    }

    /// Seed the page sequence returned by successive cursors. Page `n` gets
    /// cursor `n+1` as its next cursor, except the last.
    pub fn seed_pages(&self, platform: Platform, pages: Vec<Vec<serde_json::Value>>) {
        let total = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, items)| PostPage {
                items,
                next_cursor: (i + 1 < total).then(|| (i + 1).to_string()),
            })
            .collect();
        self.pages.lock().unwrap().insert(platform, pages);
    }

    pub fn fail_next(&self, error: GatewayError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    fn take_failure(&self) -> Option<GatewayError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl BasePlatformGateway for FakeGateway {
    async fn fetch_page(
        &self,
        platform: Platform,
        _access_token: &str,
        cursor: Option<&str>,
    ) -> Result<PostPage, GatewayError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        let index: usize = cursor.map(|c| c.parse().unwrap_or(0)).unwrap_or(0);
        let pages = self.pages.lock().unwrap();
        pages
            .get(&platform)
            .and_then(|pages| pages.get(index))
            .cloned()
            .ok_or(GatewayError::NotFound)
    }

    async fn fetch_post(
        &self,
        platform: Platform,
        _access_token: &str,
        post_id: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        self.posts
            .lock()
            .unwrap()
            .get(&(platform, post_id.to_string()))
            .cloned()
            .ok_or(GatewayError::NotFound)
    }
}

/// OAuth fake: refresh outcomes are scripted in order; once the script is
/// exhausted it succeeds with a fresh token.
#[derive(Default)]
pub struct FakeOAuthClient {
    script: Mutex<VecDeque<Result<TokenGrant, OAuthError>>>,
    pub refresh_calls: Mutex<u32>,
}

impl FakeOAuthClient {
    pub fn push_outcome(&self, outcome: Result<TokenGrant, OAuthError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn grant(access: &str, refresh: &str, expires_at: chrono::DateTime<chrono::Utc>) -> TokenGrant {
        TokenGrant {
            access_token: access.to_string(),
            refresh_token: Some(refresh.to_string()),
            expires_at: Some(expires_at),
        }
    }
}

#[async_trait]
impl BaseOAuthClient for FakeOAuthClient {
    async fn refresh(
        &self,
        _platform: Platform,
        _refresh_token: &str,
    ) -> Result<TokenGrant, OAuthError> {
        *self.refresh_calls.lock().unwrap() += 1;
        match self.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(Self::grant(
                "fresh-access",
                "fresh-refresh",
                chrono::Utc::now() + chrono::Duration::hours(6),
            )),
        }
    }
}

/// Media fetcher fake: URL -> scripted outcome.
#[derive(Default)]
pub struct FakeMediaFetcher {
    responses: Mutex<HashMap<String, Result<Bytes, MediaFetchError>>>,
}

impl FakeMediaFetcher {
    pub fn seed_bytes(&self, url: &str, bytes: &[u8]) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(Bytes::copy_from_slice(bytes)));
    }

    pub fn seed_gone(&self, url: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Err(MediaFetchError::Gone("404 Not Found".to_string())),
        );
    }

    pub fn seed_transient(&self, url: &str, message: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Err(MediaFetchError::Transient(message.to_string())),
        );
    }
}

#[async_trait]
impl BaseMediaFetcher for FakeMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, MediaFetchError> {
        match self.responses.lock().unwrap().get(url) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(MediaFetchError::Gone(msg))) => Err(MediaFetchError::Gone(msg.clone())),
            Some(Err(MediaFetchError::Transient(msg))) => {
                Err(MediaFetchError::Transient(msg.clone()))
            }
            None => Err(MediaFetchError::Transient(format!("unseeded url {}", url))),
        }
    }
}

/// Object storage fake: path -> bytes in memory.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStorage {
    pub fn stored_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl BaseObjectStorage for MemoryObjectStorage {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }
}

/// Reversible stub cipher that makes ciphertext visibly different from
/// plaintext, so tests can assert tokens are stored encrypted.
pub struct StubCipher;

impl BaseTokenCipher for StubCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(format!("enc:{}", plaintext))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        ciphertext
            .strip_prefix("enc:")
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("not a stub ciphertext"))
    }
}

/// Bundle of fakes plus a Kernel wired to them.
pub struct TestDependencies {
    pub gateway: Arc<FakeGateway>,
    pub oauth: Arc<FakeOAuthClient>,
    pub media_fetcher: Arc<FakeMediaFetcher>,
    pub object_storage: Arc<MemoryObjectStorage>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            gateway: Arc::new(FakeGateway::default()),
            oauth: Arc::new(FakeOAuthClient::default()),
            media_fetcher: Arc::new(FakeMediaFetcher::default()),
            object_storage: Arc::new(MemoryObjectStorage::default()),
        }
    }

    pub fn kernel(&self, db_pool: PgPool) -> Arc<Kernel> {
        Arc::new(Kernel::new(
            db_pool,
            self.gateway.clone(),
            self.oauth.clone(),
            self.media_fetcher.clone(),
            self.object_storage.clone(),
            Arc::new(StubCipher),
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
