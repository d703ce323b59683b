//! Production implementations of the kernel's infrastructure traits.
//!
//! All HTTP calls carry a bounded timeout (set on the shared `reqwest`
//! client); a timeout surfaces as a transient failure and feeds the normal
//! attempts/backoff path.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use tracing::debug;

use crate::common::Platform;

use super::traits::{
    BaseMediaFetcher, BaseOAuthClient, BaseObjectStorage, BaseTokenCipher, BasePlatformGateway,
    GatewayError, MediaFetchError, OAuthError, PostPage, TokenGrant,
};

const STRAVA_API: &str = "https://www.strava.com/api/v3";
const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
const INSTAGRAM_GRAPH: &str = "https://graph.instagram.com";
const INSTAGRAM_MEDIA_FIELDS: &str =
    "id,caption,media_type,media_url,permalink,timestamp,children{media_url,media_type}";

const STRAVA_PAGE_SIZE: usize = 30;
const INSTAGRAM_PAGE_SIZE: usize = 25;

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

fn classify_status(status: StatusCode) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Auth,
        StatusCode::NOT_FOUND | StatusCode::GONE => GatewayError::NotFound,
        other => GatewayError::Transient(format!("upstream returned {}", other)),
    }
}

// =============================================================================
// Platform gateway
// =============================================================================

/// Reqwest-backed gateway for the platforms' read APIs.
pub struct HttpPlatformGateway {
    http: reqwest::Client,
}

impl HttpPlatformGateway {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
        })
    }

    async fn get_json(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut request = self.http.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))
    }

    async fn strava_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<PostPage, GatewayError> {
        // Strava paginates by page number; the cursor is that number.
        let page: u32 = cursor.map(|c| c.parse().unwrap_or(1)).unwrap_or(1);
        let url = format!(
            "{}/athlete/activities?per_page={}&page={}",
            STRAVA_API, STRAVA_PAGE_SIZE, page
        );

        let body = self.get_json(&url, Some(access_token)).await?;
        let items = body
            .as_array()
            .cloned()
            .ok_or_else(|| GatewayError::Transient("expected activity array".into()))?;

        let next_cursor = (items.len() == STRAVA_PAGE_SIZE).then(|| (page + 1).to_string());
        Ok(PostPage { items, next_cursor })
    }

    async fn instagram_page(
        &self,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<PostPage, GatewayError> {
        let mut url = format!(
            "{}/me/media?fields={}&limit={}&access_token={}",
            INSTAGRAM_GRAPH, INSTAGRAM_MEDIA_FIELDS, INSTAGRAM_PAGE_SIZE, access_token
        );
        if let Some(after) = cursor {
            url.push_str(&format!("&after={}", after));
        }

        let body = self.get_json(&url, None).await?;
        let items = body["data"]
            .as_array()
            .cloned()
            .ok_or_else(|| GatewayError::Transient("expected media data array".into()))?;

        // The `after` cursor is only meaningful while `paging.next` exists.
        let next_cursor = body["paging"]["next"]
            .as_str()
            .and_then(|_| body["paging"]["cursors"]["after"].as_str())
            .map(str::to_string);

        Ok(PostPage { items, next_cursor })
    }
}

#[async_trait]
impl BasePlatformGateway for HttpPlatformGateway {
    async fn fetch_page(
        &self,
        platform: Platform,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<PostPage, GatewayError> {
        debug!(platform = %platform, cursor = ?cursor, "fetching post page");
        match platform {
            Platform::Strava => self.strava_page(access_token, cursor).await,
            Platform::Instagram => self.instagram_page(access_token, cursor).await,
        }
    }

    async fn fetch_post(
        &self,
        platform: Platform,
        access_token: &str,
        post_id: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        debug!(platform = %platform, post_id = %post_id, "fetching single post");
        match platform {
            Platform::Strava => {
                let url = format!("{}/activities/{}", STRAVA_API, post_id);
                self.get_json(&url, Some(access_token)).await
            }
            Platform::Instagram => {
                let url = format!(
                    "{}/{}?fields={}&access_token={}",
                    INSTAGRAM_GRAPH, post_id, INSTAGRAM_MEDIA_FIELDS, access_token
                );
                self.get_json(&url, None).await
            }
        }
    }
}

// =============================================================================
// OAuth client
// =============================================================================

/// Reqwest-backed token refresh client.
pub struct HttpOAuthClient {
    http: reqwest::Client,
    strava_client_id: String,
    strava_client_secret: String,
}

impl HttpOAuthClient {
    pub fn new(
        timeout: Duration,
        strava_client_id: String,
        strava_client_secret: String,
    ) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            strava_client_id,
            strava_client_secret,
        })
    }
}

#[async_trait]
impl BaseOAuthClient for HttpOAuthClient {
    async fn refresh(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenGrant, OAuthError> {
        if !platform.uses_refresh_tokens() {
            return Err(OAuthError::Transient(format!(
                "{} does not issue refresh tokens",
                platform
            )));
        }

        let response = self
            .http
            .post(STRAVA_TOKEN_URL)
            .form(&[
                ("client_id", self.strava_client_id.as_str()),
                ("client_secret", self.strava_client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(OAuthError::InvalidGrant);
        }
        if !status.is_success() {
            return Err(OAuthError::Transient(format!(
                "token endpoint returned {}",
                status
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OAuthError::Transient(e.to_string()))?;

        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| OAuthError::Transient("token response missing access_token".into()))?
            .to_string();

        Ok(TokenGrant {
            access_token,
            refresh_token: body["refresh_token"].as_str().map(str::to_string),
            expires_at: body["expires_at"]
                .as_i64()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        })
    }
}

// =============================================================================
// Media fetcher
// =============================================================================

/// Reqwest-backed media byte fetcher.
pub struct HttpMediaFetcher {
    http: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl BaseMediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, MediaFetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MediaFetchError::Transient(e.to_string()))?;

        match response.status() {
            status @ (StatusCode::NOT_FOUND | StatusCode::GONE) => {
                Err(MediaFetchError::Gone(status.to_string()))
            }
            status if !status.is_success() => Err(MediaFetchError::Transient(format!(
                "media host returned {}",
                status
            ))),
            _ => response
                .bytes()
                .await
                .map_err(|e| MediaFetchError::Transient(e.to_string())),
        }
    }
}

// =============================================================================
// Object storage
// =============================================================================

/// Filesystem-backed object storage rooted at a directory.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl BaseObjectStorage for FsObjectStorage {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.full_path(path)).await?)
    }
}

// =============================================================================
// Token cipher
// =============================================================================

/// Identity cipher for development.
///
/// The real credential-encryption service is an external collaborator; the
/// pipeline only ever sees this trait.
pub struct PassthroughCipher;

impl BaseTokenCipher for PassthroughCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        Ok(ciphertext.to_string())
    }
}
