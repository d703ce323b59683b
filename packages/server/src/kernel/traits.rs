// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic. Business logic
// (like "extract posts from a payload") lives in domain code that uses
// these traits.
//
// Naming convention: Base* for trait names (e.g., BasePlatformGateway).

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::common::Platform;

// =============================================================================
// Platform Gateway (Infrastructure - upstream list/read APIs)
// =============================================================================

/// One page of a platform's list API.
#[derive(Debug, Clone)]
pub struct PostPage {
    /// Raw post objects, exactly as the platform returned them.
    pub items: Vec<serde_json::Value>,
    /// Opaque cursor for the next page, `None` when this is the last page.
    pub next_cursor: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("upstream rejected credentials")]
    Auth,

    #[error("resource not found upstream")]
    NotFound,

    #[error("transient upstream failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait BasePlatformGateway: Send + Sync {
    /// Fetch one page of the account's post history.
    ///
    /// `cursor` is the platform-opaque pagination cursor; `None` means the
    /// most recent page (or the beginning of history for backfills, where
    /// the caller passes the platform's "start" cursor).
    async fn fetch_page(
        &self,
        platform: Platform,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<PostPage, GatewayError>;

    /// Fetch a single post by its platform ID (webhooks often carry only
    /// the ID).
    async fn fetch_post(
        &self,
        platform: Platform,
        access_token: &str,
        post_id: &str,
    ) -> Result<serde_json::Value, GatewayError>;
}

// =============================================================================
// OAuth Client (Infrastructure - token refresh endpoint)
// =============================================================================

/// Tokens returned by a successful refresh.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The refresh token was explicitly rejected. Not retryable; the user
    /// must re-authorize.
    #[error("refresh token rejected (invalid_grant)")]
    InvalidGrant,

    #[error("transient refresh failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait BaseOAuthClient: Send + Sync {
    async fn refresh(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenGrant, OAuthError>;
}

// =============================================================================
// Media Fetcher (Infrastructure - raw media bytes)
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MediaFetchError {
    /// 404/410: the media no longer exists upstream. Terminal. Carries
    /// the upstream status line for the audit trail.
    #[error("media gone upstream: {0}")]
    Gone(String),

    #[error("transient fetch failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait BaseMediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, MediaFetchError>;
}

// =============================================================================
// Object Storage (Infrastructure - archived media bytes)
// =============================================================================

#[async_trait]
pub trait BaseObjectStorage: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

// =============================================================================
// Token Cipher (Infrastructure - credential encryption at rest)
// =============================================================================

/// Encrypts/decrypts OAuth token blobs. The pipeline stores only the
/// ciphertext this boundary produces.
pub trait BaseTokenCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}
