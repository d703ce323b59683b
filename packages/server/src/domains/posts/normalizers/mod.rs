//! Per-platform normalization into the canonical post shape.
//!
//! Normalizers are pure: native payload in, canonical draft out. All
//! database work stays in the worker.

mod instagram;
mod strava;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::common::Platform;

pub use instagram::InstagramNormalizer;
pub use strava::StravaNormalizer;

/// Platform-agnostic post fields, ready for the canonical upsert. Media
/// URLs ride along so the worker can enqueue downloads.
#[derive(Debug, Clone)]
pub struct CanonicalDraft {
    pub content_kind: String,
    pub title: Option<String>,
    pub body_text: String,
    pub native_created_at: DateTime<Utc>,
    pub native_updated_at: Option<DateTime<Utc>>,
    pub published: bool,
    pub media_urls: Vec<String>,
}

/// Outcome of normalizing one native payload.
#[derive(Debug, Clone)]
pub enum Normalized {
    Post(CanonicalDraft),
    /// Upstream deleted the post. The canonical record is kept and
    /// tombstoned, never removed.
    Deletion,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed native payload: {0}")]
pub struct NormalizeError(pub String);

pub trait Normalizer: Send + Sync {
    fn platform(&self) -> Platform;

    fn normalize(&self, payload: &serde_json::Value) -> Result<Normalized, NormalizeError>;
}

pub struct NormalizerRegistry {
    normalizers: HashMap<Platform, Arc<dyn Normalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self {
            normalizers: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StravaNormalizer));
        registry.register(Arc::new(InstagramNormalizer));
        registry
    }

    pub fn register(&mut self, normalizer: Arc<dyn Normalizer>) {
        self.normalizers.insert(normalizer.platform(), normalizer);
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn Normalizer>> {
        self.normalizers.get(&platform)
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Tombstone payloads are uniform across platforms.
pub(crate) fn is_tombstone(payload: &serde_json::Value) -> bool {
    payload["deleted"].as_bool() == Some(true)
}

/// Parse a required timestamp field. Accepts RFC 3339 and the
/// colonless-offset variant some platforms emit (`+0000`).
pub(crate) fn parse_timestamp(
    payload: &serde_json::Value,
    field: &str,
) -> Result<DateTime<Utc>, NormalizeError> {
    let raw = payload[field]
        .as_str()
        .ok_or_else(|| NormalizeError(format!("missing timestamp field {field}")))?;

    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| NormalizeError(format!("bad timestamp in {field}: {e}")))
}
