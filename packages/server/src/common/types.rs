//! Cross-domain value types.

use serde::{Deserialize, Serialize};

/// A supported upstream platform.
///
/// Every per-platform behavior in the pipeline (payload parsing,
/// normalization, token lifecycle) is dispatched on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "platform", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Strava,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Strava => "strava",
            Platform::Instagram => "instagram",
        }
    }

    /// Whether the platform issues refresh tokens.
    ///
    /// Instagram hands out fixed-duration long-lived tokens with no refresh
    /// grant; expiry there means the user must re-authorize.
    pub fn uses_refresh_tokens(&self) -> bool {
        match self {
            Platform::Strava => true,
            Platform::Instagram => false,
        }
    }

    pub fn all() -> &'static [Platform] {
        &[Platform::Strava, Platform::Instagram]
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strava" => Ok(Platform::Strava),
            "instagram" => Ok(Platform::Instagram),
            _ => Err(anyhow::anyhow!("Unknown platform: {}", s)),
        }
    }
}

/// Maximum automatic attempts for any queued item before it becomes
/// terminal (`dead_letter` for pipeline items, `failed` for media).
pub const MAX_ATTEMPTS: i32 = 3;

/// How long an item may sit in its in-flight state before it is assumed
/// orphaned by a crashed worker and returned to the queue.
pub const PROCESSING_TIMEOUT_MINUTES: i64 = 10;

/// Lifecycle state shared by raw items and extracted posts.
///
/// Status only moves forward: `pending -> processing -> {completed |
/// pending (retry) | dead_letter}`. `dead_letter` is terminal and never
/// retried automatically; reprocessing happens by re-injecting a new item
/// with source `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "pipeline_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
}

impl ItemStatus {
    /// Terminal states are never picked up by a claim again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::DeadLetter)
    }
}
