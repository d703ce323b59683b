//! Strava activity normalization.

use crate::common::Platform;

use super::{parse_timestamp, CanonicalDraft, Normalized, NormalizeError, Normalizer};

pub struct StravaNormalizer;

impl StravaNormalizer {
    /// Activity photo URLs, largest size available. Absent on most
    /// activities.
    fn media_urls(payload: &serde_json::Value) -> Vec<String> {
        let urls = &payload["photos"]["primary"]["urls"];
        let Some(urls) = urls.as_object() else {
            return vec![];
        };

        // Keys are pixel sizes as strings ("100", "600"); take the largest.
        urls.iter()
            .max_by_key(|(size, _)| size.parse::<u32>().unwrap_or(0))
            .and_then(|(_, url)| url.as_str())
            .map(|url| vec![url.to_string()])
            .unwrap_or_default()
    }
}

impl Normalizer for StravaNormalizer {
    fn platform(&self) -> Platform {
        Platform::Strava
    }

    fn normalize(&self, payload: &serde_json::Value) -> Result<Normalized, NormalizeError> {
        let title = payload["name"].as_str().map(str::to_string);
        let body_text = payload["description"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let native_created_at = parse_timestamp(payload, "start_date")?;

        Ok(Normalized::Post(CanonicalDraft {
            content_kind: "activity".to_string(),
            title,
            body_text,
            native_created_at,
            // Strava exposes no activity update timestamp. Every version
            // of an activity carries the same start_date; edits reach the
            // archive because the canonical upsert lets equal-timestamp
            // versions replace.
            native_updated_at: None,
            published: !payload["private"].as_bool().unwrap_or(false),
            media_urls: Self::media_urls(payload),
        }))
    }
}
