use sha2::{Digest, Sha256};

use crate::common::{Platform, UserId};

/// Derive the content address for a media URL.
///
/// The address is SHA256 of the *URL*, not the downloaded bytes. This is a
/// deliberate trade-off: two different URLs serving identical bytes are
/// stored twice, but identical URLs always deduplicate, and the storage
/// location can be computed from the row alone with no database round trip.
/// Stored-path and actual-object can never diverge because the path is
/// never stored.
pub fn content_address(original_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derive the object-storage path for a media download.
///
/// Layout: `{user}/{platform}/{content_address}.{ext}`, where `ext` comes
/// from the URL path (query string ignored), falling back to `bin`.
pub fn storage_path(user_id: UserId, platform: Platform, original_url: &str) -> String {
    format!(
        "{}/{}/{}.{}",
        user_id,
        platform,
        content_address(original_url),
        extension_for(original_url)
    )
}

fn extension_for(raw_url: &str) -> String {
    // The URL path only; query strings often contain dotted signatures.
    let path = match url::Url::parse(raw_url) {
        Ok(parsed) => parsed.path().trim_end_matches('/').to_string(),
        Err(_) => raw_url
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(raw_url)
            .trim_end_matches('/')
            .to_string(),
    };

    let last_segment = path.rsplit('/').next().unwrap_or("");
    match last_segment.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_string()
        }
        _ => "bin".to_string(),
    }
}
