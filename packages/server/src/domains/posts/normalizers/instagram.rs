//! Instagram media normalization.

use crate::common::Platform;

use super::{parse_timestamp, CanonicalDraft, Normalized, NormalizeError, Normalizer};

pub struct InstagramNormalizer;

impl InstagramNormalizer {
    /// Media URLs for the post: the item itself, or every child of a
    /// carousel. Videos also archive their thumbnail.
    fn media_urls(payload: &serde_json::Value) -> Vec<String> {
        let mut urls = Vec::new();

        let mut push_item = |item: &serde_json::Value| {
            if let Some(url) = item["media_url"].as_str() {
                urls.push(url.to_string());
            }
            if let Some(url) = item["thumbnail_url"].as_str() {
                urls.push(url.to_string());
            }
        };

        match payload["children"]["data"].as_array() {
            Some(children) => children.iter().for_each(&mut push_item),
            None => push_item(payload),
        }

        urls
    }
}

impl Normalizer for InstagramNormalizer {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn normalize(&self, payload: &serde_json::Value) -> Result<Normalized, NormalizeError> {
        let content_kind = payload["media_type"]
            .as_str()
            .unwrap_or("post")
            .to_lowercase();
        let body_text = payload["caption"].as_str().unwrap_or_default().to_string();
        let native_created_at = parse_timestamp(payload, "timestamp")?;

        Ok(Normalized::Post(CanonicalDraft {
            content_kind,
            // Instagram posts have no separate title.
            title: None,
            body_text,
            native_created_at,
            native_updated_at: None,
            published: true,
            media_urls: Self::media_urls(payload),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_image_post() {
        let payload = json!({
            "id": "17900",
            "media_type": "IMAGE",
            "caption": "sunset",
            "timestamp": "2024-03-01T18:00:00+0000",
            "media_url": "https://cdn.ig.test/a.jpg",
        });

        let Normalized::Post(draft) = InstagramNormalizer.normalize(&payload).unwrap() else {
            panic!("expected post");
        };

        assert_eq!(draft.content_kind, "image");
        assert_eq!(draft.title, None);
        assert_eq!(draft.body_text, "sunset");
        assert_eq!(draft.media_urls, vec!["https://cdn.ig.test/a.jpg"]);
    }

    #[test]
    fn video_archives_thumbnail_too() {
        let payload = json!({
            "id": "17901",
            "media_type": "VIDEO",
            "timestamp": "2024-03-01T18:00:00+0000",
            "media_url": "https://cdn.ig.test/v.mp4",
            "thumbnail_url": "https://cdn.ig.test/v-thumb.jpg",
        });

        let Normalized::Post(draft) = InstagramNormalizer.normalize(&payload).unwrap() else {
            panic!("expected post");
        };

        assert_eq!(
            draft.media_urls,
            vec!["https://cdn.ig.test/v.mp4", "https://cdn.ig.test/v-thumb.jpg"]
        );
    }

    #[test]
    fn carousel_collects_all_children() {
        let payload = json!({
            "id": "17902",
            "media_type": "CAROUSEL_ALBUM",
            "timestamp": "2024-03-01T18:00:00+0000",
            "media_url": "https://cdn.ig.test/cover.jpg",
            "children": {"data": [
                {"media_url": "https://cdn.ig.test/1.jpg"},
                {"media_url": "https://cdn.ig.test/2.jpg"},
            ]},
        });

        let Normalized::Post(draft) = InstagramNormalizer.normalize(&payload).unwrap() else {
            panic!("expected post");
        };

        assert_eq!(draft.content_kind, "carousel_album");
        assert_eq!(
            draft.media_urls,
            vec!["https://cdn.ig.test/1.jpg", "https://cdn.ig.test/2.jpg"]
        );
    }

    #[test]
    fn missing_timestamp_is_malformed() {
        let payload = json!({"id": "17903", "media_type": "IMAGE"});
        assert!(InstagramNormalizer.normalize(&payload).is_err());
    }
}
