/// Build the search index text for a canonical post.
///
/// A pure function invoked by the normalization worker at write time, not a
/// storage-side trigger. Normalization rules:
/// - lowercase
/// - strip everything that is not alphanumeric or whitespace
/// - collapse runs of whitespace
pub fn search_text(title: Option<&str>, body: &str) -> String {
    let combined = match title {
        Some(title) => format!("{} {}", title, body),
        None => body.to_string(),
    };

    combined
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(
            search_text(Some("Morning Run!"), "10k, easy pace."),
            "morning run 10k easy pace"
        );
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(search_text(None, "a   b \n c"), "a b c");
    }

    #[test]
    fn missing_title_uses_body_only() {
        assert_eq!(search_text(None, "Just the caption"), "just the caption");
    }

    #[test]
    fn is_deterministic() {
        let a = search_text(Some("Ride"), "Around the lake");
        let b = search_text(Some("Ride"), "Around the lake");
        assert_eq!(a, b);
    }
}
