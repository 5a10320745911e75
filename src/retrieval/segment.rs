//! Crawl page segmentation.
//!
//! Crawled pages are stored whole. At read time each page is cut into
//! fixed-size word windows so it can be ranked alongside document chunks.

use crate::types::{ChunkOrigin, ContentChunk, CrawledPage};
use std::collections::HashMap;

/// Keywords kept per segment
const MAX_KEYWORDS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "is",
    "are", "was", "were", "this", "that", "you", "your", "our", "we", "it", "be", "as", "by",
    "from", "can", "will", "has", "have", "not",
];

/// Split a page into windows of `window_words` words.
pub fn segment_page(page: &CrawledPage, window_words: usize) -> Vec<ContentChunk> {
    let window_words = window_words.max(1);
    let words: Vec<&str> = page.content.split_whitespace().collect();

    words
        .chunks(window_words)
        .enumerate()
        .map(|(ordinal, window)| {
            let text = window.join(" ");
            ContentChunk {
                id: format!("{}:{}", page.id, ordinal),
                origin: ChunkOrigin::Crawl {
                    url: page.url.clone(),
                },
                ordinal: ordinal as u32,
                keywords: extract_keywords(&text, MAX_KEYWORDS),
                text,
                embedding: None,
            }
        })
        .collect()
}

/// Words that repeat in `text`, most frequent first.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for raw in text.split_whitespace() {
        let word = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if word.chars().count() > 2 && !STOP_WORDS.contains(&word.as_str()) {
            *freq.entry(word).or_default() += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = freq.into_iter().filter(|(_, n)| *n >= 2).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(word, _)| word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page(content: &str) -> CrawledPage {
        CrawledPage {
            id: "page1".to_string(),
            tenant_id: "acme".to_string(),
            url: "https://acme.test/about".to_string(),
            title: Some("About".to_string()),
            content: content.to_string(),
            crawled_at: Utc::now(),
        }
    }

    #[test]
    fn test_segments_by_word_count() {
        let content = (0..1200).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = segment_page(&page(&content), 500);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text.split_whitespace().count(), 500);
        assert_eq!(chunks[2].text.split_whitespace().count(), 200);
        assert_eq!(chunks[1].ordinal, 1);
        assert_eq!(chunks[1].id, "page1:1");
        assert!(chunks[2].text.starts_with("w1000"));
    }

    #[test]
    fn test_empty_page_has_no_segments() {
        assert!(segment_page(&page("   \n\t "), 500).is_empty());
    }

    #[test]
    fn test_segments_tagged_with_url() {
        let chunks = segment_page(&page("one two three"), 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].origin,
            ChunkOrigin::Crawl {
                url: "https://acme.test/about".to_string()
            }
        );
    }

    #[test]
    fn test_extract_keywords_frequency() {
        let keywords = extract_keywords(
            "Pricing, pricing and more PRICING. Delivery is fast; delivery is cheap. The the the.",
            10,
        );
        assert_eq!(keywords, vec!["pricing".to_string(), "delivery".to_string()]);
    }

    #[test]
    fn test_extract_keywords_limit() {
        let keywords = extract_keywords("alpha alpha beta beta gamma gamma", 2);
        assert_eq!(keywords, vec!["alpha".to_string(), "beta".to_string()]);
    }
}
