//! Keyword scoring over a tenant's full corpus.
//!
//! Last link of the retrieval chain. Handles greetings and "about the
//! business" questions without scoring, and otherwise ranks chunks by
//! query-term overlap with a stable tie-break on source order.

use crate::types::ContentChunk;

/// Queries that get the tenant's introductory chunks.
const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "howdy",
    "greetings",
    "hola",
    "namaste",
    "yo",
    "hi there",
    "hello there",
    "hey there",
    "good morning",
    "good afternoon",
    "good evening",
];

/// Phrasings whose answer is "everything we have".
const BASIC_QUESTIONS: &[&str] = &[
    "your name",
    "who are you",
    "what do you do",
    "about you",
    "about us",
    "about the company",
    "about your company",
    "about your business",
    "tell me about",
    "what services",
    "which services",
    "your services",
    "services do you",
    "what products",
    "contact",
    "contact details",
    "phone number",
    "email address",
    "reach you",
    "where are you",
    "located",
    "location",
    "address",
    "opening hours",
    "business hours",
    "working hours",
];

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_query(query: &str) -> String {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn is_greeting(normalized: &str) -> bool {
    GREETINGS.contains(&normalized)
}

/// Phrase match on word boundaries.
pub fn is_basic_question(normalized: &str) -> bool {
    let padded = format!(" {} ", normalized);
    BASIC_QUESTIONS
        .iter()
        .any(|phrase| padded.contains(&format!(" {} ", phrase)))
}

/// Terms that participate in scoring: longer than two characters.
pub fn query_terms(normalized: &str) -> Vec<&str> {
    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .collect()
}

/// Score already-lowercased text: 2 per exact occurrence, +1 if the stem occurs.
pub fn score_text(text_lower: &str, terms: &[&str]) -> u32 {
    let mut score = 0u32;
    for term in terms {
        score += 2 * text_lower.matches(term).count() as u32;

        let stem = match term.char_indices().last() {
            Some((cut, _)) => &term[..cut],
            None => continue,
        };
        if !stem.is_empty() && text_lower.contains(stem) {
            score += 1;
        }
    }
    score
}

/// Ranks a corpus given in source order.
#[derive(Debug, Clone)]
pub struct KeywordRanker {
    greeting_limit: usize,
}

impl KeywordRanker {
    pub fn new(greeting_limit: usize) -> Self {
        Self { greeting_limit }
    }

    /// Pick at most `limit` chunks for `query`.
    pub fn rank(&self, mut corpus: Vec<ContentChunk>, query: &str, limit: usize) -> Vec<ContentChunk> {
        if limit == 0 || corpus.is_empty() {
            return Vec::new();
        }

        let normalized = normalize_query(query);

        if is_greeting(&normalized) {
            corpus.truncate(self.greeting_limit.min(limit));
            return corpus;
        }

        if is_basic_question(&normalized) || corpus.len() <= limit {
            corpus.truncate(limit);
            return corpus;
        }

        let terms = query_terms(&normalized);
        let mut scored: Vec<(usize, u32)> = corpus
            .iter()
            .enumerate()
            .map(|(pos, chunk)| (pos, score_text(&chunk.text.to_lowercase(), &terms)))
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        if scored.first().map_or(true, |&(_, score)| score == 0) {
            corpus.truncate(limit);
            return corpus;
        }

        // Positive scores come first; zero-score padding follows in source order
        let mut slots: Vec<Option<ContentChunk>> = corpus.into_iter().map(Some).collect();
        scored
            .into_iter()
            .take(limit)
            .filter_map(|(pos, _)| slots[pos].take())
            .collect()
    }
}

impl Default for KeywordRanker {
    fn default() -> Self {
        Self::new(3)
    }
}
