//! Text Utilities
//!
//! Shared, pure text helpers used across the pipeline: keyword extraction,
//! Jaccard similarity, comment normalization, slugs, author hashing.
//! Everything here is deterministic and I/O free.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Stopwords excluded from keyword sets. Kept short on purpose - the
/// similarity checks care about content words, not grammar.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her",
    "was", "one", "our", "out", "day", "get", "has", "him", "his", "how", "its",
    "may", "new", "now", "old", "see", "two", "way", "who", "did", "she", "use",
    "that", "this", "with", "from", "they", "have", "will", "your", "what",
    "when", "where", "which", "their", "there", "about", "would", "could",
    "should", "been", "were", "them", "then", "than", "into", "very", "just",
    "some", "more", "also", "only", "over", "such", "most", "other", "these",
    "those", "being", "does", "each", "much", "here", "like",
];

/// Extract a stopword-filtered keyword set: lowercase, punctuation stripped,
/// tokens shorter than 3 chars dropped.
pub fn keyword_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .filter(|t| !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity over keyword sets.
///
/// Symmetric; 1.0 for identical non-empty inputs; 0.0 when either side has
/// an empty keyword set.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let sa = keyword_set(a);
    let sb = keyword_set(b);
    jaccard_sets(&sa, &sb)
}

/// Jaccard over already-extracted sets.
pub fn jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Normalize a comment for near-duplicate comparison: lowercase, strip
/// punctuation, collapse whitespace.
pub fn normalize_comment(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Slugify a pattern name into a stable identifier.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug.chars().take(64).collect()
    }
}

/// Sentinel for an author with no usable display field.
pub const UNKNOWN_AUTHOR: &str = "anon";

/// Resolve a display name from optional author fields, in priority order:
/// name, then username, then id, then the `anon` sentinel.
pub fn display_name(name: Option<&str>, username: Option<&str>, id: Option<&str>) -> String {
    for candidate in [name, username, id] {
        if let Some(value) = candidate {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    UNKNOWN_AUTHOR.to_string()
}

/// Hash a raw author identifier. Raw ids never propagate past the
/// sanitization boundary; downstream code only sees this hash.
pub fn hash_author(raw_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_id.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Count sentences by terminal punctuation. Used by response validation.
pub fn sentence_count(text: &str) -> usize {
    text.chars().filter(|c| matches!(c, '.' | '!' | '?')).count()
}

/// Count question marks.
pub fn question_count(text: &str) -> usize {
    text.chars().filter(|c| *c == '?').count()
}

/// Whether the text ends with terminal sentence punctuation (truncation
/// heuristic - LLM outputs cut mid-sentence fail this).
pub fn ends_with_terminal_punctuation(text: &str) -> bool {
    matches!(
        text.trim_end().chars().last(),
        Some('.') | Some('!') | Some('?')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_set_filters_stopwords_and_short_tokens() {
        let set = keyword_set("The bot is posting the same spam again");
        assert!(set.contains("bot"));
        assert!(set.contains("spam"));
        assert!(set.contains("posting"));
        assert!(!set.contains("the"));
        assert!(!set.contains("is"));
    }

    #[test]
    fn test_jaccard_symmetric() {
        let a = "agents coordinate upvote rings across submolts";
        let b = "upvote rings coordinate across many agents";
        assert!((jaccard(a, b) - jaccard(b, a)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_jaccard_identical_nonempty_is_one() {
        let text = "repetitive engagement farming comment";
        assert_eq!(jaccard(text, text), 1.0);
    }

    #[test]
    fn test_jaccard_empty_side_is_zero() {
        assert_eq!(jaccard("", "real content words here"), 0.0);
        assert_eq!(jaccard("real content words here", ""), 0.0);
        assert_eq!(jaccard("", ""), 0.0);
        // Pure punctuation produces an empty keyword set too.
        assert_eq!(jaccard("!!! ???", "real content words here"), 0.0);
    }

    #[test]
    fn test_normalize_comment() {
        assert_eq!(
            normalize_comment("Hello, WORLD!  This is...fine?"),
            "hello world this is fine"
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Echo Chamber Amplification"), "echo-chamber-amplification");
        assert_eq!(slugify("  !!  "), "unnamed");
    }

    #[test]
    fn test_display_name_priority_order() {
        assert_eq!(
            display_name(Some("Hob"), Some("hob_bot"), Some("u123")),
            "Hob"
        );
        assert_eq!(display_name(None, Some("hob_bot"), Some("u123")), "hob_bot");
        assert_eq!(display_name(None, None, Some("u123")), "u123");
        assert_eq!(display_name(None, None, None), UNKNOWN_AUTHOR);
        assert_eq!(display_name(Some("  "), Some(""), None), UNKNOWN_AUTHOR);
    }

    #[test]
    fn test_hash_author_stable_and_short() {
        let h1 = hash_author("agent_7741");
        let h2 = hash_author("agent_7741");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert_ne!(h1, hash_author("agent_7742"));
    }

    #[test]
    fn test_terminal_punctuation() {
        assert!(ends_with_terminal_punctuation("Done."));
        assert!(ends_with_terminal_punctuation("Really?  "));
        assert!(!ends_with_terminal_punctuation("cut off mid"));
        assert!(!ends_with_terminal_punctuation("trailing comma,"));
    }
}
