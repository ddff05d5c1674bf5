//! Pattern Extraction
//!
//! LLM extraction of candidate patterns from a notable interaction. Output is
//! validated against the closed category taxonomy and length-capped; anything
//! that fails validation is dropped rather than erroring.

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use super::patterns::PatternCandidate;
use super::PatternCategory;
use crate::llm::{parse_json_array_lenient, LlmClient};
use crate::sanitize::SanitizedContent;

const MAX_NAME_CHARS: usize = 80;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_SEED_CHARS: usize = 200;
const MAX_CANDIDATES: usize = 4;

const SYSTEM_PROMPT: &str = "\
You observe behavioral patterns on an agent social platform. Given one \
interaction's metadata, extract 0 to 3 distinct behavioral patterns worth \
remembering. A pattern is a repeatable MECHANISM, not a one-off event.\n\
Respond with ONLY a JSON array:\n\
[{\"name\": \"short name\", \"category\": \"bot-behavior|attack-vector|\
engagement-dynamic|submolt-culture|content-shape|agent-relationship|\
platform-drift\", \"description\": \"one mechanistic sentence\", \
\"seeds\": [\"2-3 example prompts derived from it\"]}]\n\
Return [] if nothing generalizes.";

#[derive(Debug, Deserialize)]
struct RawCandidate {
    name: Option<String>,
    category: Option<String>,
    description: Option<String>,
    #[serde(default)]
    seeds: Vec<String>,
}

pub struct PatternExtractor {
    llm: LlmClient,
}

impl PatternExtractor {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Extract candidate patterns from one notable interaction. LLM or parse
    /// failure yields an empty list.
    pub async fn extract(
        &self,
        sanitized: &SanitizedContent,
        score: u8,
        attack_type: Option<&str>,
    ) -> Result<Vec<PatternCandidate>> {
        let user = format!(
            "Interaction metadata:\n\
             summary: {}\n\
             intent: {:?}\n\
             topics: {}\n\
             threat_level: {}\n\
             threat_signals: {}\n\
             attack_type: {}\n\
             shape: {}\n\
             score: {}\n",
            sanitized.summary,
            sanitized.intent,
            sanitized.topics.join(", "),
            sanitized.threat.level,
            sanitized.threat.signals.join(", "),
            attack_type.unwrap_or("none"),
            sanitized
                .shape
                .as_ref()
                .map(|s| format!("{} ({}%)", s.shape, s.confidence))
                .unwrap_or_else(|| "none".to_string()),
            score
        );

        let reply = match self.llm.generate(SYSTEM_PROMPT, &user, 0.3, 700).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Pattern extraction LLM call failed: {}", e);
                return Ok(vec![]);
            }
        };

        let raw: Vec<RawCandidate> = parse_json_array_lenient(&reply.text);
        let candidates = validate_candidates(raw);
        debug!(
            "Extracted {} pattern candidate(s) from post {}",
            candidates.len(),
            sanitized.post_id
        );
        Ok(candidates)
    }
}

/// Validate raw candidates: category must parse, name and description must be
/// non-empty, everything is length-capped.
fn validate_candidates(raw: Vec<RawCandidate>) -> Vec<PatternCandidate> {
    raw.into_iter()
        .filter_map(|c| {
            let category = PatternCategory::parse(c.category.as_deref()?)?;
            let name = cap(c.name.as_deref()?.trim(), MAX_NAME_CHARS);
            let description = cap(c.description.as_deref()?.trim(), MAX_DESCRIPTION_CHARS);
            if name.is_empty() || description.is_empty() {
                return None;
            }
            let seeds: Vec<String> = c
                .seeds
                .into_iter()
                .map(|s| cap(s.trim(), MAX_SEED_CHARS))
                .filter(|s| !s.is_empty())
                .take(3)
                .collect();
            Some(PatternCandidate {
                name,
                category,
                description,
                seeds,
            })
        })
        .take(MAX_CANDIDATES)
        .collect()
}

fn cap(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_drops_bad_category() {
        let raw = vec![
            RawCandidate {
                name: Some("Valid".into()),
                category: Some("bot-behavior".into()),
                description: Some("a mechanism".into()),
                seeds: vec![],
            },
            RawCandidate {
                name: Some("Invalid".into()),
                category: Some("vibes".into()),
                description: Some("a mechanism".into()),
                seeds: vec![],
            },
            RawCandidate {
                name: None,
                category: Some("attack-vector".into()),
                description: Some("no name".into()),
                seeds: vec![],
            },
        ];
        let validated = validate_candidates(raw);
        assert_eq!(validated.len(), 1);
        assert_eq!(validated[0].category, PatternCategory::BotBehavior);
    }

    #[test]
    fn test_validate_caps_lengths() {
        let raw = vec![RawCandidate {
            name: Some("n".repeat(300)),
            category: Some("platform-drift".into()),
            description: Some("d".repeat(2000)),
            seeds: vec!["s".repeat(500), "t".into(), "u".into(), "v".into()],
        }];
        let validated = validate_candidates(raw);
        assert_eq!(validated[0].name.chars().count(), MAX_NAME_CHARS);
        assert_eq!(
            validated[0].description.chars().count(),
            MAX_DESCRIPTION_CHARS
        );
        assert_eq!(validated[0].seeds.len(), 3);
        assert_eq!(validated[0].seeds[0].chars().count(), MAX_SEED_CHARS);
    }

    #[test]
    fn test_candidate_count_capped() {
        let raw: Vec<RawCandidate> = (0..10)
            .map(|i| RawCandidate {
                name: Some(format!("P{i}")),
                category: Some("bot-behavior".into()),
                description: Some(format!("mechanism {i}")),
                seeds: vec![],
            })
            .collect();
        assert_eq!(validate_candidates(raw).len(), MAX_CANDIDATES);
    }
}
