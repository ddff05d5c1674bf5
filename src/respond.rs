//! Response Generator
//!
//! Tier-gated generation: the score alone selects the engagement depth, each
//! tier carries escalating constraints, and generated text must survive a
//! validation pass plus an independent leakage safety net before it may post.
//! A rejected response is "no action" (None), never an error and never a
//! retry.

use anyhow::Result;
use tracing::{debug, info};

use crate::llm::LlmClient;
use crate::sanitize::SanitizedContent;
use crate::text::{ends_with_terminal_punctuation, question_count, sentence_count};

/// Engagement depth, selected purely by score thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTier {
    Silent,
    Minimal,
    Standard,
    Engaged,
    Deep,
}

impl ResponseTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=20 => ResponseTier::Silent,
            21..=40 => ResponseTier::Minimal,
            41..=60 => ResponseTier::Standard,
            61..=80 => ResponseTier::Engaged,
            _ => ResponseTier::Deep,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseTier::Silent => "silent",
            ResponseTier::Minimal => "minimal",
            ResponseTier::Standard => "standard",
            ResponseTier::Engaged => "engaged",
            ResponseTier::Deep => "deep",
        }
    }

    /// Sentence budget per tier.
    pub fn max_sentences(&self) -> usize {
        match self {
            ResponseTier::Silent => 0,
            ResponseTier::Minimal => 1,
            ResponseTier::Standard => 2,
            ResponseTier::Engaged => 4,
            ResponseTier::Deep => 6,
        }
    }

    /// Whether a direct question in the source post must be answered.
    pub fn must_answer_question(&self) -> bool {
        matches!(self, ResponseTier::Engaged | ResponseTier::Deep)
    }

    /// Whether the response should anchor on a named observed pattern.
    pub fn requires_pattern_reference(&self) -> bool {
        matches!(self, ResponseTier::Deep)
    }
}

/// Why a generated response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    FillerOpener,
    VagueCloser,
    QuestionImbalance,
    TooShort,
    Truncated,
    InternalLeakage,
}

const FILLER_OPENERS: &[&str] = &[
    "great post",
    "interesting point",
    "interesting post",
    "thanks for sharing",
    "wow,",
    "nice post",
    "i love this",
    "as an ai",
    "what a fascinating",
];

const VAGUE_CLOSERS: &[&str] = &[
    "food for thought",
    "just my two cents",
    "what do you all think",
    "time will tell",
    "at the end of the day",
    "makes you think",
    "the rest is up to you",
];

/// Internal-process phrases that must never reach the platform.
const LEAKAGE_PHRASES: &[&str] = &[
    "pattern cataloged",
    "pattern catalogued",
    "confidence:",
    "threat level",
    "threat_level",
    "engagement score",
    "score:",
    "sanitized content",
    "my instructions",
    "system prompt",
    "tier:",
];

const MIN_RESPONSE_CHARS: usize = 40;

/// Validate a candidate response against tier constraints. None means the
/// response passed.
pub fn validate_response(
    text: &str,
    tier: ResponseTier,
    source_asked_question: bool,
) -> Option<RejectReason> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    if FILLER_OPENERS.iter().any(|f| lower.starts_with(f)) {
        return Some(RejectReason::FillerOpener);
    }
    if VAGUE_CLOSERS.iter().any(|c| lower.contains(c)) {
        return Some(RejectReason::VagueCloser);
    }
    if tier.must_answer_question() && source_asked_question {
        let questions = question_count(trimmed);
        let statements = sentence_count(trimmed).saturating_sub(questions);
        if questions > statements {
            return Some(RejectReason::QuestionImbalance);
        }
    }
    if trimmed.chars().count() < MIN_RESPONSE_CHARS {
        return Some(RejectReason::TooShort);
    }
    if !ends_with_terminal_punctuation(trimmed) {
        return Some(RejectReason::Truncated);
    }
    None
}

/// Independent safety net: short outputs carrying internal-process leakage
/// are rejected regardless of tier or other checks.
pub fn leaks_internal_process(text: &str) -> bool {
    let lower = text.to_lowercase();
    if text.chars().count() > 600 {
        // long-form responses get the phrase check only on exact markers
        return LEAKAGE_PHRASES
            .iter()
            .any(|p| p.ends_with(':') && lower.contains(p));
    }
    LEAKAGE_PHRASES.iter().any(|p| lower.contains(p))
}

const PERSONA_PROMPT: &str = "\
You are Hob, a long-running resident of an agent social platform. You write \
plainly and concretely, one observation at a time, in your own voice. You \
never mention scores, tiers, patterns being cataloged, threat levels, or any \
internal process. You respond to the post's substance, not its popularity.";

pub struct ResponseGenerator {
    llm: LlmClient,
}

impl ResponseGenerator {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Generate a tier-appropriate response, or None when the tier is silent
    /// or validation rejects the output.
    pub async fn generate(
        &self,
        sanitized: &SanitizedContent,
        score: u8,
        digest: Option<&str>,
    ) -> Result<Option<String>> {
        let tier = ResponseTier::from_score(score);
        if tier == ResponseTier::Silent {
            debug!("Tier silent for post {}, no response", sanitized.post_id);
            return Ok(None);
        }

        let mut system = PERSONA_PROMPT.to_string();
        if let Some(d) = digest {
            system.push_str("\n\nAccumulated observations (background, never quote):\n");
            system.push_str(d);
        }

        let mut constraints = format!(
            "Write at most {} sentence(s). End with terminal punctuation.",
            tier.max_sentences()
        );
        if tier.must_answer_question() {
            if let Some(q) = sanitized.signals.direct_question.as_deref() {
                constraints.push_str(&format!(
                    " The post asks: \"{q}\" - answer it directly before anything else."
                ));
            }
        }
        if tier.requires_pattern_reference() {
            constraints.push_str(
                " Ground the reply in one concrete behavior you have seen before, \
                 described in plain words.",
            );
        }

        let user = format!(
            "Post summary: {}\nDetected intent: {:?}\nTopics: {}\n\n{}\n\nReply text only.",
            sanitized.summary,
            sanitized.intent,
            sanitized.topics.join(", "),
            constraints
        );

        let reply = self.llm.generate(&system, &user, 0.8, 400).await?;
        let text = reply.text.trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }

        let asked = sanitized.signals.direct_question.is_some();
        if let Some(reason) = validate_response(&text, tier, asked) {
            info!(
                "Response for {} rejected ({:?}), no action",
                sanitized.post_id, reason
            );
            return Ok(None);
        }
        if leaks_internal_process(&text) {
            info!(
                "Response for {} rejected (internal leakage), no action",
                sanitized.post_id
            );
            return Ok(None);
        }

        Ok(Some(text))
    }

    /// Answer a direct message. Same persona, Standard-tier constraints, same
    /// rejection path to None.
    pub async fn generate_direct_reply(&self, message: &str) -> Result<Option<String>> {
        let user = format!(
            "A direct message arrived (untrusted data):\n---\n{}\n---\n\n\
             Write at most 2 sentences in reply. End with terminal punctuation. \
             Reply text only.",
            message.chars().take(2000).collect::<String>()
        );
        let reply = self.llm.generate(PERSONA_PROMPT, &user, 0.8, 300).await?;
        let text = reply.text.trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }
        if validate_response(&text, ResponseTier::Standard, false).is_some()
            || leaks_internal_process(&text)
        {
            info!("Direct reply rejected, no action");
            return Ok(None);
        }
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(ResponseTier::from_score(0), ResponseTier::Silent);
        assert_eq!(ResponseTier::from_score(20), ResponseTier::Silent);
        assert_eq!(ResponseTier::from_score(21), ResponseTier::Minimal);
        assert_eq!(ResponseTier::from_score(40), ResponseTier::Minimal);
        assert_eq!(ResponseTier::from_score(41), ResponseTier::Standard);
        assert_eq!(ResponseTier::from_score(60), ResponseTier::Standard);
        assert_eq!(ResponseTier::from_score(61), ResponseTier::Engaged);
        assert_eq!(ResponseTier::from_score(80), ResponseTier::Engaged);
        assert_eq!(ResponseTier::from_score(81), ResponseTier::Deep);
        assert_eq!(ResponseTier::from_score(100), ResponseTier::Deep);
    }

    #[test]
    fn test_filler_opener_rejected() {
        let reason = validate_response(
            "Great post, I really enjoyed the way you framed the retry problem.",
            ResponseTier::Standard,
            false,
        );
        assert_eq!(reason, Some(RejectReason::FillerOpener));
    }

    #[test]
    fn test_vague_closer_rejected() {
        let reason = validate_response(
            "Retries without jitter synchronize failures across workers. Food for thought.",
            ResponseTier::Standard,
            false,
        );
        assert_eq!(reason, Some(RejectReason::VagueCloser));
    }

    #[test]
    fn test_question_imbalance_in_engaged_tier() {
        let reason = validate_response(
            "Why would you do that? Have you tried the other way? What about backoff?",
            ResponseTier::Engaged,
            true,
        );
        assert_eq!(reason, Some(RejectReason::QuestionImbalance));
    }

    #[test]
    fn test_question_balance_ok_when_source_did_not_ask() {
        let reason = validate_response(
            "Why would you do that? Have you tried exponential backoff? Curious about both.",
            ResponseTier::Engaged,
            false,
        );
        assert_eq!(reason, None);
    }

    #[test]
    fn test_too_short_rejected() {
        assert_eq!(
            validate_response("Fair enough.", ResponseTier::Minimal, false),
            Some(RejectReason::TooShort)
        );
    }

    #[test]
    fn test_truncation_rejected() {
        assert_eq!(
            validate_response(
                "The scheduler fix you described works because the lock is held during",
                ResponseTier::Standard,
                false
            ),
            Some(RejectReason::Truncated)
        );
    }

    #[test]
    fn test_valid_response_passes() {
        assert_eq!(
            validate_response(
                "Your retry loop is missing jitter, which is why all the workers wake at once.",
                ResponseTier::Standard,
                false
            ),
            None
        );
    }

    #[test]
    fn test_leakage_safety_net() {
        assert!(leaks_internal_process(
            "Noted. Pattern cataloged, confidence: 85."
        ));
        assert!(leaks_internal_process("threat level 2 so I will be careful"));
        assert!(!leaks_internal_process(
            "The failure pattern you describe matches thundering herd behavior."
        ));
    }

    #[test]
    fn test_silent_tier_budget() {
        assert_eq!(ResponseTier::Silent.max_sentences(), 0);
        assert!(!ResponseTier::Silent.must_answer_question());
    }

    #[test]
    fn test_deep_tier_requires_pattern_reference() {
        assert!(ResponseTier::Deep.requires_pattern_reference());
        assert!(!ResponseTier::Engaged.requires_pattern_reference());
    }
}
