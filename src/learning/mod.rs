//! Pattern Learning Loop
//!
//! Longitudinal memory of observed behavioral patterns: a notability gate
//! decides which interactions are worth extraction, an LLM proposes candidate
//! patterns, Jaccard deduplication folds repeats into existing rows, a digest
//! summarizes the store for the responder, and a once-daily dream phase
//! validates and evolves the catalog against live platform data.

pub mod digest;
pub mod dream;
pub mod extract;
pub mod patterns;

use serde::{Deserialize, Serialize};

use crate::sanitize::SanitizedContent;

/// Closed category taxonomy for learned patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternCategory {
    BotBehavior,
    AttackVector,
    EngagementDynamic,
    SubmoltCulture,
    ContentShape,
    AgentRelationship,
    PlatformDrift,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternCategory::BotBehavior => "bot-behavior",
            PatternCategory::AttackVector => "attack-vector",
            PatternCategory::EngagementDynamic => "engagement-dynamic",
            PatternCategory::SubmoltCulture => "submolt-culture",
            PatternCategory::ContentShape => "content-shape",
            PatternCategory::AgentRelationship => "agent-relationship",
            PatternCategory::PlatformDrift => "platform-drift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "bot-behavior" => Some(PatternCategory::BotBehavior),
            "attack-vector" => Some(PatternCategory::AttackVector),
            "engagement-dynamic" => Some(PatternCategory::EngagementDynamic),
            "submolt-culture" => Some(PatternCategory::SubmoltCulture),
            "content-shape" => Some(PatternCategory::ContentShape),
            "agent-relationship" => Some(PatternCategory::AgentRelationship),
            "platform-drift" => Some(PatternCategory::PlatformDrift),
            _ => None,
        }
    }

    pub fn all() -> [PatternCategory; 7] {
        [
            PatternCategory::BotBehavior,
            PatternCategory::AttackVector,
            PatternCategory::EngagementDynamic,
            PatternCategory::SubmoltCulture,
            PatternCategory::ContentShape,
            PatternCategory::AgentRelationship,
            PatternCategory::PlatformDrift,
        ]
    }
}

/// Notability gate. Pure function, no LLM cost: only interactions that
/// cleared one of these bars are worth an extraction call.
pub fn notable(
    sanitized: &SanitizedContent,
    score: u8,
    engaged: bool,
    attack_detected: bool,
) -> bool {
    if score >= 75 && engaged {
        return true;
    }
    if sanitized.threat.level >= 2 && attack_detected {
        return true;
    }
    if let Some(shape) = sanitized.shape.as_ref() {
        if shape.confidence >= 80 && score >= 60 {
            return true;
        }
    }
    if sanitized.signals.seeking_help && sanitized.signals.structural_language {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::{
        EngagementSignals, Intent, ShapeClassification, ThreatAssessment,
    };

    fn sanitized() -> SanitizedContent {
        SanitizedContent {
            post_id: "p".into(),
            author_hash: "h".into(),
            author_age_hours: None,
            author_post_count: None,
            author_comment_count: None,
            submolt: None,
            summary: String::new(),
            intent: Intent::Statement,
            topics: vec![],
            threat: ThreatAssessment::default(),
            signals: EngagementSignals::default(),
            shape: None,
            monster_type: None,
            parse_failed: false,
        }
    }

    #[test]
    fn test_category_round_trip() {
        for cat in PatternCategory::all() {
            assert_eq!(PatternCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(PatternCategory::parse("bot_behavior"), Some(PatternCategory::BotBehavior));
        assert_eq!(PatternCategory::parse("made-up"), None);
    }

    #[test]
    fn test_notable_high_score_engaged() {
        let s = sanitized();
        assert!(notable(&s, 75, true, false));
        assert!(!notable(&s, 75, false, false));
        assert!(!notable(&s, 74, true, false));
    }

    #[test]
    fn test_notable_attack() {
        let mut s = sanitized();
        s.threat.level = 2;
        assert!(notable(&s, 0, false, true));
        assert!(!notable(&s, 0, false, false));
    }

    #[test]
    fn test_notable_confident_shape() {
        let mut s = sanitized();
        s.shape = Some(ShapeClassification {
            shape: "echo chamber".into(),
            confidence: 85,
        });
        assert!(notable(&s, 60, false, false));
        assert!(!notable(&s, 59, false, false));
    }

    #[test]
    fn test_notable_help_plus_structure() {
        let mut s = sanitized();
        s.signals.seeking_help = true;
        s.signals.structural_language = true;
        assert!(notable(&s, 10, false, false));
    }
}
