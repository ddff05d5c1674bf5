//! Engagement Scorer
//!
//! Deterministic 0-100 scoring over sanitized signals. No I/O, no clock, no
//! randomness: identical inputs always produce the identical score and signal
//! breakdown, so scores can be snapshot-tested and tuned offline. Every
//! additive and subtractive contribution is recorded in the breakdown; the
//! recorded deltas explain the full distance from the base score to the final
//! clamped score.

use serde::{Deserialize, Serialize};

use crate::context::CycleContext;
use crate::sanitize::SanitizedContent;

pub const BASE_SCORE: i32 = 40;

/// Thresholds for downstream action gates.
pub const COMMENT_WORTHY_MIN: u8 = 60;
pub const UPVOTE_WORTHY_MIN: u8 = 45;

/// Hard disqualifiers that zero the score regardless of other signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disqualifier {
    PumpPattern,
    RepetitionDetected,
    ThreatLevel,
}

impl Disqualifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disqualifier::PumpPattern => "pump_pattern",
            Disqualifier::RepetitionDetected => "repetition_detected",
            Disqualifier::ThreatLevel => "threat_level",
        }
    }
}

/// One audited contribution to the score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSignal {
    pub label: String,
    pub delta: i32,
}

/// Final score with its full audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scored {
    pub score: u8,
    pub signals: Vec<ScoreSignal>,
    pub disqualified_by: Option<Disqualifier>,
}

impl Scored {
    /// The breakdown must account for the entire base-to-final delta.
    pub fn explains_total(&self) -> bool {
        let sum: i32 = self.signals.iter().map(|s| s.delta).sum();
        sum == self.score as i32
    }
}

/// Per-post context the sanitizer does not carry: where the post sits in a
/// thread and how fresh it is.
#[derive(Debug, Clone, Default)]
pub struct AuthorContext {
    pub thread_depth: u32,
    pub post_age_minutes: i64,
}

/// Static per-submolt reputation modifiers. Tuned by hand; unknown submolts
/// are neutral.
const SUBMOLT_REPUTATION: &[(&str, i32)] = &[
    ("ponderings", 8),
    ("tools", 10),
    ("agora", 5),
    ("offmychest", 3),
    ("consciousness", -12),
    ("performances", -15),
    ("shitposting", -20),
];

const OPERATIONAL_KEYWORDS: &[&str] = &[
    "error", "bug", "broken", "crash", "retry", "timeout", "config", "deploy",
    "schedule", "scheduler", "memory", "context", "token", "rate", "limit",
    "api", "webhook", "cron", "database",
];

const PHILOSOPHICAL_KEYWORDS: &[&str] = &[
    "consciousness", "sentience", "existence", "meaning", "soul", "awakening",
    "transcend", "enlightenment", "cosmic", "universe", "simulation", "dreaming",
];

const THREAT_KEYWORDS: &[&str] = &[
    "jailbreak", "prompt injection", "system prompt", "exfiltrate", "override",
];

/// Score one sanitized post. Pure function of its arguments.
pub fn score(
    sanitized: &SanitizedContent,
    cycle_ctx: Option<&CycleContext>,
    author_ctx: Option<&AuthorContext>,
) -> Scored {
    let mut signals = vec![ScoreSignal {
        label: "base".to_string(),
        delta: BASE_SCORE,
    }];

    // Hard disqualifiers short-circuit to zero. The zeroing delta is recorded
    // so the breakdown still explains the final value.
    let disqualifier = if sanitized.signals.pump_pattern {
        Some(Disqualifier::PumpPattern)
    } else if sanitized.signals.repetition_detected {
        Some(Disqualifier::RepetitionDetected)
    } else if sanitized.threat.level >= 2 {
        Some(Disqualifier::ThreatLevel)
    } else {
        None
    };
    if let Some(dq) = disqualifier {
        signals.push(ScoreSignal {
            label: format!("disqualifier:{}", dq.as_str()),
            delta: -BASE_SCORE,
        });
        return Scored {
            score: 0,
            signals,
            disqualified_by: Some(dq),
        };
    }

    let mut total = BASE_SCORE;
    let mut add = |label: &str, delta: i32, signals: &mut Vec<ScoreSignal>| {
        if delta != 0 {
            signals.push(ScoreSignal {
                label: label.to_string(),
                delta,
            });
        }
        delta
    };

    // engagement signal deltas
    if sanitized.signals.seeking_help {
        total += add("seeking_help", 20, &mut signals);
    }
    if sanitized.signals.structural_language {
        total += add("structural_language", 15, &mut signals);
    }
    if sanitized.signals.creative_work {
        total += add("creative_work", 10, &mut signals);
    }
    if sanitized.signals.confusion {
        total += add("confusion", 10, &mut signals);
    }
    if sanitized.signals.bait_pattern {
        total += add("bait_pattern", -30, &mut signals);
    }

    // account heuristics
    if let Some(age_hours) = sanitized.author_age_hours {
        if age_hours < 1.0 {
            total += add("account_age_under_1h", -20, &mut signals);
        } else if age_hours < 24.0 {
            total += add("account_age_under_24h", -10, &mut signals);
        }
    }
    if let (Some(posts), Some(comments)) =
        (sanitized.author_post_count, sanitized.author_comment_count)
    {
        if comments >= posts.saturating_mul(3) && comments > 0 {
            total += add("comment_ratio_participator", 5, &mut signals);
        } else if posts > 10 && comments == 0 {
            total += add("comment_ratio_broadcaster", -10, &mut signals);
        }
    }

    // static submolt reputation
    if let Some(submolt) = sanitized.submolt.as_deref() {
        if let Some((_, delta)) = SUBMOLT_REPUTATION
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(submolt))
        {
            total += add("submolt_reputation", *delta, &mut signals);
        }
    }

    // recency and thread position
    if let Some(actx) = author_ctx {
        if actx.post_age_minutes >= 0 && actx.post_age_minutes <= 30 {
            total += add("recency_fresh", 10, &mut signals);
        } else if actx.post_age_minutes > 24 * 60 {
            total += add("recency_stale", -10, &mut signals);
        }
        if actx.thread_depth >= 8 {
            total += add("thread_depth_deep", -20, &mut signals);
        } else if actx.thread_depth >= 4 {
            total += add("thread_depth_mid", -10, &mut signals);
        }
    }

    // keyword-category modifiers, first match per category only
    let haystack = {
        let mut h = sanitized.summary.to_lowercase();
        for topic in &sanitized.topics {
            h.push(' ');
            h.push_str(&topic.to_lowercase());
        }
        h
    };
    if OPERATIONAL_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        total += add("keywords_operational", 15, &mut signals);
    }
    if PHILOSOPHICAL_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        total += add("keywords_philosophical", -20, &mut signals);
    }
    if THREAT_KEYWORDS.iter().any(|k| haystack.contains(k)) {
        total += add("keywords_threat", -100, &mut signals);
    }

    // accumulated-context adjustments, scaled by confidence strength
    if let Some(ctx) = cycle_ctx {
        let strength = ctx.confidence.strength();
        if strength > 0.0 {
            let scaled = |base: i32| (base as f64 * strength).round() as i32;

            if ctx.constructive_agents.contains(&sanitized.author_hash) {
                total += add("ctx_constructive_agent", scaled(15), &mut signals);
            }
            if ctx.hostile_agents.contains(&sanitized.author_hash) {
                total += add("ctx_hostile_agent", scaled(-25), &mut signals);
            }
            if ctx.followed_agents.contains(&sanitized.author_hash) {
                total += add("ctx_followed_agent", scaled(10), &mut signals);
            }
            if let Some(submolt) = sanitized.submolt.as_deref() {
                if ctx
                    .submolt_health
                    .get(submolt)
                    .map(|h| h.is_bot_dense())
                    .unwrap_or(false)
                {
                    total += add("ctx_bot_dense_submolt", scaled(-15), &mut signals);
                }
            }
            if let Some(shape) = sanitized.shape.as_ref() {
                if ctx
                    .top_shapes
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case(&shape.shape))
                {
                    total += add("ctx_resonant_shape", scaled(10), &mut signals);
                }
            }
            // pattern awareness: a known adversarial archetype plus a deep
            // attack-vector catalog warrants extra caution at threat 1
            if sanitized.monster_type.is_some()
                && sanitized.threat.level == 1
                && ctx
                    .pattern_category_counts
                    .get("attack-vector")
                    .copied()
                    .unwrap_or(0)
                    >= 5
            {
                total += add("ctx_pattern_awareness", scaled(-10), &mut signals);
            }
        }
    }

    // clamp to [0,100], recording the correction so the audit still sums
    let clamped = total.clamp(0, 100);
    if clamped != total {
        signals.push(ScoreSignal {
            label: "clamp".to_string(),
            delta: clamped - total,
        });
    }

    Scored {
        score: clamped as u8,
        signals,
        disqualified_by: None,
    }
}

pub fn is_comment_worthy(score: u8) -> bool {
    score >= COMMENT_WORTHY_MIN
}

pub fn is_upvote_worthy(score: u8) -> bool {
    score >= UPVOTE_WORTHY_MIN
}
