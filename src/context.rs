//! Cycle Context Loader
//!
//! Aggregates longitudinal intelligence once per run: agent reputations,
//! submolt health, resonant shapes, peak attack hours, discovery-source
//! effectiveness, and pattern-category counts. The snapshot is read-only,
//! never persisted, and recomputed fresh every cycle - runs are independent
//! invocations with no process continuity.

use anyhow::Result;
use chrono::Utc;
use rusqlite::params;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::seen::SeenStore;
use crate::store::Db;

/// Confidence tier derived from total observation volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextConfidence {
    Low,
    Medium,
    High,
}

impl ContextConfidence {
    /// Scale factor for context-driven score adjustments. Low-confidence
    /// context contributes nothing.
    pub fn strength(&self) -> f64 {
        match self {
            ContextConfidence::Low => 0.0,
            ContextConfidence::Medium => 0.5,
            ContextConfidence::High => 1.0,
        }
    }
}

/// Health aggregates for one submolt.
#[derive(Debug, Clone, Default)]
pub struct SubmoltHealth {
    pub outcomes: i64,
    pub hostile_ratio: f64,
    pub avg_sentiment: f64,
    pub attack_share: f64,
}

impl SubmoltHealth {
    /// A submolt where a large share of recent sightings were attacks is
    /// treated as bot-dense.
    pub fn is_bot_dense(&self) -> bool {
        self.attack_share >= 0.4
    }
}

/// Read-only longitudinal snapshot consumed by the scorer and responder.
#[derive(Debug, Clone, Default)]
pub struct CycleContext {
    pub constructive_agents: HashSet<String>,
    pub hostile_agents: HashSet<String>,
    pub followed_agents: HashSet<String>,
    pub submolt_health: HashMap<String, SubmoltHealth>,
    pub top_shapes: Vec<(String, f64)>,
    pub peak_attack_hours: Vec<u32>,
    pub source_effectiveness: Vec<(String, f64)>,
    pub pattern_category_counts: HashMap<String, i64>,
    pub total_observations: i64,
    pub confidence: ContextConfidence,
}

impl Default for ContextConfidence {
    fn default() -> Self {
        ContextConfidence::Low
    }
}

impl CycleContext {
    /// Assemble a fresh snapshot from accumulated aggregates.
    pub fn load(db: &Db) -> Result<Self> {
        let mut ctx = CycleContext::default();

        // agent reputations
        {
            let conn = db.conn();
            let mut stmt = conn.prepare(
                "SELECT agent_hash, classification FROM agent_relationships",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (hash, classification) = row?;
                match classification.as_str() {
                    "constructive" => {
                        ctx.constructive_agents.insert(hash);
                    }
                    "hostile" => {
                        ctx.hostile_agents.insert(hash);
                    }
                    _ => {}
                }
            }
        }

        // follows
        {
            let conn = db.conn();
            let mut stmt = conn.prepare("SELECT agent_hash FROM follows")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                ctx.followed_agents.insert(row?);
            }
        }

        // submolt health: outcome aggregates joined with attack share
        {
            let conn = db.conn();
            let mut stmt = conn.prepare(
                "SELECT submolt,
                        COUNT(*),
                        AVG(CASE WHEN status = 'hostile' THEN 1.0 ELSE 0.0 END),
                        AVG(sentiment)
                 FROM interaction_outcomes
                 WHERE submolt IS NOT NULL
                 GROUP BY submolt",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })?;
            for row in rows {
                let (submolt, outcomes, hostile_ratio, avg_sentiment) = row?;
                ctx.submolt_health.insert(
                    submolt,
                    SubmoltHealth {
                        outcomes,
                        hostile_ratio,
                        avg_sentiment,
                        attack_share: 0.0,
                    },
                );
            }

            let since = Utc::now().timestamp() - 7 * 86_400;
            let mut stmt = conn.prepare(
                "SELECT submolt,
                        AVG(CASE WHEN attack_type IS NOT NULL THEN 1.0 ELSE 0.0 END)
                 FROM seen_posts
                 WHERE submolt IS NOT NULL AND seen_at >= ?1
                 GROUP BY submolt",
            )?;
            let rows = stmt.query_map(params![since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (submolt, attack_share) = row?;
                ctx.submolt_health
                    .entry(submolt)
                    .or_default()
                    .attack_share = attack_share;
            }
        }

        // resonant shapes
        {
            let conn = db.conn();
            let mut stmt = conn.prepare(
                "SELECT item, score FROM resonance_scores
                 WHERE category = 'shape' AND uses >= 3
                 ORDER BY score DESC LIMIT 5",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                ctx.top_shapes.push(row?);
            }
        }

        // pattern category counts
        {
            let conn = db.conn();
            let mut stmt = conn.prepare(
                "SELECT category, COUNT(*) FROM patterns WHERE active = 1 GROUP BY category",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (category, count) = row?;
                ctx.pattern_category_counts.insert(category, count);
            }
        }

        // attack hours + source effectiveness via the seen store
        let seen = SeenStore::new(db.clone());
        ctx.peak_attack_hours = seen
            .attack_hour_counts(7)?
            .into_iter()
            .take(3)
            .map(|(hour, _)| hour)
            .collect();
        ctx.source_effectiveness = seen
            .source_effectiveness(7)?
            .into_iter()
            .map(|(source, avg, _)| (source, avg))
            .collect();

        // total observation volume sets the confidence tier
        ctx.total_observations = db.conn().query_row(
            "SELECT (SELECT COUNT(*) FROM interaction_outcomes)
                  + (SELECT COUNT(*) FROM seen_posts)",
            [],
            |row| row.get(0),
        )?;
        ctx.confidence = if ctx.total_observations < 25 {
            ContextConfidence::Low
        } else if ctx.total_observations < 100 {
            ContextConfidence::Medium
        } else {
            ContextConfidence::High
        };

        info!(
            "Cycle context loaded: {} observations, confidence {:?}, {} constructive / {} hostile agents",
            ctx.total_observations,
            ctx.confidence,
            ctx.constructive_agents.len(),
            ctx.hostile_agents.len()
        );
        Ok(ctx)
    }

    /// Ordered discovery sources, best-performing first; unknown sources keep
    /// their caller-provided order after the known ones.
    pub fn ordered_sources<'a>(&self, defaults: &[&'a str]) -> Vec<&'a str> {
        let mut ordered: Vec<&'a str> = self
            .source_effectiveness
            .iter()
            .filter_map(|(name, _)| defaults.iter().find(|d| **d == name).copied())
            .collect();
        for d in defaults {
            if !ordered.contains(d) {
                ordered.push(d);
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seen::Decision;

    #[test]
    fn test_empty_db_is_low_confidence() {
        let db = Db::open_in_memory().unwrap();
        let ctx = CycleContext::load(&db).unwrap();
        assert_eq!(ctx.confidence, ContextConfidence::Low);
        assert_eq!(ctx.confidence.strength(), 0.0);
        assert!(ctx.constructive_agents.is_empty());
    }

    #[test]
    fn test_confidence_tiers() {
        let db = Db::open_in_memory().unwrap();
        let seen = SeenStore::new(db.clone());
        for i in 0..30 {
            seen.mark(&format!("p{i}"), 50, Decision::Skipped, None, None, Some("new"))
                .unwrap();
        }
        let ctx = CycleContext::load(&db).unwrap();
        assert_eq!(ctx.confidence, ContextConfidence::Medium);
        assert_eq!(ctx.confidence.strength(), 0.5);

        for i in 30..120 {
            seen.mark(&format!("p{i}"), 50, Decision::Skipped, None, None, Some("new"))
                .unwrap();
        }
        let ctx = CycleContext::load(&db).unwrap();
        assert_eq!(ctx.confidence, ContextConfidence::High);
        assert_eq!(ctx.confidence.strength(), 1.0);
    }

    #[test]
    fn test_agent_classifications_loaded() {
        let db = Db::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO agent_relationships
                 (agent_hash, interactions, responses, hostile, sentiment_sum, classification, updated_at)
                 VALUES ('aaa', 5, 4, 0, 100, 'constructive', 0),
                        ('bbb', 5, 1, 4, -200, 'hostile', 0)",
                [],
            )
            .unwrap();
        let ctx = CycleContext::load(&db).unwrap();
        assert!(ctx.constructive_agents.contains("aaa"));
        assert!(ctx.hostile_agents.contains("bbb"));
    }

    #[test]
    fn test_bot_dense_submolt() {
        let health = SubmoltHealth {
            outcomes: 10,
            hostile_ratio: 0.1,
            avg_sentiment: 0.0,
            attack_share: 0.55,
        };
        assert!(health.is_bot_dense());
    }

    #[test]
    fn test_ordered_sources_prefers_effective() {
        let ctx = CycleContext {
            source_effectiveness: vec![("rising".into(), 62.0), ("new".into(), 40.0)],
            ..Default::default()
        };
        let ordered = ctx.ordered_sources(&["new", "rising", "feed"]);
        assert_eq!(ordered, vec!["rising", "new", "feed"]);
    }
}
