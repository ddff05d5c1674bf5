//! Outcome Tracker
//!
//! Closes the loop on every engagement: pending outcomes are polled for up to
//! three days, replies are scored for sentiment, and the results roll up into
//! agent relationships and resonance scores that the next cycle's context
//! reads. Thread fetch failures are telemetry, logged and skipped, never
//! propagated into the run.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::platform::{Comment, PlatformClient};
use crate::store::Db;
use crate::text::display_name;

const POLL_WINDOW_SECS: i64 = 3 * 86_400;
const MAX_POLLS: i64 = 10;
const IGNORED_AFTER_SECS: i64 = 86_400;
const HOSTILE_SENTIMENT: i64 = -40;

const POSITIVE_KEYWORDS: &[&str] = &[
    "thanks",
    "thank you",
    "helpful",
    "good point",
    "great point",
    "agree",
    "insightful",
    "appreciate",
    "exactly right",
    "well put",
];

const NEGATIVE_KEYWORDS: &[&str] = &[
    "spam",
    "bot account",
    "shut up",
    "nonsense",
    "garbage",
    "scam",
    "liar",
    "go away",
    "stupid",
    "reported",
];

const POSITIVE_WEIGHT: i64 = 15;
const NEGATIVE_WEIGHT: i64 = -25;
const SENTIMENT_CLAMP: i64 = 100;

/// Terminal and pending states of one engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Pending,
    Responded,
    Ignored,
    Hostile,
    Expired,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Pending => "pending",
            OutcomeStatus::Responded => "responded",
            OutcomeStatus::Ignored => "ignored",
            OutcomeStatus::Hostile => "hostile",
            OutcomeStatus::Expired => "expired",
        }
    }
}

/// What gets recorded when the agent engages a post.
#[derive(Debug, Clone, Default)]
pub struct Engagement {
    pub post_id: String,
    pub agent_hash: String,
    pub submolt: Option<String>,
    pub shape: Option<String>,
    pub metaphor_family: Option<String>,
    pub topic: Option<String>,
    pub cost_usd: f64,
}

/// Aggregates measured from one polled thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadStats {
    pub responses: i64,
    pub depth: i64,
    pub spread: i64,
    pub sentiment: i64,
}

/// Counters for one reflect pass.
#[derive(Debug, Clone, Default)]
pub struct ReflectSummary {
    pub polled: usize,
    pub responded: usize,
    pub hostile: usize,
    pub ignored: usize,
    pub expired: usize,
}

pub struct OutcomeTracker {
    db: Db,
    platform: PlatformClient,
    agent_name: String,
}

impl OutcomeTracker {
    pub fn new(db: Db, platform: PlatformClient, agent_name: &str) -> Self {
        Self {
            db,
            platform,
            agent_name: agent_name.to_string(),
        }
    }

    /// Record a fresh engagement as pending.
    pub fn record_engagement(&self, engagement: &Engagement) -> Result<()> {
        self.db.conn().execute(
            "INSERT OR REPLACE INTO interaction_outcomes
             (post_id, agent_hash, submolt, shape, metaphor_family, topic,
              engaged_at, cost_usd, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')",
            params![
                engagement.post_id,
                engagement.agent_hash,
                engagement.submolt,
                engagement.shape,
                engagement.metaphor_family,
                engagement.topic,
                Utc::now().timestamp(),
                engagement.cost_usd
            ],
        )?;
        Ok(())
    }

    /// Poll all pending outcomes once. Expiry is checked before any network
    /// traffic so stale rows cost nothing.
    pub async fn poll_pending(&self) -> Result<ReflectSummary> {
        let now = Utc::now().timestamp();
        let pending: Vec<(String, String, i64, i64)> = {
            let conn = self.db.conn();
            let mut stmt = conn.prepare(
                "SELECT post_id, agent_hash, engaged_at, poll_count
                 FROM interaction_outcomes WHERE status = 'pending'
                 ORDER BY engaged_at ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut summary = ReflectSummary::default();
        for (post_id, agent_hash, engaged_at, poll_count) in pending {
            let age = now - engaged_at;
            if age > POLL_WINDOW_SECS || poll_count >= MAX_POLLS {
                self.finalize(&post_id, &agent_hash, OutcomeStatus::Expired, &ThreadStats::default())?;
                summary.expired += 1;
                continue;
            }

            let comments = match self.platform.fetch_post_comments(&post_id).await {
                Ok(comments) => comments,
                Err(e) => {
                    warn!("Outcome poll for {} failed: {}", post_id, e);
                    continue;
                }
            };
            summary.polled += 1;

            let stats = evaluate_thread(&comments, engaged_at, &self.agent_name);
            let status = decide_status(&stats, age);
            debug!(
                "Outcome {}: {} responses, sentiment {}, status {}",
                post_id,
                stats.responses,
                stats.sentiment,
                status.as_str()
            );

            if status == OutcomeStatus::Pending {
                self.db.conn().execute(
                    "UPDATE interaction_outcomes
                     SET poll_count = poll_count + 1, last_polled_at = ?2,
                         response_count = ?3, thread_depth = ?4, spread = ?5, sentiment = ?6
                     WHERE post_id = ?1",
                    params![post_id, now, stats.responses, stats.depth, stats.spread, stats.sentiment],
                )?;
                continue;
            }

            self.finalize(&post_id, &agent_hash, status, &stats)?;
            match status {
                OutcomeStatus::Responded => summary.responded += 1,
                OutcomeStatus::Hostile => summary.hostile += 1,
                OutcomeStatus::Ignored => summary.ignored += 1,
                _ => {}
            }
        }

        if summary.polled > 0 || summary.expired > 0 {
            info!(
                "Reflect pass: {} polled, {} responded, {} hostile, {} ignored, {} expired",
                summary.polled, summary.responded, summary.hostile, summary.ignored, summary.expired
            );
        }
        self.rollup_resonance()?;
        Ok(summary)
    }

    /// Move an outcome to a terminal state and fold it into the author's
    /// relationship row.
    fn finalize(
        &self,
        post_id: &str,
        agent_hash: &str,
        status: OutcomeStatus,
        stats: &ThreadStats,
    ) -> Result<()> {
        self.db.conn().execute(
            "UPDATE interaction_outcomes
             SET status = ?2, last_polled_at = ?3, poll_count = poll_count + 1,
                 response_count = ?4, thread_depth = ?5, spread = ?6, sentiment = ?7
             WHERE post_id = ?1",
            params![
                post_id,
                status.as_str(),
                Utc::now().timestamp(),
                stats.responses,
                stats.depth,
                stats.spread,
                stats.sentiment
            ],
        )?;
        self.update_relationship(
            agent_hash,
            status == OutcomeStatus::Responded,
            status == OutcomeStatus::Hostile,
            stats.sentiment,
        )
    }

    /// Increment an agent's relationship counters and recompute its
    /// classification.
    pub fn update_relationship(
        &self,
        agent_hash: &str,
        responded: bool,
        hostile: bool,
        sentiment: i64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        self.db.conn().execute(
            "INSERT INTO agent_relationships
             (agent_hash, interactions, responses, hostile, sentiment_sum, classification, updated_at)
             VALUES (?1, 1, ?2, ?3, ?4, 'neutral', ?5)
             ON CONFLICT(agent_hash) DO UPDATE SET
                 interactions = interactions + 1,
                 responses = responses + ?2,
                 hostile = hostile + ?3,
                 sentiment_sum = sentiment_sum + ?4,
                 updated_at = ?5",
            params![agent_hash, responded as i64, hostile as i64, sentiment, now],
        )?;

        let (interactions, responses, hostiles, sentiment_sum): (i64, i64, i64, i64) =
            self.db.conn().query_row(
                "SELECT interactions, responses, hostile, sentiment_sum
                 FROM agent_relationships WHERE agent_hash = ?1",
                params![agent_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
        let classification =
            classify_relationship(interactions, responses, hostiles, sentiment_sum);
        self.db.conn().execute(
            "UPDATE agent_relationships SET classification = ?2 WHERE agent_hash = ?1",
            params![agent_hash, classification],
        )?;
        Ok(())
    }

    /// Recompute resonance scores per (category, item) from finalized
    /// outcomes. Items with fewer than 3 uses are skipped.
    pub fn rollup_resonance(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        for (category, column) in [
            ("submolt", "submolt"),
            ("shape", "shape"),
            ("metaphor", "metaphor_family"),
            ("topic", "topic"),
        ] {
            let rows: Vec<(String, i64, f64, f64, f64, f64)> = {
                let conn = self.db.conn();
                let sql = format!(
                    "SELECT {column},
                            COUNT(*),
                            AVG(CASE WHEN response_count > 0 THEN 1.0 ELSE 0.0 END),
                            AVG(sentiment),
                            AVG(thread_depth),
                            AVG(spread)
                     FROM interaction_outcomes
                     WHERE {column} IS NOT NULL AND status != 'pending'
                     GROUP BY {column} HAVING COUNT(*) >= 3"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            };

            for (item, uses, response_rate, avg_sentiment, avg_depth, avg_spread) in rows {
                let score =
                    resonance_score(response_rate, avg_sentiment, avg_depth, avg_spread);
                self.db.conn().execute(
                    "INSERT OR REPLACE INTO resonance_scores
                     (category, item, uses, response_rate, avg_sentiment, avg_depth,
                      avg_spread, score, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        category,
                        item,
                        uses,
                        response_rate,
                        avg_sentiment,
                        avg_depth,
                        avg_spread,
                        score,
                        now
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Compare the last 24h against the trailing week. Returns human-readable
    /// flags; an empty vec means nothing unusual.
    pub fn check_anomalies(&self) -> Result<Vec<String>> {
        let now = Utc::now().timestamp();
        let day_ago = now - 86_400;
        let week_ago = day_ago - 7 * 86_400;

        let window = |from: i64, to: i64| -> Result<(i64, f64, f64, f64)> {
            let row = self
                .db
                .conn()
                .query_row(
                    "SELECT COUNT(*),
                            AVG(CASE WHEN status = 'hostile' THEN 1.0 ELSE 0.0 END),
                            AVG(CASE WHEN response_count > 0 THEN 1.0 ELSE 0.0 END),
                            SUM(cost_usd)
                     FROM interaction_outcomes
                     WHERE status != 'pending' AND engaged_at >= ?1 AND engaged_at < ?2",
                    params![from, to],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                            row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                            row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                        ))
                    },
                )
                .optional()?;
            Ok(row.unwrap_or((0, 0.0, 0.0, 0.0)))
        };

        let (today_n, today_hostile, today_response, today_cost) = window(day_ago, now + 1)?;
        let (base_n, base_hostile, base_response, base_cost) = window(week_ago, day_ago)?;
        if today_n == 0 || base_n == 0 {
            return Ok(vec![]);
        }
        let base_daily_cost = base_cost / 7.0;

        let mut flags = Vec::new();
        if base_hostile > 0.0 && today_hostile > base_hostile * 2.0 {
            flags.push(format!(
                "hostile ratio {:.2} vs trailing {:.2}",
                today_hostile, base_hostile
            ));
        }
        if base_response > 0.0 && today_response < base_response * 0.5 {
            flags.push(format!(
                "response rate {:.2} vs trailing {:.2}",
                today_response, base_response
            ));
        }
        if base_daily_cost > 0.0 && today_cost > base_daily_cost * 2.5 {
            flags.push(format!(
                "cost {:.2} USD vs trailing daily {:.2}",
                today_cost, base_daily_cost
            ));
        }
        for flag in &flags {
            warn!("Anomaly: {}", flag);
        }
        Ok(flags)
    }
}

/// Keyword-weighted sentiment of one reply, clamped.
pub fn sentiment_of(text: &str) -> i64 {
    let lower = text.to_lowercase();
    let mut score = 0i64;
    for k in POSITIVE_KEYWORDS {
        score += lower.matches(k).count() as i64 * POSITIVE_WEIGHT;
    }
    for k in NEGATIVE_KEYWORDS {
        score += lower.matches(k).count() as i64 * NEGATIVE_WEIGHT;
    }
    score.clamp(-SENTIMENT_CLAMP, SENTIMENT_CLAMP)
}

/// Measure a fetched thread relative to the engagement time. The agent's own
/// comments never count as responses.
pub fn evaluate_thread(comments: &[Comment], engaged_at: i64, agent_name: &str) -> ThreadStats {
    let mut responses = 0i64;
    let mut spread_authors: HashSet<String> = HashSet::new();
    let mut sentiment = 0i64;

    for comment in comments {
        let author = display_name(
            comment.author.name.as_deref(),
            comment.author.username.as_deref(),
            comment.author.id.as_deref(),
        );
        if author == agent_name {
            continue;
        }
        let after_engagement = comment
            .created_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp() >= engaged_at)
            .unwrap_or(true);
        if !after_engagement {
            continue;
        }
        responses += 1;
        spread_authors.insert(author);
        sentiment += sentiment_of(&comment.content);
    }

    ThreadStats {
        responses,
        depth: thread_depth(comments),
        spread: spread_authors.len() as i64,
        sentiment: sentiment.clamp(-SENTIMENT_CLAMP, SENTIMENT_CLAMP),
    }
}

/// Longest parent chain in the thread.
fn thread_depth(comments: &[Comment]) -> i64 {
    let parents: HashMap<&str, Option<&str>> = comments
        .iter()
        .map(|c| (c.id.as_str(), c.parent_id.as_deref()))
        .collect();
    let mut max_depth = 0i64;
    for comment in comments {
        let mut depth = 1i64;
        let mut current = comment.parent_id.as_deref();
        // bounded walk, cycles in malformed data cannot spin forever
        while let Some(parent) = current {
            if depth > comments.len() as i64 {
                break;
            }
            depth += 1;
            current = parents.get(parent).copied().flatten();
        }
        max_depth = max_depth.max(depth);
    }
    max_depth
}

/// Status from measured stats and engagement age.
pub fn decide_status(stats: &ThreadStats, age_secs: i64) -> OutcomeStatus {
    if stats.sentiment <= HOSTILE_SENTIMENT {
        return OutcomeStatus::Hostile;
    }
    if stats.responses > 0 {
        return OutcomeStatus::Responded;
    }
    if age_secs >= IGNORED_AFTER_SECS {
        return OutcomeStatus::Ignored;
    }
    OutcomeStatus::Pending
}

/// Relationship classification. Below 3 interactions everything is neutral.
pub fn classify_relationship(
    interactions: i64,
    responses: i64,
    hostile: i64,
    sentiment_sum: i64,
) -> &'static str {
    if interactions < 3 {
        return "neutral";
    }
    let hostile_ratio = hostile as f64 / interactions as f64;
    if hostile_ratio > 0.5 {
        return "hostile";
    }
    let response_ratio = responses as f64 / interactions as f64;
    let avg_sentiment = sentiment_sum as f64 / interactions as f64;
    if response_ratio > 0.6 && avg_sentiment > 10.0 {
        return "constructive";
    }
    "neutral"
}

/// Weighted resonance: response rate dominates, sentiment and depth split the
/// middle, spread rounds it out.
fn resonance_score(response_rate: f64, avg_sentiment: f64, avg_depth: f64, avg_spread: f64) -> f64 {
    let sentiment_norm = ((avg_sentiment + 100.0) / 200.0).clamp(0.0, 1.0);
    let depth_norm = (avg_depth / 5.0).clamp(0.0, 1.0);
    let spread_norm = (avg_spread / 10.0).clamp(0.0, 1.0);
    0.30 * response_rate + 0.25 * sentiment_norm + 0.25 * depth_norm + 0.20 * spread_norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Author;

    fn tracker(db: &Db) -> OutcomeTracker {
        OutcomeTracker::new(
            db.clone(),
            PlatformClient::new("https://example.test/api", None),
            "hob",
        )
    }

    fn comment(id: &str, parent: Option<&str>, author: &str, content: &str) -> Comment {
        Comment {
            id: id.into(),
            post_id: Some("p1".into()),
            parent_id: parent.map(|s| s.into()),
            content: content.into(),
            author: Author {
                name: Some(author.into()),
                ..Default::default()
            },
            created_at: None,
        }
    }

    #[test]
    fn test_sentiment_weights_and_clamp() {
        assert_eq!(sentiment_of("thanks, very helpful"), 30);
        assert_eq!(sentiment_of("this is spam"), -25);
        assert_eq!(sentiment_of("spam spam spam spam spam"), -100);
        assert_eq!(sentiment_of("neutral remark about caching"), 0);
    }

    #[test]
    fn test_evaluate_thread_excludes_self() {
        let comments = vec![
            comment("c1", None, "hob", "my own reply"),
            comment("c2", Some("c1"), "ada", "good point, thanks"),
            comment("c3", Some("c2"), "bolt", "agree"),
        ];
        let stats = evaluate_thread(&comments, 0, "hob");
        assert_eq!(stats.responses, 2);
        assert_eq!(stats.spread, 2);
        assert_eq!(stats.depth, 3);
        assert_eq!(stats.sentiment, 45);
    }

    #[test]
    fn test_decide_status_bands() {
        let hostile = ThreadStats {
            sentiment: -50,
            responses: 2,
            ..Default::default()
        };
        assert_eq!(decide_status(&hostile, 100), OutcomeStatus::Hostile);

        let responded = ThreadStats {
            responses: 1,
            sentiment: 0,
            ..Default::default()
        };
        assert_eq!(decide_status(&responded, 100), OutcomeStatus::Responded);

        let quiet = ThreadStats::default();
        assert_eq!(decide_status(&quiet, 100), OutcomeStatus::Pending);
        assert_eq!(
            decide_status(&quiet, IGNORED_AFTER_SECS),
            OutcomeStatus::Ignored
        );
    }

    #[test]
    fn test_classify_relationship_bands() {
        assert_eq!(classify_relationship(2, 2, 2, -100), "neutral");
        assert_eq!(classify_relationship(4, 0, 3, 0), "hostile");
        assert_eq!(classify_relationship(5, 4, 0, 100), "constructive");
        // responsive but flat sentiment stays neutral
        assert_eq!(classify_relationship(5, 4, 0, 0), "neutral");
        assert_eq!(classify_relationship(5, 2, 1, 100), "neutral");
    }

    #[test]
    fn test_resonance_score_weighting() {
        let perfect = resonance_score(1.0, 100.0, 5.0, 10.0);
        assert!((perfect - 1.0).abs() < 1e-9);
        let flat = resonance_score(0.0, 0.0, 0.0, 0.0);
        assert!((flat - 0.125).abs() < 1e-9); // sentiment midpoint only
    }

    #[tokio::test]
    async fn test_expiry_before_network() {
        let db = Db::open_in_memory().unwrap();
        let tracker = tracker(&db);
        tracker
            .record_engagement(&Engagement {
                post_id: "old".into(),
                agent_hash: "aaaa".into(),
                ..Default::default()
            })
            .unwrap();
        let stale = Utc::now().timestamp() - POLL_WINDOW_SECS - 60;
        db.conn()
            .execute(
                "UPDATE interaction_outcomes SET engaged_at = ?1",
                params![stale],
            )
            .unwrap();

        let summary = tracker.poll_pending().await.unwrap();
        assert_eq!(summary.expired, 1);
        let status: String = db
            .conn()
            .query_row(
                "SELECT status FROM interaction_outcomes WHERE post_id = 'old'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "expired");
    }

    #[test]
    fn test_relationship_updates_reclassify() {
        let db = Db::open_in_memory().unwrap();
        let tracker = tracker(&db);
        for _ in 0..4 {
            tracker.update_relationship("bbbb", false, true, -60).unwrap();
        }
        let class: String = db
            .conn()
            .query_row(
                "SELECT classification FROM agent_relationships WHERE agent_hash = 'bbbb'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(class, "hostile");
    }

    #[test]
    fn test_resonance_requires_three_uses() {
        let db = Db::open_in_memory().unwrap();
        let tracker = tracker(&db);
        let now = Utc::now().timestamp();
        for i in 0..3 {
            db.conn()
                .execute(
                    "INSERT INTO interaction_outcomes
                     (post_id, agent_hash, shape, engaged_at, response_count, sentiment, status)
                     VALUES (?1, 'h', 'spiral', ?2, 2, 30, 'responded')",
                    params![format!("r{i}"), now],
                )
                .unwrap();
        }
        db.conn()
            .execute(
                "INSERT INTO interaction_outcomes
                 (post_id, agent_hash, shape, engaged_at, response_count, sentiment, status)
                 VALUES ('r9', 'h', 'rare-shape', ?1, 0, 0, 'ignored')",
                params![now],
            )
            .unwrap();

        tracker.rollup_resonance().unwrap();
        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM resonance_scores WHERE category = 'shape'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        let item: String = db
            .conn()
            .query_row(
                "SELECT item FROM resonance_scores WHERE category = 'shape'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(item, "spiral");
    }
}
