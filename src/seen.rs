//! Seen-Post Store
//!
//! Deduplicates discovered content by post id and records score and decision
//! provenance. Rows are a historical record and are never deleted.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::store::Db;

/// What the pipeline decided to do with a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Commented,
    Cataloged,
    Upvoted,
    Skipped,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Commented => "commented",
            Decision::Cataloged => "cataloged",
            Decision::Upvoted => "upvoted",
            Decision::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "commented" => Some(Decision::Commented),
            "cataloged" => Some(Decision::Cataloged),
            "upvoted" => Some(Decision::Upvoted),
            "skipped" => Some(Decision::Skipped),
            _ => None,
        }
    }
}

/// A recorded sighting.
#[derive(Debug, Clone)]
pub struct SeenRecord {
    pub post_id: String,
    pub score: i64,
    pub decision: Decision,
    pub attack_type: Option<String>,
    pub submolt: Option<String>,
    pub source: Option<String>,
    pub seen_at: i64,
}

pub struct SeenStore {
    db: Db,
}

impl SeenStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn is_seen(&self, post_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT 1 FROM seen_posts WHERE post_id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Mark a post processed. Critical path: failure here must propagate, a
    /// silent miss would cause a reprocessing loop next run.
    pub fn mark(
        &self,
        post_id: &str,
        score: i64,
        decision: Decision,
        attack_type: Option<&str>,
        submolt: Option<&str>,
        source: Option<&str>,
    ) -> Result<()> {
        self.db.conn().execute(
            "INSERT OR REPLACE INTO seen_posts
             (post_id, score, decision, attack_type, submolt, source, seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                post_id,
                score,
                decision.as_str(),
                attack_type,
                submolt,
                source,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, post_id: &str) -> Result<Option<SeenRecord>> {
        let record = self
            .db
            .conn()
            .query_row(
                "SELECT post_id, score, decision, attack_type, submolt, source, seen_at
                 FROM seen_posts WHERE post_id = ?1",
                params![post_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;
        Ok(record.map(
            |(post_id, score, decision, attack_type, submolt, source, seen_at)| SeenRecord {
                post_id,
                score,
                decision: Decision::parse(&decision).unwrap_or(Decision::Skipped),
                attack_type,
                submolt,
                source,
                seen_at,
            },
        ))
    }

    /// Attack counts per hour-of-day over the trailing window, for the cycle
    /// context's peak-attack-hours signal.
    pub fn attack_hour_counts(&self, window_days: i64) -> Result<Vec<(u32, i64)>> {
        let since = Utc::now().timestamp() - window_days * 86_400;
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%H', seen_at, 'unixepoch') AS INTEGER) AS hour, COUNT(*)
             FROM seen_posts
             WHERE attack_type IS NOT NULL AND seen_at >= ?1
             GROUP BY hour ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Average score per discovery source over the trailing window.
    pub fn source_effectiveness(&self, window_days: i64) -> Result<Vec<(String, f64, i64)>> {
        let since = Utc::now().timestamp() - window_days * 86_400;
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT source, AVG(score), COUNT(*)
             FROM seen_posts
             WHERE source IS NOT NULL AND seen_at >= ?1
             GROUP BY source ORDER BY AVG(score) DESC",
        )?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
