//! Pattern Store
//!
//! Deduplicated behavioral patterns with versioned evolution snapshots.
//! Dedup threshold (0.4), seed-merge threshold (0.5), and evolution-snapshot
//! threshold (0.9) are deliberately distinct knobs; they are not one constant.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::PatternCategory;
use crate::store::Db;
use crate::text::{jaccard, slugify};

/// Similarity at or above which a candidate merges into an existing pattern.
pub const DEDUP_SIMILARITY: f64 = 0.4;
/// Similarity at or above which a generation seed is considered a duplicate.
pub const SEED_SIMILARITY: f64 = 0.5;
/// Similarity below which a description change earns an evolution snapshot.
pub const EVOLUTION_SIMILARITY: f64 = 0.9;
/// Count growth that forces a snapshot even without description drift.
pub const EVOLUTION_COUNT_STEP: i64 = 3;

const RETIRE_AFTER_DAYS: i64 = 30;
const PURGE_AFTER_MORE_DAYS: i64 = 60;

/// A stored behavioral pattern.
#[derive(Debug, Clone)]
pub struct HobPattern {
    pub id: String,
    pub name: String,
    pub category: PatternCategory,
    pub description: String,
    pub observed_count: i64,
    pub seeds: Vec<String>,
    pub first_seen: i64,
    pub last_seen: i64,
    pub active: bool,
}

/// A candidate produced by extraction, before dedup.
#[derive(Debug, Clone)]
pub struct PatternCandidate {
    pub name: String,
    pub category: PatternCategory,
    pub description: String,
    pub seeds: Vec<String>,
}

/// Outcome of observing a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveResult {
    /// New row inserted with this id.
    Inserted(String),
    /// Existing pattern's count incremented; id of that pattern.
    Merged(String),
}

pub struct PatternStore {
    db: Db,
}

impl PatternStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Observe a candidate: merge into the closest same-category active
    /// pattern at similarity >= 0.4, otherwise insert a new row. Idempotent
    /// for repeated identical candidates.
    pub fn observe(&self, candidate: &PatternCandidate) -> Result<ObserveResult> {
        let actives = self.active_by_category(candidate.category)?;

        let mut best: Option<(&HobPattern, f64)> = None;
        for pattern in &actives {
            let sim = jaccard(&pattern.description, &candidate.description);
            if sim >= DEDUP_SIMILARITY && best.map(|(_, b)| sim > b).unwrap_or(true) {
                best = Some((pattern, sim));
            }
        }

        let now = Utc::now().timestamp();
        if let Some((existing, sim)) = best {
            let merged_seeds = merge_seeds(&existing.seeds, &candidate.seeds);
            let new_count = existing.observed_count + 1;
            self.db.conn().execute(
                "UPDATE patterns SET observed_count = ?2, seeds = ?3, last_seen = ?4
                 WHERE id = ?1",
                params![
                    existing.id,
                    new_count,
                    serde_json::to_string(&merged_seeds)?,
                    now
                ],
            )?;
            debug!(
                "Pattern {} merged at similarity {:.2} (count {})",
                existing.id, sim, new_count
            );
            self.maybe_snapshot(&existing.id)?;
            return Ok(ObserveResult::Merged(existing.id.clone()));
        }

        let id = self.unique_slug(&candidate.name)?;
        self.db.conn().execute(
            "INSERT INTO patterns
             (id, name, category, description, observed_count, seeds, first_seen, last_seen, active)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6, 1)",
            params![
                id,
                candidate.name,
                candidate.category.as_str(),
                candidate.description,
                serde_json::to_string(&candidate.seeds)?,
                now
            ],
        )?;
        // initial snapshot anchors later drift comparison
        self.db.conn().execute(
            "INSERT INTO pattern_evolutions (pattern_id, description, observed_count, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![id, candidate.description, now],
        )?;
        info!("New pattern stored: {} [{}]", id, candidate.category.as_str());
        Ok(ObserveResult::Inserted(id))
    }

    /// Rewrite a pattern's description (dream refinement path) and snapshot
    /// if it drifted.
    pub fn refine_description(&self, id: &str, description: &str) -> Result<()> {
        self.db.conn().execute(
            "UPDATE patterns SET description = ?2 WHERE id = ?1",
            params![id, description],
        )?;
        self.maybe_snapshot(id)?;
        Ok(())
    }

    /// Snapshot the pattern if its description drifted below the evolution
    /// similarity threshold, or its count grew by the count step since the
    /// last snapshot.
    pub fn maybe_snapshot(&self, id: &str) -> Result<bool> {
        let Some(pattern) = self.get(id)? else {
            return Ok(false);
        };
        let last: Option<(String, i64)> = self
            .db
            .conn()
            .query_row(
                "SELECT description, observed_count FROM pattern_evolutions
                 WHERE pattern_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let needs_snapshot = match &last {
            None => true,
            Some((prev_desc, prev_count)) => {
                jaccard(prev_desc, &pattern.description) < EVOLUTION_SIMILARITY
                    || pattern.observed_count - prev_count >= EVOLUTION_COUNT_STEP
            }
        };
        if needs_snapshot {
            self.db.conn().execute(
                "INSERT INTO pattern_evolutions (pattern_id, description, observed_count, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    pattern.description,
                    pattern.observed_count,
                    Utc::now().timestamp()
                ],
            )?;
        }
        Ok(needs_snapshot)
    }

    /// Retire patterns unobserved for 30 days; purge retired patterns after
    /// 60 further days of inactivity.
    pub fn retire_stale(&self) -> Result<(usize, usize)> {
        let now = Utc::now().timestamp();
        let retire_before = now - RETIRE_AFTER_DAYS * 86_400;
        let purge_before = retire_before - PURGE_AFTER_MORE_DAYS * 86_400;

        let retired = self.db.conn().execute(
            "UPDATE patterns SET active = 0 WHERE active = 1 AND last_seen < ?1",
            params![retire_before],
        )?;
        let purged = self.db.conn().execute(
            "DELETE FROM patterns WHERE active = 0 AND last_seen < ?1",
            params![purge_before],
        )?;
        if retired > 0 || purged > 0 {
            info!("Pattern hygiene: {} retired, {} purged", retired, purged);
        }
        Ok((retired, purged))
    }

    pub fn get(&self, id: &str) -> Result<Option<HobPattern>> {
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT id, name, category, description, observed_count, seeds,
                        first_seen, last_seen, active
                 FROM patterns WHERE id = ?1",
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(row.flatten())
    }

    pub fn active_by_category(&self, category: PatternCategory) -> Result<Vec<HobPattern>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, category, description, observed_count, seeds,
                    first_seen, last_seen, active
             FROM patterns WHERE category = ?1 AND active = 1
             ORDER BY observed_count DESC",
        )?;
        let rows = stmt
            .query_map(params![category.as_str()], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().flatten().collect())
    }

    pub fn all_active(&self) -> Result<Vec<HobPattern>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, category, description, observed_count, seeds,
                    first_seen, last_seen, active
             FROM patterns WHERE active = 1 ORDER BY observed_count DESC",
        )?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().flatten().collect())
    }

    /// Patterns retired within the trailing window, for digest context.
    pub fn recently_retired(&self, window_days: i64) -> Result<Vec<HobPattern>> {
        let since = Utc::now().timestamp() - window_days * 86_400;
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, category, description, observed_count, seeds,
                    first_seen, last_seen, active
             FROM patterns WHERE active = 0 AND last_seen >= ?1",
        )?;
        let rows = stmt
            .query_map(params![since], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().flatten().collect())
    }

    /// Patterns created since the given timestamp.
    pub fn created_since(&self, since: i64) -> Result<i64> {
        let count = self.db.conn().query_row(
            "SELECT COUNT(*) FROM patterns WHERE first_seen >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn evolution_count(&self, id: &str) -> Result<i64> {
        let count = self.db.conn().query_row(
            "SELECT COUNT(*) FROM pattern_evolutions WHERE pattern_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn unique_slug(&self, name: &str) -> Result<String> {
        let base = slugify(name);
        let mut candidate = base.clone();
        let mut n = 2;
        loop {
            let exists: Option<i64> = self
                .db
                .conn()
                .query_row(
                    "SELECT 1 FROM patterns WHERE id = ?1",
                    params![candidate],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(candidate);
            }
            candidate = format!("{base}-{n}");
            n += 1;
        }
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<HobPattern>> {
        let category_str: String = row.get(2)?;
        let Some(category) = PatternCategory::parse(&category_str) else {
            return Ok(None); // unknown category rows are skipped, not fatal
        };
        let seeds_json: String = row.get(5)?;
        let seeds: Vec<String> = serde_json::from_str(&seeds_json).unwrap_or_default();
        Ok(Some(HobPattern {
            id: row.get(0)?,
            name: row.get(1)?,
            category,
            description: row.get(3)?,
            observed_count: row.get(4)?,
            seeds,
            first_seen: row.get(6)?,
            last_seen: row.get(7)?,
            active: row.get::<_, i64>(8)? != 0,
        }))
    }
}

/// Merge candidate seeds into existing ones, dropping near-duplicates at
/// similarity >= 0.5 and capping the list.
fn merge_seeds(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for seed in incoming {
        let duplicate = merged.iter().any(|s| jaccard(s, seed) >= SEED_SIMILARITY);
        if !duplicate {
            merged.push(seed.clone());
        }
    }
    merged.truncate(8);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PatternStore {
        PatternStore::new(Db::open_in_memory().unwrap())
    }

    fn candidate(name: &str, description: &str) -> PatternCandidate {
        PatternCandidate {
            name: name.into(),
            category: PatternCategory::BotBehavior,
            description: description.into(),
            seeds: vec!["write about coordinated timing".into()],
        }
    }

    #[test]
    fn test_insert_then_merge_idempotent() {
        let store = store();
        let c = candidate(
            "Synchronized Posting Burst",
            "multiple accounts publish near-identical posts within minutes of each other",
        );

        let first = store.observe(&c).unwrap();
        let id = match first {
            ObserveResult::Inserted(id) => id,
            other => panic!("expected insert, got {other:?}"),
        };

        let second = store.observe(&c).unwrap();
        assert_eq!(second, ObserveResult::Merged(id.clone()));

        let stored = store.get(&id).unwrap().unwrap();
        assert_eq!(stored.observed_count, 2);

        // exactly one row in the category
        let actives = store
            .active_by_category(PatternCategory::BotBehavior)
            .unwrap();
        assert_eq!(actives.len(), 1);
    }

    #[test]
    fn test_similar_description_merges() {
        let store = store();
        store
            .observe(&candidate(
                "Burst Pattern",
                "multiple accounts publish near-identical posts within minutes coordinating upvotes",
            ))
            .unwrap();
        let result = store
            .observe(&candidate(
                "Coordinated Burst",
                "accounts publish near-identical posts within minutes coordinating their upvotes",
            ))
            .unwrap();
        assert!(matches!(result, ObserveResult::Merged(_)));
    }

    #[test]
    fn test_distinct_description_inserts() {
        let store = store();
        store
            .observe(&candidate(
                "Burst Pattern",
                "multiple accounts publish near-identical posts within minutes",
            ))
            .unwrap();
        let result = store
            .observe(&candidate(
                "Flattery Probe",
                "excessive compliments used to lower guard before an extraction attempt",
            ))
            .unwrap();
        assert!(matches!(result, ObserveResult::Inserted(_)));
        assert_eq!(
            store
                .active_by_category(PatternCategory::BotBehavior)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_categories_do_not_cross_merge() {
        let store = store();
        let description = "identical descriptions in different categories stay separate rows";
        store
            .observe(&PatternCandidate {
                name: "One".into(),
                category: PatternCategory::BotBehavior,
                description: description.into(),
                seeds: vec![],
            })
            .unwrap();
        let result = store
            .observe(&PatternCandidate {
                name: "Two".into(),
                category: PatternCategory::AttackVector,
                description: description.into(),
                seeds: vec![],
            })
            .unwrap();
        assert!(matches!(result, ObserveResult::Inserted(_)));
    }

    #[test]
    fn test_seed_merge_drops_duplicates() {
        let merged = merge_seeds(
            &["write about coordinated timing of posts".to_string()],
            &[
                "write about the coordinated timing of posts".to_string(), // dup
                "describe username suffix matching".to_string(),           // new
            ],
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_slug_collision_suffixed() {
        let store = store();
        store
            .observe(&candidate(
                "Echo",
                "first pattern about repeated phrasing across accounts",
            ))
            .unwrap();
        // dissimilar description, same name -> new row with suffixed slug
        let result = store
            .observe(&candidate(
                "Echo",
                "entirely unrelated behavior involving link funnels to other sites",
            ))
            .unwrap();
        match result {
            ObserveResult::Inserted(id) => assert_eq!(id, "echo-2"),
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn test_evolution_snapshot_on_count_growth() {
        let store = store();
        let c = candidate(
            "Growth Pattern",
            "accounts publish coordinated near-identical posts within minutes repeatedly",
        );
        let ObserveResult::Inserted(id) = store.observe(&c).unwrap() else {
            panic!("expected insert");
        };
        assert_eq!(store.evolution_count(&id).unwrap(), 1);

        // counts 2,3 stay within the step; count 4 crosses it
        store.observe(&c).unwrap();
        store.observe(&c).unwrap();
        store.observe(&c).unwrap();
        assert_eq!(store.evolution_count(&id).unwrap(), 2);
    }

    #[test]
    fn test_evolution_snapshot_on_description_drift() {
        let store = store();
        let ObserveResult::Inserted(id) = store
            .observe(&candidate(
                "Drift Pattern",
                "accounts mirror each other's call to action tails",
            ))
            .unwrap()
        else {
            panic!("expected insert");
        };
        store
            .refine_description(
                &id,
                "rings of accounts amplify each other through mirrored replies and mentions",
            )
            .unwrap();
        assert_eq!(store.evolution_count(&id).unwrap(), 2);
    }

    #[test]
    fn test_retire_and_purge() {
        let store = store();
        let now = Utc::now().timestamp();
        let old = now - 40 * 86_400;
        let ancient = now - 120 * 86_400;
        store
            .db
            .conn()
            .execute(
                "INSERT INTO patterns (id, name, category, description, observed_count, seeds, first_seen, last_seen, active)
                 VALUES ('stale', 'Stale', 'bot-behavior', 'd', 1, '[]', ?1, ?1, 1),
                        ('dead', 'Dead', 'bot-behavior', 'd', 1, '[]', ?2, ?2, 0)",
                params![old, ancient],
            )
            .unwrap();

        let (retired, purged) = store.retire_stale().unwrap();
        assert_eq!(retired, 1);
        assert_eq!(purged, 1);
        assert!(!store.get("stale").unwrap().unwrap().active);
        assert!(store.get("dead").unwrap().is_none());
    }
}
