//! Dream Phase
//!
//! Once-daily maintenance pass over the pattern catalog. Phase 1 validates
//! patterns against live platform search without spending any LLM tokens.
//! Phase 2 snapshots description drift. Phase 3 is a single larger synthesis
//! call that proposes description refinements, leniently parsed and applied
//! only to known pattern ids.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::patterns::{HobPattern, PatternStore};
use crate::llm::{parse_json_array_lenient, LlmClient};
use crate::platform::PlatformClient;
use crate::store::Db;
use crate::text::keyword_set;

/// Minimum gap between dream runs.
pub const DREAM_COOLDOWN_SECS: i64 = 20 * 3600;
/// Patterns validated per dream, bounding platform requests.
const MAX_VALIDATED_PATTERNS: usize = 12;
const SEARCH_LIMIT: u32 = 10;
const MAX_REFINED_DESCRIPTION_CHARS: usize = 500;

/// Outcome of re-searching the platform for one pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    /// Plenty of live evidence.
    Confirmed,
    /// Some evidence, not yet widespread.
    Emerging,
    /// No evidence either way.
    Unvalidated,
    /// A well-observed pattern with no live trace anymore.
    Contradicted,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Confirmed => "confirmed",
            ValidationStatus::Emerging => "emerging",
            ValidationStatus::Unvalidated => "unvalidated",
            ValidationStatus::Contradicted => "contradicted",
        }
    }
}

/// Counters for one completed dream run.
#[derive(Debug, Clone, Default)]
pub struct DreamSummary {
    pub validated: usize,
    pub confirmed: usize,
    pub contradicted: usize,
    pub refined: usize,
}

#[derive(Debug, Deserialize)]
struct RawRefinement {
    id: Option<String>,
    description: Option<String>,
}

const SYNTHESIS_PROMPT: &str = "\
You maintain a catalog of observed behavioral patterns for a social agent. \
Given each pattern with its live-validation status, propose sharper one \
sentence descriptions ONLY where the validation evidence changes the picture. \
Respond with ONLY a JSON array (may be empty):\n\
[{\"id\": \"pattern-id\", \"description\": \"revised mechanistic sentence\"}]";

pub struct DreamRunner {
    db: Db,
    llm: LlmClient,
    platform: PlatformClient,
}

impl DreamRunner {
    pub fn new(db: Db, llm: LlmClient, platform: PlatformClient) -> Self {
        Self { db, llm, platform }
    }

    /// Whether the cooldown since the last dream has elapsed.
    pub fn due(&self) -> Result<bool> {
        let last: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT started_at FROM dream_runs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match last {
            None => true,
            Some(at) => Utc::now().timestamp() - at >= DREAM_COOLDOWN_SECS,
        })
    }

    pub async fn run(&self, patterns: &PatternStore) -> Result<DreamSummary> {
        let started_at = Utc::now().timestamp();
        self.db.conn().execute(
            "INSERT INTO dream_runs (started_at) VALUES (?1)",
            params![started_at],
        )?;
        let run_id = self.db.conn().last_insert_rowid();
        info!("Dream run {} starting", run_id);

        let active = patterns.all_active()?;
        let mut summary = DreamSummary::default();
        let mut validations: Vec<(HobPattern, ValidationStatus)> = Vec::new();

        // Phase 1: zero-LLM live validation.
        for pattern in active.iter().take(MAX_VALIDATED_PATTERNS) {
            let query = derive_query(&pattern.description);
            if query.is_empty() {
                continue;
            }
            let status = match self.platform.search_posts(&query, SEARCH_LIMIT).await {
                Ok(posts) => classify(posts.len(), pattern.observed_count),
                Err(e) => {
                    warn!("Dream validation search failed for {}: {}", pattern.id, e);
                    ValidationStatus::Unvalidated
                }
            };
            debug!("Pattern {} validated as {}", pattern.id, status.as_str());
            summary.validated += 1;
            match status {
                ValidationStatus::Confirmed => summary.confirmed += 1,
                ValidationStatus::Contradicted => summary.contradicted += 1,
                _ => {}
            }
            validations.push((pattern.clone(), status));
        }

        // Phase 2: drift snapshots.
        for pattern in &active {
            patterns.maybe_snapshot(&pattern.id)?;
        }

        // Phase 3: one synthesis call.
        if self.llm.is_available() && !validations.is_empty() {
            let refinements = self.synthesize(&validations).await;
            summary.refined = apply_refinements(patterns, refinements)?;
        }

        patterns.retire_stale()?;

        self.db.conn().execute(
            "UPDATE dream_runs SET validated = ?2, confirmed = ?3, contradicted = ?4
             WHERE id = ?1",
            params![
                run_id,
                summary.validated as i64,
                summary.confirmed as i64,
                summary.contradicted as i64
            ],
        )?;
        info!(
            "Dream run {} done: {} validated, {} confirmed, {} contradicted, {} refined",
            run_id, summary.validated, summary.confirmed, summary.contradicted, summary.refined
        );
        Ok(summary)
    }

    async fn synthesize(
        &self,
        validations: &[(HobPattern, ValidationStatus)],
    ) -> Vec<RawRefinement> {
        let mut user = String::from("Patterns with live validation:\n");
        for (pattern, status) in validations {
            user.push_str(&format!(
                "- id={} [{}] seen {}x, status={}: {}\n",
                pattern.id,
                pattern.category.as_str(),
                pattern.observed_count,
                status.as_str(),
                pattern.description
            ));
        }
        match self.llm.generate(SYNTHESIS_PROMPT, &user, 0.3, 1500).await {
            Ok(reply) => parse_json_array_lenient(&reply.text),
            Err(e) => {
                warn!("Dream synthesis failed: {}", e);
                vec![]
            }
        }
    }
}

/// Volume-based validation verdict. A pattern that was observed many times
/// but now returns nothing has likely been patched out or moved on.
fn classify(result_count: usize, observed_count: i64) -> ValidationStatus {
    match result_count {
        0 if observed_count >= 5 => ValidationStatus::Contradicted,
        0 => ValidationStatus::Unvalidated,
        1..=4 => ValidationStatus::Emerging,
        _ => ValidationStatus::Confirmed,
    }
}

/// Search query from a description: the three longest keywords, ties broken
/// alphabetically so the query is stable across runs.
fn derive_query(description: &str) -> String {
    let mut keywords: Vec<String> = keyword_set(description).into_iter().collect();
    keywords.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    keywords.truncate(3);
    keywords.join(" ")
}

/// Apply refinements to known pattern ids only, capping the new description.
fn apply_refinements(patterns: &PatternStore, refinements: Vec<RawRefinement>) -> Result<usize> {
    let mut applied = 0;
    for r in refinements {
        let (Some(id), Some(description)) = (r.id, r.description) else {
            continue;
        };
        let description: String = description
            .trim()
            .chars()
            .take(MAX_REFINED_DESCRIPTION_CHARS)
            .collect();
        if description.is_empty() {
            continue;
        }
        if patterns.get(&id)?.is_none() {
            debug!("Refinement for unknown pattern {} dropped", id);
            continue;
        }
        patterns.refine_description(&id, &description)?;
        applied += 1;
    }
    Ok(applied)
}
