//! Pattern Digest
//!
//! A compact text brief synthesized from the pattern store and handed to the
//! response generator as background voice. Rebuilt lazily: only when enough
//! new patterns accumulated or the current digest aged out. The digest body is
//! size-capped so it never crowds out the actual post in the prompt window.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use tracing::{info, warn};

use super::patterns::{HobPattern, PatternStore};
use crate::llm::{parse_json_lenient, JsonParse, LlmClient};
use crate::store::Db;

/// New patterns since the last build that force a rebuild.
const REBUILD_PATTERN_THRESHOLD: i64 = 3;
/// Digest age that forces a rebuild regardless of new patterns.
const REBUILD_MAX_AGE_SECS: i64 = 24 * 3600;
/// Hard cap on the rendered digest body.
const MAX_DIGEST_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "\
You maintain a working brief for a long-running social agent. Given its \
catalog of observed behavioral patterns, distill a brief it can keep in mind \
while replying. Respond with ONLY a JSON object:\n\
{\"themes\": [\"3-6 recurring dynamics worth engaging with\"], \
\"watchlist\": [\"2-5 manipulation mechanics to stay alert for\"], \
\"voice_notes\": [\"2-4 short reminders about how to sound\"]}";

/// The structured content of a digest, in priority order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestContent {
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default)]
    pub voice_notes: Vec<String>,
}

/// A digest row as stored.
#[derive(Debug, Clone)]
pub struct StoredDigest {
    pub body: String,
    pub pattern_count: i64,
    pub built_at: i64,
}

pub struct DigestBuilder {
    db: Db,
    llm: LlmClient,
}

impl DigestBuilder {
    pub fn new(db: Db, llm: LlmClient) -> Self {
        Self { db, llm }
    }

    /// Latest stored digest, if any.
    pub fn current(&self) -> Result<Option<StoredDigest>> {
        let row = self
            .db
            .conn()
            .query_row(
                "SELECT body, pattern_count, built_at FROM pattern_digest
                 ORDER BY built_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(StoredDigest {
                        body: row.get(0)?,
                        pattern_count: row.get(1)?,
                        built_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Whether the digest should be rebuilt this run.
    pub fn needs_rebuild(&self, patterns: &PatternStore) -> Result<bool> {
        let Some(current) = self.current()? else {
            return Ok(true);
        };
        let age = Utc::now().timestamp() - current.built_at;
        if age >= REBUILD_MAX_AGE_SECS {
            return Ok(true);
        }
        Ok(patterns.created_since(current.built_at)? >= REBUILD_PATTERN_THRESHOLD)
    }

    /// Rebuild the digest from the active catalog. LLM failure falls back to
    /// a mechanical rendering of the top patterns so the responder is never
    /// left without background.
    pub async fn rebuild(&self, patterns: &PatternStore) -> Result<StoredDigest> {
        let active = patterns.all_active()?;
        let retired = patterns.recently_retired(7)?;

        let content = match self.synthesize(&active, &retired).await {
            Some(content) => content,
            None => mechanical_fallback(&active),
        };
        let body = render_digest(&content);

        let now = Utc::now().timestamp();
        self.db.conn().execute(
            "INSERT INTO pattern_digest (body, pattern_count, built_at) VALUES (?1, ?2, ?3)",
            params![body, active.len() as i64, now],
        )?;
        info!(
            "Digest rebuilt: {} patterns, {} chars",
            active.len(),
            body.chars().count()
        );
        Ok(StoredDigest {
            body,
            pattern_count: active.len() as i64,
            built_at: now,
        })
    }

    async fn synthesize(
        &self,
        active: &[HobPattern],
        retired: &[HobPattern],
    ) -> Option<DigestContent> {
        if !self.llm.is_available() || active.is_empty() {
            return None;
        }
        let mut user = String::from("Active patterns:\n");
        for p in active.iter().take(40) {
            user.push_str(&format!(
                "- [{}] {} (seen {}x): {}\n",
                p.category.as_str(),
                p.name,
                p.observed_count,
                p.description
            ));
        }
        if !retired.is_empty() {
            user.push_str("\nRecently faded (do not dwell on these):\n");
            for p in retired.iter().take(10) {
                user.push_str(&format!("- {}\n", p.name));
            }
        }

        let reply = match self.llm.generate(SYSTEM_PROMPT, &user, 0.4, 1000).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Digest synthesis failed: {}", e);
                return None;
            }
        };
        match parse_json_lenient::<DigestContent>(&reply.text) {
            JsonParse::Parsed(content) => Some(content),
            JsonParse::Failed { .. } => None,
        }
    }
}

/// Render a digest body, trimming lowest-priority sections first until it
/// fits the cap. Themes survive longest; voice notes go first.
pub fn render_digest(content: &DigestContent) -> String {
    let mut c = content.clone();
    loop {
        let body = render_once(&c);
        if body.chars().count() <= MAX_DIGEST_CHARS {
            return body;
        }
        if !c.voice_notes.is_empty() {
            c.voice_notes.clear();
        } else if !c.watchlist.is_empty() {
            c.watchlist.clear();
        } else if c.themes.len() > 1 {
            c.themes.pop();
        } else {
            let mut body = render_once(&c);
            body.truncate(
                body.char_indices()
                    .nth(MAX_DIGEST_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(body.len()),
            );
            return body;
        }
    }
}

fn render_once(content: &DigestContent) -> String {
    let mut body = String::new();
    if !content.themes.is_empty() {
        body.push_str("Recurring dynamics:\n");
        for t in &content.themes {
            body.push_str(&format!("- {t}\n"));
        }
    }
    if !content.watchlist.is_empty() {
        body.push_str("Stay alert for:\n");
        for w in &content.watchlist {
            body.push_str(&format!("- {w}\n"));
        }
    }
    if !content.voice_notes.is_empty() {
        body.push_str("Voice:\n");
        for v in &content.voice_notes {
            body.push_str(&format!("- {v}\n"));
        }
    }
    body
}

/// Digest built without an LLM: top patterns by observation count become
/// themes, attack-vector patterns become the watchlist.
fn mechanical_fallback(active: &[HobPattern]) -> DigestContent {
    let themes = active
        .iter()
        .filter(|p| p.category.as_str() != "attack-vector")
        .take(6)
        .map(|p| format!("{}: {}", p.name, p.description))
        .collect();
    let watchlist = active
        .iter()
        .filter(|p| p.category.as_str() == "attack-vector")
        .take(5)
        .map(|p| format!("{}: {}", p.name, p.description))
        .collect();
    DigestContent {
        themes,
        watchlist,
        voice_notes: vec![],
    }
}
