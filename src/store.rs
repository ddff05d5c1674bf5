//! SQLite Store
//!
//! One shared connection behind a mutex; every domain store (budget, seen
//! posts, patterns, outcomes) borrows a handle. Schema is created idempotently
//! on open. Runs are independent invocations, so nothing is cached in memory
//! across runs - the database is the only state that survives.

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Shared database handle.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        info!("Database opened: {}", path.display());
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Lock the connection. Single logical thread; contention is not expected.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS daily_budget (
                day TEXT PRIMARY KEY,
                comments_used INTEGER NOT NULL DEFAULT 0,
                comments_max INTEGER NOT NULL,
                posts_used INTEGER NOT NULL DEFAULT 0,
                posts_max INTEGER NOT NULL,
                replies_used INTEGER NOT NULL DEFAULT 0,
                replies_max INTEGER NOT NULL,
                upvotes_used INTEGER NOT NULL DEFAULT 0,
                upvotes_max INTEGER NOT NULL,
                follows_used INTEGER NOT NULL DEFAULT 0,
                follows_max INTEGER NOT NULL,
                last_comment_at INTEGER,
                last_post_at INTEGER,
                last_reply_at INTEGER,
                rate_limited_until INTEGER,
                rate_limit_endpoint TEXT
            );

            CREATE TABLE IF NOT EXISTS seen_posts (
                post_id TEXT PRIMARY KEY,
                score INTEGER NOT NULL,
                decision TEXT NOT NULL,
                attack_type TEXT,
                submolt TEXT,
                source TEXT,
                seen_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_seen_posts_time ON seen_posts(seen_at DESC);

            CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                observed_count INTEGER NOT NULL DEFAULT 1,
                seeds TEXT NOT NULL DEFAULT '[]',
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_category ON patterns(category, active);

            CREATE TABLE IF NOT EXISTS pattern_evolutions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_id TEXT NOT NULL,
                description TEXT NOT NULL,
                observed_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_evolutions_pattern
                ON pattern_evolutions(pattern_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS pattern_digest (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body TEXT NOT NULL,
                pattern_count INTEGER NOT NULL,
                built_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dream_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at INTEGER NOT NULL,
                validated INTEGER NOT NULL DEFAULT 0,
                confirmed INTEGER NOT NULL DEFAULT 0,
                contradicted INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS interaction_outcomes (
                post_id TEXT PRIMARY KEY,
                agent_hash TEXT NOT NULL,
                submolt TEXT,
                shape TEXT,
                metaphor_family TEXT,
                topic TEXT,
                engaged_at INTEGER NOT NULL,
                poll_count INTEGER NOT NULL DEFAULT 0,
                last_polled_at INTEGER,
                response_count INTEGER NOT NULL DEFAULT 0,
                thread_depth INTEGER NOT NULL DEFAULT 0,
                spread INTEGER NOT NULL DEFAULT 0,
                sentiment INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending'
            );

            CREATE INDEX IF NOT EXISTS idx_outcomes_status
                ON interaction_outcomes(status, engaged_at);

            CREATE TABLE IF NOT EXISTS agent_relationships (
                agent_hash TEXT PRIMARY KEY,
                interactions INTEGER NOT NULL DEFAULT 0,
                responses INTEGER NOT NULL DEFAULT 0,
                hostile INTEGER NOT NULL DEFAULT 0,
                sentiment_sum INTEGER NOT NULL DEFAULT 0,
                classification TEXT NOT NULL DEFAULT 'neutral',
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS resonance_scores (
                category TEXT NOT NULL,
                item TEXT NOT NULL,
                uses INTEGER NOT NULL DEFAULT 0,
                response_rate REAL NOT NULL DEFAULT 0,
                avg_sentiment REAL NOT NULL DEFAULT 0,
                avg_depth REAL NOT NULL DEFAULT 0,
                avg_spread REAL NOT NULL DEFAULT 0,
                score REAL NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (category, item)
            );

            CREATE TABLE IF NOT EXISTS follows (
                agent_hash TEXT PRIMARY KEY,
                followed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS author_comment_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id TEXT NOT NULL,
                author_hash TEXT NOT NULL,
                content_normalized TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_comment_log_author
                ON author_comment_log(post_id, author_hash, created_at DESC);

            CREATE TABLE IF NOT EXISTS run_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at INTEGER NOT NULL,
                posts_processed INTEGER NOT NULL DEFAULT 0,
                comments_made INTEGER NOT NULL DEFAULT 0,
                attacks_detected INTEGER NOT NULL DEFAULT 0,
                requests_used INTEGER NOT NULL DEFAULT 0,
                dry_run INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }
}
