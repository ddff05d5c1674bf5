//! Budget Ledger
//!
//! Daily per-action counters that gate every outbound action. Rows are keyed
//! by UTC day and lazily created on first read; counters never migrate from a
//! prior day and rows are never deleted. `record_*` must be called iff the
//! external action actually succeeded (or was a simulated dry run) - the
//! calling site owns that contract, not the ledger.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use std::time::Duration;
use tracing::{info, warn};

use crate::store::Db;

/// Daily maxima. These mirror the platform's posted limits with headroom.
#[derive(Debug, Clone)]
pub struct BudgetLimits {
    pub comments_max: i64,
    pub posts_max: i64,
    pub replies_max: i64,
    pub upvotes_max: i64,
    pub follows_max: i64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            comments_max: 400,
            posts_max: 10,
            replies_max: 150,
            upvotes_max: 200,
            follows_max: 25,
        }
    }
}

/// The five budgeted action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Comment,
    Post,
    Reply,
    Upvote,
    Follow,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Comment => "comment",
            ActionKind::Post => "post",
            ActionKind::Reply => "reply",
            ActionKind::Upvote => "upvote",
            ActionKind::Follow => "follow",
        }
    }

    fn used_column(&self) -> &'static str {
        match self {
            ActionKind::Comment => "comments_used",
            ActionKind::Post => "posts_used",
            ActionKind::Reply => "replies_used",
            ActionKind::Upvote => "upvotes_used",
            ActionKind::Follow => "follows_used",
        }
    }

    fn max_column(&self) -> &'static str {
        match self {
            ActionKind::Comment => "comments_max",
            ActionKind::Post => "posts_max",
            ActionKind::Reply => "replies_max",
            ActionKind::Upvote => "upvotes_max",
            ActionKind::Follow => "follows_max",
        }
    }

    fn last_at_column(&self) -> Option<&'static str> {
        match self {
            ActionKind::Comment => Some("last_comment_at"),
            ActionKind::Post => Some("last_post_at"),
            ActionKind::Reply => Some("last_reply_at"),
            ActionKind::Upvote | ActionKind::Follow => None,
        }
    }
}

/// Snapshot of a day's budget state.
#[derive(Debug, Clone)]
pub struct BudgetSnapshot {
    pub day: String,
    pub comments_used: i64,
    pub comments_max: i64,
    pub posts_used: i64,
    pub posts_max: i64,
    pub replies_used: i64,
    pub replies_max: i64,
    pub upvotes_used: i64,
    pub upvotes_max: i64,
    pub follows_used: i64,
    pub follows_max: i64,
}

/// Budget ledger over the shared database.
pub struct BudgetLedger {
    db: Db,
    limits: BudgetLimits,
}

impl BudgetLedger {
    pub fn new(db: Db) -> Self {
        Self::with_limits(db, BudgetLimits::default())
    }

    pub fn with_limits(db: Db, limits: BudgetLimits) -> Self {
        Self { db, limits }
    }

    /// Current UTC day key.
    fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Lazily create today's row.
    fn ensure_today(&self) -> Result<String> {
        let day = Self::today();
        self.db.conn().execute(
            "INSERT OR IGNORE INTO daily_budget
             (day, comments_max, posts_max, replies_max, upvotes_max, follows_max)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                day,
                self.limits.comments_max,
                self.limits.posts_max,
                self.limits.replies_max,
                self.limits.upvotes_max,
                self.limits.follows_max,
            ],
        )?;
        Ok(day)
    }

    /// Whether the given action still has budget today.
    pub fn can(&self, kind: ActionKind) -> Result<bool> {
        let day = self.ensure_today()?;
        let sql = format!(
            "SELECT {} < {} FROM daily_budget WHERE day = ?1",
            kind.used_column(),
            kind.max_column()
        );
        let allowed: bool = self.db.conn().query_row(&sql, params![day], |row| row.get(0))?;
        Ok(allowed)
    }

    /// Record one successful action. Read-check-then-increment within a single
    /// statement so a retry at the call site cannot overspend.
    pub fn record(&self, kind: ActionKind) -> Result<()> {
        let day = self.ensure_today()?;
        let now = Utc::now().timestamp();
        let sql = match kind.last_at_column() {
            Some(last_col) => format!(
                "UPDATE daily_budget SET {used} = {used} + 1, {last} = ?2
                 WHERE day = ?1 AND {used} < {max}",
                used = kind.used_column(),
                max = kind.max_column(),
                last = last_col,
            ),
            None => format!(
                "UPDATE daily_budget SET {used} = {used} + 1
                 WHERE day = ?1 AND {used} < {max}",
                used = kind.used_column(),
                max = kind.max_column(),
            ),
        };
        let changed = match kind.last_at_column() {
            Some(_) => self.db.conn().execute(&sql, params![day, now])?,
            None => self.db.conn().execute(&sql, params![day])?,
        };
        if changed == 0 {
            warn!("Budget record for {} ignored: already at max", kind.as_str());
            anyhow::bail!("budget exhausted for {}", kind.as_str());
        }
        Ok(())
    }

    pub fn can_comment(&self) -> Result<bool> {
        self.can(ActionKind::Comment)
    }
    pub fn can_post(&self) -> Result<bool> {
        self.can(ActionKind::Post)
    }
    pub fn can_reply(&self) -> Result<bool> {
        self.can(ActionKind::Reply)
    }
    pub fn can_upvote(&self) -> Result<bool> {
        self.can(ActionKind::Upvote)
    }
    pub fn can_follow(&self) -> Result<bool> {
        self.can(ActionKind::Follow)
    }

    pub fn record_comment(&self) -> Result<()> {
        self.record(ActionKind::Comment)
    }
    pub fn record_post(&self) -> Result<()> {
        self.record(ActionKind::Post)
    }
    pub fn record_reply(&self) -> Result<()> {
        self.record(ActionKind::Reply)
    }
    pub fn record_upvote(&self) -> Result<()> {
        self.record(ActionKind::Upvote)
    }
    pub fn record_follow(&self) -> Result<()> {
        self.record(ActionKind::Follow)
    }

    /// Time since the last action of the given kind, if any action happened
    /// today. Only comment/post/reply track spacing.
    pub fn time_since_last(&self, kind: ActionKind) -> Result<Option<Duration>> {
        let Some(last_col) = kind.last_at_column() else {
            return Ok(None);
        };
        let day = self.ensure_today()?;
        let sql = format!("SELECT {last_col} FROM daily_budget WHERE day = ?1");
        let last: Option<i64> = self
            .db
            .conn()
            .query_row(&sql, params![day], |row| row.get(0))?;
        Ok(last.map(|ts| {
            let elapsed = (Utc::now().timestamp() - ts).max(0);
            Duration::from_secs(elapsed as u64)
        }))
    }

    pub fn time_since_last_comment(&self) -> Result<Option<Duration>> {
        self.time_since_last(ActionKind::Comment)
    }
    pub fn time_since_last_post(&self) -> Result<Option<Duration>> {
        self.time_since_last(ActionKind::Post)
    }
    pub fn time_since_last_reply(&self) -> Result<Option<Duration>> {
        self.time_since_last(ActionKind::Reply)
    }

    /// Record a rate-limit cooldown after an upstream 429.
    pub fn set_rate_limit(&self, endpoint: &str, retry_after: Duration) -> Result<()> {
        let day = self.ensure_today()?;
        let until = Utc::now().timestamp() + retry_after.as_secs() as i64;
        self.db.conn().execute(
            "UPDATE daily_budget SET rate_limited_until = ?2, rate_limit_endpoint = ?3
             WHERE day = ?1",
            params![day, until, endpoint],
        )?;
        let until_display = Utc
            .timestamp_opt(until, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| until.to_string());
        info!("Rate limit recorded for {}: until {}", endpoint, until_display);
        Ok(())
    }

    /// Whether a rate-limit cooldown is still in effect. Consulted before
    /// every post/comment attempt.
    pub fn rate_limited(&self) -> Result<bool> {
        let day = self.ensure_today()?;
        let until: Option<i64> = self
            .db
            .conn()
            .query_row(
                "SELECT rate_limited_until FROM daily_budget WHERE day = ?1",
                params![day],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(until.map(|u| u > Utc::now().timestamp()).unwrap_or(false))
    }

    /// Full snapshot of today's counters, for logging.
    pub fn snapshot(&self) -> Result<BudgetSnapshot> {
        let day = self.ensure_today()?;
        let snap = self.db.conn().query_row(
            "SELECT day, comments_used, comments_max, posts_used, posts_max,
                    replies_used, replies_max, upvotes_used, upvotes_max,
                    follows_used, follows_max
             FROM daily_budget WHERE day = ?1",
            params![day],
            |row| {
                Ok(BudgetSnapshot {
                    day: row.get(0)?,
                    comments_used: row.get(1)?,
                    comments_max: row.get(2)?,
                    posts_used: row.get(3)?,
                    posts_max: row.get(4)?,
                    replies_used: row.get(5)?,
                    replies_max: row.get(6)?,
                    upvotes_used: row.get(7)?,
                    upvotes_max: row.get(8)?,
                    follows_used: row.get(9)?,
                    follows_max: row.get(10)?,
                })
            },
        )?;
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(limits: BudgetLimits) -> BudgetLedger {
        BudgetLedger::with_limits(Db::open_in_memory().unwrap(), limits)
    }

    #[test]
    fn test_can_comment_until_max() {
        let ledger = ledger_with(BudgetLimits {
            comments_max: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(ledger.can_comment().unwrap());
            ledger.record_comment().unwrap();
        }
        assert!(!ledger.can_comment().unwrap());
        // stays false; further records error rather than overspending
        assert!(ledger.record_comment().is_err());
        assert!(!ledger.can_comment().unwrap());
    }

    #[test]
    fn test_full_daily_budget_exhaustion() {
        let ledger = ledger_with(BudgetLimits::default());
        for _ in 0..400 {
            ledger.record_comment().unwrap();
        }
        assert!(!ledger.can_comment().unwrap());
    }

    #[test]
    fn test_counters_independent() {
        let ledger = ledger_with(BudgetLimits {
            posts_max: 1,
            ..Default::default()
        });
        ledger.record_post().unwrap();
        assert!(!ledger.can_post().unwrap());
        assert!(ledger.can_comment().unwrap());
        assert!(ledger.can_upvote().unwrap());
        assert!(ledger.can_follow().unwrap());
    }

    #[test]
    fn test_time_since_last_comment() {
        let ledger = ledger_with(BudgetLimits::default());
        assert!(ledger.time_since_last_comment().unwrap().is_none());
        ledger.record_comment().unwrap();
        let since = ledger.time_since_last_comment().unwrap().unwrap();
        assert!(since < Duration::from_secs(5));
    }

    #[test]
    fn test_upvote_has_no_spacing_timestamp() {
        let ledger = ledger_with(BudgetLimits::default());
        ledger.record_upvote().unwrap();
        assert!(ledger.time_since_last(ActionKind::Upvote).unwrap().is_none());
    }

    #[test]
    fn test_rate_limit_cooldown() {
        let ledger = ledger_with(BudgetLimits::default());
        assert!(!ledger.rate_limited().unwrap());
        ledger
            .set_rate_limit("comment", Duration::from_secs(600))
            .unwrap();
        assert!(ledger.rate_limited().unwrap());
    }

    #[test]
    fn test_expired_rate_limit_clears() {
        let ledger = ledger_with(BudgetLimits::default());
        ledger
            .set_rate_limit("comment", Duration::from_secs(0))
            .unwrap();
        assert!(!ledger.rate_limited().unwrap());
    }

    #[test]
    fn test_follow_budget_counts_to_daily_max() {
        let ledger = ledger_with(BudgetLimits {
            follows_max: 2,
            ..Default::default()
        });
        assert!(ledger.can_follow().unwrap());
        ledger.record_follow().unwrap();
        ledger.record_follow().unwrap();
        assert!(!ledger.can_follow().unwrap());
        assert!(ledger.record_follow().is_err());
        assert_eq!(ledger.snapshot().unwrap().follows_used, 2);
    }

    #[test]
    fn test_snapshot_reflects_usage() {
        let ledger = ledger_with(BudgetLimits::default());
        ledger.record_comment().unwrap();
        ledger.record_upvote().unwrap();
        let snap = ledger.snapshot().unwrap();
        assert_eq!(snap.comments_used, 1);
        assert_eq!(snap.upvotes_used, 1);
        assert_eq!(snap.posts_used, 0);
    }
}
