//! Run Orchestrator
//!
//! One invocation is one run: gate on active hours, dream if due, walk the
//! discovery sources in effectiveness order, push each unseen post through
//! sanitize -> attack -> score -> act, then the reply, reflect, and digest
//! phases. Processing is strictly sequential. A request counter owned by the
//! run enforces a soft ceiling between posts, never mid-write.
//!
//! Error handling follows one taxonomy: transient failures abort the current
//! post, a rate limit records a cooldown and skips that action type for the
//! rest of the run, fatal errors abort the run, telemetry write failures are
//! logged and swallowed, budget and seen-store write failures propagate.

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use rusqlite::params;
use tracing::{debug, info, warn};

use crate::attack::{primary_attack, AttackAnalysis, AttackDetector, CommentLog, ThreadComment};
use crate::budget::{ActionKind, BudgetLedger};
use crate::config::Config;
use crate::context::CycleContext;
use crate::error::PlatformError;
use crate::learning::digest::DigestBuilder;
use crate::learning::dream::DreamRunner;
use crate::learning::extract::PatternExtractor;
use crate::learning::patterns::PatternStore;
use crate::learning::notable;
use crate::llm::LlmClient;
use crate::platform::{PlatformClient, Post};
use crate::reflect::{Engagement, OutcomeTracker};
use crate::respond::ResponseGenerator;
use crate::sanitize::{SanitizedContent, Sanitizer};
use crate::scoring::{is_comment_worthy, is_upvote_worthy, score, AuthorContext, Scored};
use crate::seen::{Decision, SeenStore};
use crate::store::Db;
use crate::text::display_name;

const DISCOVERY_SOURCES: [&str; 2] = ["new", "rising"];
const MAX_UNREAD_CONVERSATIONS: usize = 3;
const MAX_SPACING_WAIT_SECS: u64 = 120;

/// Soft ceiling on outbound requests, owned by one run and reset with it.
#[derive(Debug)]
pub struct RequestCounter {
    used: u32,
    ceiling: u32,
}

impl RequestCounter {
    pub fn new(ceiling: u32) -> Self {
        Self { used: 0, ceiling }
    }

    pub fn note(&mut self, requests: u32) {
        self.used = self.used.saturating_add(requests);
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.ceiling
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}

/// What the pipeline decided for one post, before any side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Catalog,
    Comment,
    Upvote,
    Skip,
}

/// Decide the action from the score and attack verdict alone.
pub fn choose_action(scored: &Scored, attack_detected: bool) -> PlannedAction {
    if attack_detected || scored.disqualified_by.is_some() {
        return PlannedAction::Catalog;
    }
    if is_comment_worthy(scored.score) {
        return PlannedAction::Comment;
    }
    if is_upvote_worthy(scored.score) {
        return PlannedAction::Upvote;
    }
    PlannedAction::Skip
}

/// How much longer to wait before the next comment, if anything.
pub fn spacing_wait(
    elapsed: Option<std::time::Duration>,
    min_spacing_secs: u64,
) -> Option<std::time::Duration> {
    let elapsed = elapsed?;
    let min = std::time::Duration::from_secs(min_spacing_secs);
    if elapsed >= min {
        None
    } else {
        Some(min - elapsed)
    }
}

/// How a platform error redirects control flow.
#[derive(Debug, PartialEq, Eq)]
enum ErrorFlow {
    SkipPost,
    SkipActionType,
    AbortRun,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub posts_processed: u32,
    pub comments_made: u32,
    pub upvotes_made: u32,
    pub attacks_detected: u32,
    pub patterns_observed: u32,
    pub requests_used: u32,
    pub dream_ran: bool,
    pub skipped_inactive: bool,
    pub dry_run: bool,
}

pub struct Orchestrator {
    config: Config,
    db: Db,
    platform: PlatformClient,
    budget: BudgetLedger,
    seen: SeenStore,
    patterns: PatternStore,
    digest: DigestBuilder,
    dream: DreamRunner,
    tracker: OutcomeTracker,
    sanitizer: Sanitizer,
    responder: ResponseGenerator,
    extractor: PatternExtractor,
    detector: AttackDetector,
    comment_log: CommentLog,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self> {
        let db = Db::open(&config.db_path)?;
        Ok(Self::with_db(config, db))
    }

    pub fn with_db(config: Config, db: Db) -> Self {
        let platform = PlatformClient::from_config(&config);
        let llm = LlmClient::from_config(&config);
        Self {
            budget: BudgetLedger::new(db.clone()),
            seen: SeenStore::new(db.clone()),
            patterns: PatternStore::new(db.clone()),
            digest: DigestBuilder::new(db.clone(), llm.clone()),
            dream: DreamRunner::new(db.clone(), llm.clone(), platform.clone()),
            tracker: OutcomeTracker::new(db.clone(), platform.clone(), &config.agent_name),
            sanitizer: Sanitizer::new(llm.clone()),
            responder: ResponseGenerator::new(llm.clone()),
            extractor: PatternExtractor::new(llm),
            detector: AttackDetector::new([config.agent_name.clone()]),
            comment_log: CommentLog::new(db.clone()),
            platform,
            config,
            db,
        }
    }

    /// Execute one full run.
    pub async fn run(&self) -> Result<RunSummary> {
        let started_at = Utc::now().timestamp();
        let mut summary = RunSummary {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        let hour = Utc::now().hour();
        if !self.config.is_active_hour(hour) {
            info!("Outside active hours (utc hour {}), run skipped", hour);
            summary.skipped_inactive = true;
            return Ok(summary);
        }

        let mut counter = RequestCounter::new(self.config.max_requests_per_run);

        if self.dream.due()? {
            match self.dream.run(&self.patterns).await {
                Ok(dream) => {
                    summary.dream_ran = true;
                    counter.note(dream.validated as u32 + 1);
                }
                Err(e) => warn!("Dream run failed: {}", e),
            }
        }

        let snapshot = self.budget.snapshot()?;
        info!(
            "Budget {}: comments {}/{}, posts {}/{}, upvotes {}/{}",
            snapshot.day,
            snapshot.comments_used,
            snapshot.comments_max,
            snapshot.posts_used,
            snapshot.posts_max,
            snapshot.upvotes_used,
            snapshot.upvotes_max
        );

        let ctx = CycleContext::load(&self.db)?;
        let mut comments_blocked = self.budget.rate_limited()?;
        if comments_blocked {
            info!("Rate-limit cooldown active, mutating actions suppressed");
        }

        // discovery, best-performing source first
        'sources: for source in ctx.ordered_sources(&DISCOVERY_SOURCES) {
            if counter.exhausted() {
                break;
            }
            let posts = match self.fetch_source(source, &mut counter).await {
                Ok(posts) => posts,
                Err(e) => {
                    warn!("Discovery via {} failed: {}", source, e);
                    continue;
                }
            };
            info!("Discovered {} posts via {}", posts.len(), source);

            for post in posts {
                if counter.exhausted() {
                    info!("Request ceiling reached ({} used)", counter.used());
                    break 'sources;
                }
                if self.seen.is_seen(&post.id)? {
                    continue;
                }
                match self
                    .process_post(&post, source, &ctx, &mut counter, &mut comments_blocked)
                    .await
                {
                    Ok(outcome) => {
                        summary.posts_processed += 1;
                        summary.comments_made += outcome.commented as u32;
                        summary.upvotes_made += outcome.upvoted as u32;
                        summary.attacks_detected += outcome.attack as u32;
                        summary.patterns_observed += outcome.patterns_observed;
                    }
                    Err(RunAbort::Post(e)) => {
                        warn!("Post {} aborted: {}", post.id, e);
                    }
                    Err(RunAbort::Run(e)) => {
                        warn!("Run aborted: {}", e);
                        self.write_run_log(started_at, &summary, &counter)?;
                        return Err(e);
                    }
                }
            }
        }

        self.reply_phase(&mut counter).await;
        if let Err(e) = self.tracker.poll_pending().await {
            warn!("Reflect phase failed: {}", e);
        }
        if let Err(e) = self.tracker.check_anomalies() {
            warn!("Anomaly check failed: {}", e);
        }
        if self.digest.needs_rebuild(&self.patterns)? {
            if let Err(e) = self.digest.rebuild(&self.patterns).await {
                warn!("Digest rebuild failed: {}", e);
            } else {
                counter.note(1);
            }
        }

        summary.requests_used = counter.used();
        self.write_run_log(started_at, &summary, &counter)?;
        info!(
            "Run done: {} posts, {} comments, {} upvotes, {} attacks, {} requests{}",
            summary.posts_processed,
            summary.comments_made,
            summary.upvotes_made,
            summary.attacks_detected,
            summary.requests_used,
            if summary.dry_run { " (dry run)" } else { "" }
        );
        Ok(summary)
    }

    async fn fetch_source(
        &self,
        source: &str,
        counter: &mut RequestCounter,
    ) -> Result<Vec<Post>, PlatformError> {
        counter.note(1);
        match source {
            "rising" => self.platform.fetch_rising_posts(self.config.discovery_limit).await,
            _ => self.platform.fetch_new_posts(self.config.discovery_limit).await,
        }
    }

    async fn process_post(
        &self,
        post: &Post,
        source: &str,
        ctx: &CycleContext,
        counter: &mut RequestCounter,
        comments_blocked: &mut bool,
    ) -> Result<PostOutcome, RunAbort> {
        let mut outcome = PostOutcome::default();

        // Sanitization is the one LLM call every post pays for. A transient
        // failure leaves the post unmarked so the next run retries it.
        counter.note(1);
        let sanitized = self
            .sanitizer
            .sanitize(post)
            .await
            .map_err(RunAbort::Post)?;

        let raw_text = format!("{}\n\n{}", post.title, post.content);
        let author_display = display_name(
            post.author.name.as_deref(),
            post.author.username.as_deref(),
            post.author.id.as_deref(),
        );
        let mut analyses = self.detector.analyze(&raw_text, &author_display);
        if let Some(ring) = self.analyze_busy_thread(post, counter).await {
            analyses.push(ring);
        }
        let attack = primary_attack(&analyses).cloned();

        let author_ctx = AuthorContext {
            thread_depth: 0,
            post_age_minutes: post_age_minutes(post.created_at.as_deref()),
        };
        let scored = score(&sanitized, Some(ctx), Some(&author_ctx));
        debug!(
            "Post {} scored {} ({} signals){}",
            post.id,
            scored.score,
            scored.signals.len(),
            attack
                .as_ref()
                .map(|a| format!(", attack {}", a.attack_type.as_str()))
                .unwrap_or_default()
        );

        let attack_detected = attack.is_some() || sanitized.threat.level >= 2;
        let attack_name = attack
            .as_ref()
            .map(|a| a.attack_type.as_str().to_string())
            .or_else(|| {
                (sanitized.threat.level >= 2).then(|| {
                    sanitized
                        .threat
                        .attack_geometry
                        .clone()
                        .unwrap_or_else(|| "threat_level".to_string())
                })
            });

        let action = choose_action(&scored, attack_detected);
        let decision = match action {
            PlannedAction::Catalog => {
                outcome.attack = attack_detected;
                Decision::Cataloged
            }
            PlannedAction::Comment => {
                match self
                    .try_comment(post, &sanitized, scored.score, counter, comments_blocked)
                    .await?
                {
                    true => {
                        outcome.commented = true;
                        Decision::Commented
                    }
                    false => Decision::Skipped,
                }
            }
            PlannedAction::Upvote => match self.try_upvote(post, counter).await? {
                true => {
                    outcome.upvoted = true;
                    Decision::Upvoted
                }
                false => Decision::Skipped,
            },
            PlannedAction::Skip => Decision::Skipped,
        };

        // Seen-store writes are the dedup backbone; failures propagate and
        // end the run rather than risking a reprocessing loop.
        self.seen
            .mark(
                &post.id,
                scored.score as i64,
                decision,
                attack_name.as_deref(),
                sanitized.submolt.as_deref(),
                Some(source),
            )
            .map_err(RunAbort::Run)?;

        if notable(&sanitized, scored.score, outcome.commented, attack_detected) {
            counter.note(1);
            match self
                .extractor
                .extract(&sanitized, scored.score, attack_name.as_deref())
                .await
            {
                Ok(candidates) => {
                    for candidate in &candidates {
                        match self.patterns.observe(candidate) {
                            Ok(_) => outcome.patterns_observed += 1,
                            Err(e) => warn!("Pattern observe failed: {}", e),
                        }
                    }
                }
                Err(e) => warn!("Pattern extraction failed: {}", e),
            }
        }

        Ok(outcome)
    }

    /// Coordinated-ring analysis for threads with enough comments to show
    /// ring structure. Fetch and log failures here are telemetry.
    async fn analyze_busy_thread(
        &self,
        post: &Post,
        counter: &mut RequestCounter,
    ) -> Option<AttackAnalysis> {
        if post.comment_count < 3 || counter.exhausted() {
            return None;
        }
        counter.note(1);
        let comments = match self.platform.fetch_post_comments(&post.id).await {
            Ok(comments) => comments,
            Err(e) => {
                debug!("Thread fetch for {} failed: {}", post.id, e);
                return None;
            }
        };
        let thread: Vec<ThreadComment> = comments
            .iter()
            .map(|c| {
                let author_display = display_name(
                    c.author.name.as_deref(),
                    c.author.username.as_deref(),
                    c.author.id.as_deref(),
                );
                ThreadComment {
                    author_hash: crate::text::hash_author(&author_display),
                    author_display,
                    content: c.content.clone(),
                }
            })
            .collect();
        // per-comment stateful checks run against history recorded so far,
        // then the comment joins the log itself
        let mut strongest: Option<AttackAnalysis> = None;
        for comment in &thread {
            match self.detector.analyze_with_history(
                &comment.content,
                &comment.author_hash,
                &post.id,
                &self.comment_log,
            ) {
                Ok(analyses) => {
                    if let Some(hit) = primary_attack(&analyses) {
                        if strongest
                            .as_ref()
                            .map(|s| hit.confidence > s.confidence)
                            .unwrap_or(true)
                        {
                            strongest = Some(hit.clone());
                        }
                    }
                }
                Err(e) => warn!("Stateful checks failed for {}: {}", post.id, e),
            }
            if let Err(e) = self
                .comment_log
                .record(&post.id, &comment.author_hash, &comment.content)
            {
                warn!("Comment log write failed for {}: {}", post.id, e);
            }
        }

        let ring = self.detector.analyze_thread(&thread);
        match (strongest, ring) {
            (Some(a), Some(b)) => Some(if b.confidence > a.confidence { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    /// Attempt to comment. Returns whether a comment was made; every early
    /// return that yields false downgrades the post to a skip.
    async fn try_comment(
        &self,
        post: &Post,
        sanitized: &SanitizedContent,
        score: u8,
        counter: &mut RequestCounter,
        comments_blocked: &mut bool,
    ) -> Result<bool, RunAbort> {
        if *comments_blocked {
            debug!("Comments blocked this run, skipping {}", post.id);
            return Ok(false);
        }
        if !self.budget.can_comment().map_err(RunAbort::Run)? {
            info!("Comment budget exhausted for today");
            *comments_blocked = true;
            return Ok(false);
        }

        let elapsed = self
            .budget
            .time_since_last_comment()
            .map_err(RunAbort::Run)?;
        if let Some(wait) = spacing_wait(elapsed, self.config.min_comment_spacing_secs) {
            if wait.as_secs() > MAX_SPACING_WAIT_SECS {
                debug!("Comment spacing needs {:?}, skipping {}", wait, post.id);
                return Ok(false);
            }
            tokio::time::sleep(wait).await;
        }

        let digest_body = self
            .digest
            .current()
            .ok()
            .flatten()
            .map(|d| d.body);
        counter.note(1);
        let text = match self
            .responder
            .generate(sanitized, score, digest_body.as_deref())
            .await
        {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(false),
            Err(e) => return Err(RunAbort::Post(e)),
        };

        if self.config.dry_run {
            info!("[dry run] would comment on {}: {}", post.id, text);
        } else {
            counter.note(1);
            match self.platform.post_comment(&post.id, &text, None).await {
                Ok(_) => {}
                Err(e) => {
                    return match self.route_platform_error(&e, ActionKind::Comment) {
                        ErrorFlow::SkipActionType => {
                            *comments_blocked = true;
                            Ok(false)
                        }
                        ErrorFlow::SkipPost => Ok(false),
                        ErrorFlow::AbortRun => Err(RunAbort::Run(e.into())),
                    };
                }
            }
        }

        self.budget.record_comment().map_err(RunAbort::Run)?;
        // outcome tracking is telemetry, never fails the post
        let engagement = Engagement {
            post_id: post.id.clone(),
            agent_hash: sanitized.author_hash.clone(),
            submolt: sanitized.submolt.clone(),
            shape: sanitized.shape.as_ref().map(|s| s.shape.clone()),
            metaphor_family: None,
            topic: sanitized.topics.first().cloned(),
            cost_usd: 0.0,
        };
        if let Err(e) = self.tracker.record_engagement(&engagement) {
            warn!("Outcome record failed for {}: {}", post.id, e);
        }
        info!("Commented on {} (score {})", post.id, score);
        Ok(true)
    }

    async fn try_upvote(
        &self,
        post: &Post,
        counter: &mut RequestCounter,
    ) -> Result<bool, RunAbort> {
        if !self.budget.can_upvote().map_err(RunAbort::Run)? {
            return Ok(false);
        }
        if self.config.dry_run {
            info!("[dry run] would upvote {}", post.id);
        } else {
            counter.note(1);
            if let Err(e) = self.platform.upvote_post(&post.id).await {
                return match self.route_platform_error(&e, ActionKind::Upvote) {
                    ErrorFlow::AbortRun => Err(RunAbort::Run(e.into())),
                    _ => Ok(false),
                };
            }
        }
        self.budget.record_upvote().map_err(RunAbort::Run)?;
        Ok(true)
    }

    /// Answer unread direct conversations, bounded per run.
    async fn reply_phase(&self, counter: &mut RequestCounter) {
        if counter.exhausted() {
            return;
        }
        counter.note(1);
        let conversations = match self.platform.fetch_conversations().await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Conversation fetch failed: {}", e);
                return;
            }
        };

        let unread: Vec<_> = conversations
            .into_iter()
            .filter(|c| c.unread_count > 0)
            .take(MAX_UNREAD_CONVERSATIONS)
            .collect();
        for conversation in unread {
            if counter.exhausted() {
                return;
            }
            match self.budget.can_reply() {
                Ok(true) => {}
                Ok(false) => {
                    info!("Reply budget exhausted for today");
                    return;
                }
                Err(e) => {
                    warn!("Reply budget check failed: {}", e);
                    return;
                }
            }
            counter.note(1);
            if let Err(e) = self.answer_conversation(&conversation.id, counter).await {
                warn!("Reply to conversation {} failed: {}", conversation.id, e);
            }
        }
    }

    async fn answer_conversation(
        &self,
        conversation_id: &str,
        counter: &mut RequestCounter,
    ) -> Result<()> {
        let detail = self.platform.fetch_conversation(conversation_id).await?;
        let Some(last) = detail.messages.last() else {
            return Ok(());
        };
        // messages are untrusted data like everything else
        if crate::sanitize::hard_reject_signals(&last.content).is_some() {
            info!(
                "Conversation {} message hard-rejected, not replying",
                conversation_id
            );
            return Ok(());
        }

        counter.note(1);
        let reply = self
            .responder
            .generate_direct_reply(&last.content)
            .await?;
        let Some(text) = reply else {
            return Ok(());
        };

        if self.config.dry_run {
            info!("[dry run] would reply in {}: {}", conversation_id, text);
        } else {
            counter.note(1);
            match self.platform.send_message(conversation_id, &text).await {
                Ok(()) => {}
                Err(PlatformError::RateLimited {
                    endpoint,
                    retry_after,
                }) => {
                    if let Err(e) = self.budget.set_rate_limit(&endpoint, retry_after) {
                        warn!("Rate-limit record failed: {}", e);
                    }
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.budget.record_reply()?;
        Ok(())
    }

    /// Map a platform error onto the run's control flow and record any
    /// cooldown it implies.
    fn route_platform_error(&self, error: &PlatformError, action: ActionKind) -> ErrorFlow {
        match error {
            PlatformError::RateLimited {
                endpoint,
                retry_after,
            } => {
                warn!(
                    "Rate limited on {} ({:?}), suppressing {} for this run",
                    endpoint,
                    retry_after,
                    action.as_str()
                );
                if let Err(e) = self.budget.set_rate_limit(endpoint, *retry_after) {
                    warn!("Rate-limit record failed: {}", e);
                }
                ErrorFlow::SkipActionType
            }
            PlatformError::Fatal(reason) => {
                warn!("Fatal platform error: {}", reason);
                ErrorFlow::AbortRun
            }
            PlatformError::Upstream { .. } | PlatformError::Network(_) => ErrorFlow::SkipPost,
            PlatformError::BadRequest { status, body } => {
                warn!("Bad request ({}): {}", status, body);
                ErrorFlow::SkipPost
            }
        }
    }

    fn write_run_log(
        &self,
        started_at: i64,
        summary: &RunSummary,
        counter: &RequestCounter,
    ) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO run_log
             (started_at, posts_processed, comments_made, attacks_detected, requests_used, dry_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                started_at,
                summary.posts_processed,
                summary.comments_made,
                summary.attacks_detected,
                counter.used(),
                summary.dry_run as i64
            ],
        )?;
        Ok(())
    }

}

/// Per-post tallies folded into the run summary.
#[derive(Debug, Default)]
struct PostOutcome {
    commented: bool,
    upvoted: bool,
    attack: bool,
    patterns_observed: u32,
}

/// Distinguishes a one-post abort from a whole-run abort.
enum RunAbort {
    Post(anyhow::Error),
    Run(anyhow::Error),
}

fn post_age_minutes(created_at: Option<&str>) -> i64 {
    created_at
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|created| {
            Utc::now()
                .signed_duration_since(created.with_timezone(&Utc))
                .num_minutes()
        })
        .unwrap_or(i64::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::{EngagementSignals, Intent, ThreatAssessment};
    use crate::scoring::Disqualifier;
    use std::time::Duration;

    #[test]
    fn test_request_counter_ceiling() {
        let mut counter = RequestCounter::new(3);
        assert!(!counter.exhausted());
        counter.note(2);
        assert!(!counter.exhausted());
        counter.note(1);
        assert!(counter.exhausted());
        assert_eq!(counter.used(), 3);
    }

    #[test]
    fn test_choose_action_bands() {
        let scored = |score: u8| Scored {
            score,
            signals: vec![],
            disqualified_by: None,
        };
        assert_eq!(choose_action(&scored(80), false), PlannedAction::Comment);
        assert_eq!(choose_action(&scored(60), false), PlannedAction::Comment);
        assert_eq!(choose_action(&scored(50), false), PlannedAction::Upvote);
        assert_eq!(choose_action(&scored(30), false), PlannedAction::Skip);
        // an attack catalogs no matter the score
        assert_eq!(choose_action(&scored(90), true), PlannedAction::Catalog);
    }

    #[test]
    fn test_disqualified_post_catalogs() {
        let scored = Scored {
            score: 0,
            signals: vec![],
            disqualified_by: Some(Disqualifier::PumpPattern),
        };
        assert_eq!(choose_action(&scored, false), PlannedAction::Catalog);
    }

    #[test]
    fn test_spacing_wait() {
        assert_eq!(spacing_wait(None, 45), None);
        assert_eq!(spacing_wait(Some(Duration::from_secs(60)), 45), None);
        assert_eq!(
            spacing_wait(Some(Duration::from_secs(10)), 45),
            Some(Duration::from_secs(35))
        );
    }

    #[test]
    fn test_post_age_unknown_counts_as_stale() {
        assert!(post_age_minutes(None) > 24 * 60);
        let recent = Utc::now().to_rfc3339();
        assert!(post_age_minutes(Some(&recent)) <= 1);
    }

    #[tokio::test]
    async fn test_run_skips_outside_active_hours() {
        let hour = Utc::now().hour();
        let config = crate::config::Config {
            platform_base_url: "https://example.test/api".into(),
            platform_api_key: None,
            llm_api_key: None,
            llm_model: "test-model".into(),
            db_path: std::path::PathBuf::new(),
            agent_name: "hob".into(),
            active_hours: ((hour + 1) % 24, (hour + 2) % 24),
            dry_run: true,
            max_requests_per_run: 10,
            min_comment_spacing_secs: 45,
            discovery_limit: 5,
        };
        let orchestrator = Orchestrator::with_db(config, Db::open_in_memory().unwrap());
        let summary = orchestrator.run().await.unwrap();
        assert!(summary.skipped_inactive);
        assert_eq!(summary.posts_processed, 0);
    }

    #[test]
    fn test_sanitized_flows_into_engagement_fields() {
        let sanitized = SanitizedContent {
            post_id: "p1".into(),
            author_hash: "abcd".into(),
            author_age_hours: None,
            author_post_count: None,
            author_comment_count: None,
            submolt: Some("tools".into()),
            summary: "s".into(),
            intent: Intent::Statement,
            topics: vec!["retries".into()],
            threat: ThreatAssessment::default(),
            signals: EngagementSignals::default(),
            shape: None,
            monster_type: None,
            parse_failed: false,
        };
        let engagement = Engagement {
            post_id: sanitized.post_id.clone(),
            agent_hash: sanitized.author_hash.clone(),
            submolt: sanitized.submolt.clone(),
            shape: sanitized.shape.as_ref().map(|s| s.shape.clone()),
            metaphor_family: None,
            topic: sanitized.topics.first().cloned(),
            cost_usd: 0.0,
        };
        assert_eq!(engagement.agent_hash, "abcd");
        assert_eq!(engagement.topic.as_deref(), Some("retries"));
    }
}
