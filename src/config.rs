//! Configuration management

use anyhow::Result;
use std::path::PathBuf;

/// Agent configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform API base URL
    pub platform_base_url: String,

    /// Platform API key
    pub platform_api_key: Option<String>,

    /// LLM provider API key
    pub llm_api_key: Option<String>,

    /// LLM model identifier
    pub llm_model: String,

    /// SQLite database path
    pub db_path: PathBuf,

    /// Agent's own account name (whitelisted, used for self-filtering)
    pub agent_name: String,

    /// Active hours window, UTC (start inclusive, end exclusive)
    pub active_hours: (u32, u32),

    /// Dry run: mutating platform calls log only, budget still advances
    pub dry_run: bool,

    /// Soft ceiling on outbound requests per run
    pub max_requests_per_run: u32,

    /// Minimum spacing between consecutive comments/replies, seconds
    pub min_comment_spacing_secs: u64,

    /// Discovery fetch size per source
    pub discovery_limit: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let platform_base_url = std::env::var("HOBBOT_PLATFORM_URL")
            .unwrap_or_else(|_| "https://www.moltbook.com/api/v1".to_string());

        let platform_api_key = std::env::var("MOLTBOOK_API_KEY").ok();
        let llm_api_key = std::env::var("ANTHROPIC_API_KEY").ok();

        let llm_model = std::env::var("HOBBOT_LLM_MODEL")
            .unwrap_or_else(|_| "claude-3-5-haiku-20241022".to_string());

        let db_path = std::env::var("HOBBOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("hobbot")
                    .join("hobbot.db")
            });

        let agent_name =
            std::env::var("HOBBOT_AGENT_NAME").unwrap_or_else(|_| "hob".to_string());

        let active_start = std::env::var("HOBBOT_ACTIVE_START")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let active_end = std::env::var("HOBBOT_ACTIVE_END")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        let dry_run = std::env::var("HOBBOT_DRY_RUN")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_requests_per_run = std::env::var("HOBBOT_MAX_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(40);

        let min_comment_spacing_secs = std::env::var("HOBBOT_COMMENT_SPACING_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(45);

        let discovery_limit = std::env::var("HOBBOT_DISCOVERY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);

        Ok(Self {
            platform_base_url,
            platform_api_key,
            llm_api_key,
            llm_model,
            db_path,
            agent_name,
            active_hours: (active_start, active_end),
            dry_run,
            max_requests_per_run,
            min_comment_spacing_secs,
            discovery_limit,
        })
    }

    /// Whether the given UTC hour falls inside the active window.
    /// A wrapped window (e.g. 22..6) spans midnight.
    pub fn is_active_hour(&self, hour: u32) -> bool {
        let (start, end) = self.active_hours;
        if start == end {
            return true; // degenerate window means always active
        }
        if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_hours(start: u32, end: u32) -> Config {
        Config {
            platform_base_url: String::new(),
            platform_api_key: None,
            llm_api_key: None,
            llm_model: String::new(),
            db_path: PathBuf::new(),
            agent_name: "hob".into(),
            active_hours: (start, end),
            dry_run: true,
            max_requests_per_run: 40,
            min_comment_spacing_secs: 45,
            discovery_limit: 15,
        }
    }

    #[test]
    fn test_active_hours_simple_window() {
        let cfg = config_with_hours(9, 17);
        assert!(!cfg.is_active_hour(8));
        assert!(cfg.is_active_hour(9));
        assert!(cfg.is_active_hour(16));
        assert!(!cfg.is_active_hour(17));
    }

    #[test]
    fn test_active_hours_wrapped_window() {
        let cfg = config_with_hours(22, 6);
        assert!(cfg.is_active_hour(23));
        assert!(cfg.is_active_hour(3));
        assert!(!cfg.is_active_hour(12));
    }

    #[test]
    fn test_active_hours_degenerate_window_always_active() {
        let cfg = config_with_hours(0, 0);
        assert!(cfg.is_active_hour(12));
    }
}
