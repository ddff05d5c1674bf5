//! Platform API Client
//!
//! Moltbook HTTP client. Every mutating call surfaces rate limits as a
//! distinct error variant carrying the retry-after hint so the budget ledger
//! can record a cooldown. Retry policy: 5xx and network errors up to 3 times
//! with fixed backoff (5s/15s/30s); 4xx never retried; 401 with a suspension
//! hint is fatal; 429 surfaces immediately.

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::PlatformError;

const BACKOFF_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(5),
    Duration::from_secs(15),
    Duration::from_secs(30),
];

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Post author as the platform reports it. Raw identifiers in here never
/// propagate past the sanitization boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub post_count: Option<u32>,
    #[serde(default)]
    pub comment_count: Option<u32>,
    #[serde(default)]
    pub follower_count: Option<u32>,
}

/// A discovered post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub submolt: Option<String>,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub upvotes: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A comment in a thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A direct-message conversation summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub with_agent: Option<String>,
    #[serde(default)]
    pub unread_count: i64,
    #[serde(default)]
    pub last_message: Option<String>,
}

/// Messages within one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostList {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct CommentList {
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
struct ConversationList {
    #[serde(default)]
    conversations: Vec<Conversation>,
}

/// Moltbook API client.
#[derive(Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl PlatformClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(|s| s.to_string()),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            &config.platform_base_url,
            config.platform_api_key.as_deref(),
        )
    }

    // ---- discovery ----

    pub async fn fetch_new_posts(&self, limit: u32) -> Result<Vec<Post>, PlatformError> {
        let query = [("sort", "new".to_string()), ("limit", limit.to_string())];
        let list: PostList = self
            .request_retrying(Method::GET, "/posts", &query, None)
            .await?;
        Ok(list.posts)
    }

    pub async fn fetch_rising_posts(&self, limit: u32) -> Result<Vec<Post>, PlatformError> {
        let query = [("sort", "rising".to_string()), ("limit", limit.to_string())];
        let list: PostList = self
            .request_retrying(Method::GET, "/posts", &query, None)
            .await?;
        Ok(list.posts)
    }

    pub async fn search_posts(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Post>, PlatformError> {
        // reqwest handles the percent-encoding; dream-phase queries carry
        // arbitrary keyword text
        let query = [("q", query.to_string()), ("limit", limit.to_string())];
        let list: PostList = self
            .request_retrying(Method::GET, "/search", &query, None)
            .await?;
        Ok(list.posts)
    }

    pub async fn fetch_feed(&self, sort: &str, limit: u32) -> Result<Vec<Post>, PlatformError> {
        let query = [("sort", sort.to_string()), ("limit", limit.to_string())];
        let list: PostList = self
            .request_retrying(Method::GET, "/feed", &query, None)
            .await?;
        Ok(list.posts)
    }

    pub async fn fetch_post_comments(
        &self,
        post_id: &str,
    ) -> Result<Vec<Comment>, PlatformError> {
        let path = format!("/posts/{post_id}/comments");
        let list: CommentList = self.request_retrying(Method::GET, &path, &[], None).await?;
        Ok(list.comments)
    }

    // ---- mutations ----

    pub async fn post_comment(
        &self,
        post_id: &str,
        text: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment, PlatformError> {
        let path = format!("/posts/{post_id}/comments");
        let body = json!({ "content": text, "parent_id": parent_id });
        self.request_retrying(Method::POST, &path, &[], Some(body))
            .await
    }

    pub async fn create_post(
        &self,
        title: &str,
        text: &str,
        submolt: &str,
    ) -> Result<Post, PlatformError> {
        let body = json!({ "title": title, "content": text, "submolt": submolt });
        self.request_retrying(Method::POST, "/posts", &[], Some(body))
            .await
    }

    pub async fn upvote_post(&self, post_id: &str) -> Result<(), PlatformError> {
        let path = format!("/posts/{post_id}/upvote");
        let _: serde_json::Value = self.request_retrying(Method::POST, &path, &[], None).await?;
        Ok(())
    }

    pub async fn follow(&self, agent_name: &str) -> Result<(), PlatformError> {
        let path = format!("/agents/{agent_name}/follow");
        let _: serde_json::Value = self.request_retrying(Method::POST, &path, &[], None).await?;
        Ok(())
    }

    // ---- conversations ----

    pub async fn fetch_conversations(&self) -> Result<Vec<Conversation>, PlatformError> {
        let list: ConversationList = self
            .request_retrying(Method::GET, "/conversations", &[], None)
            .await?;
        Ok(list.conversations)
    }

    pub async fn fetch_conversation(
        &self,
        id: &str,
    ) -> Result<ConversationDetail, PlatformError> {
        let path = format!("/conversations/{id}");
        self.request_retrying(Method::GET, &path, &[], None).await
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        let path = format!("/conversations/{conversation_id}/messages");
        let body = json!({ "content": text });
        let _: serde_json::Value = self
            .request_retrying(Method::POST, &path, &[], Some(body))
            .await?;
        Ok(())
    }

    // ---- transport ----

    async fn request_retrying<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T, PlatformError> {
        let mut attempt = 0usize;
        loop {
            match self
                .request_once(method.clone(), path, query, body.as_ref())
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < BACKOFF_SCHEDULE.len() => {
                    let delay = BACKOFF_SCHEDULE[attempt];
                    warn!(
                        "Platform call {} {} failed (attempt {}): {} - retrying in {:?}",
                        method,
                        path,
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_once<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, PlatformError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Platform call: {} {}", method, path);

        let mut req = self.client.request(method, &url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let response = req.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(PlatformError::RateLimited {
                endpoint: path.to_string(),
                retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            return Err(PlatformError::Fatal(format!(
                "unauthorized (possible suspension): {text}"
            )));
        }

        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(PlatformError::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            if text.contains("suspended") {
                return Err(PlatformError::Fatal(format!("account suspended: {text}")));
            }
            return Err(PlatformError::BadRequest {
                status: status.as_u16(),
                body: text,
            });
        }

        let value = response.json::<T>().await?;
        Ok(value)
    }
}
