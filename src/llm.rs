//! LLM Provider Client
//!
//! Anthropic messages API client plus the defensive JSON recovery layer every
//! consumer of model output goes through. Model output is untrusted: it may be
//! empty, non-JSON when JSON was asked for, or truncated mid-object. All of
//! those degrade to a tagged failure value, never an uncaught error.

use anyhow::Result;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// LLM client
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: Option<String>,
    model: String,
}

/// One completed generation with usage stats.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl LlmReply {
    /// Approximate cost in USD, haiku-class pricing per million tokens.
    pub fn estimated_cost(&self) -> f64 {
        (self.input_tokens as f64 / 1_000_000.0) * 0.25
            + (self.output_tokens as f64 / 1_000_000.0) * 1.25
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    r#type: String,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

impl LlmClient {
    pub fn new(api_key: Option<&str>, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.llm_api_key.as_deref(), &config.llm_model)
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a completion. An empty content array from the provider yields
    /// an empty string, not an error.
    pub async fn generate(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: usize,
    ) -> Result<LlmReply> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set - LLM unavailable"))?;

        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens,
            temperature,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: user.to_string(),
            }],
        };

        debug!(
            "Calling LLM: model={}, prompt_len={}",
            self.model,
            user.len()
        );

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, text);
        }

        let result: MessageResponse = response.json().await?;

        let text = result
            .content
            .into_iter()
            .filter_map(|b| if b.r#type == "text" { b.text } else { None })
            .collect::<Vec<_>>()
            .join("\n");

        let reply = LlmReply {
            text,
            input_tokens: result.usage.input_tokens,
            output_tokens: result.usage.output_tokens,
        };

        info!(
            "LLM reply: model={}, in={}, out={}",
            self.model, reply.input_tokens, reply.output_tokens
        );

        Ok(reply)
    }
}

/// Result of a lenient JSON decode. Consumers must handle both variants -
/// there is no implicit field access on raw model output.
#[derive(Debug, Clone)]
pub enum JsonParse<T> {
    Parsed(T),
    Failed { raw: String },
}

impl<T> JsonParse<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            JsonParse::Parsed(v) => Some(v),
            JsonParse::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JsonParse::Failed { .. })
    }
}

/// Strip markdown code fences from model output.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Locate the outermost balanced `{...}` block, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Locate the outermost balanced `[...]` block, if any.
pub fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Repair truncated JSON: cut back to the last complete value, drop a
/// dangling trailing key, then close any unbalanced brackets and braces.
pub fn repair_truncated_json(text: &str) -> String {
    let mut s = text.trim().to_string();

    // Cut an unterminated string literal.
    let mut in_string = false;
    let mut escaped = false;
    let mut last_safe = 0;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
        if !in_string {
            last_safe = i + c.len_utf8();
        }
    }
    if in_string {
        s.truncate(last_safe.saturating_sub(1));
    }

    // Drop a dangling trailing key or partial value: trim back to the last
    // comma or opening bracket if the tail is not a complete value.
    while matches!(s.trim_end().chars().last(), Some(',') | Some(':')) {
        s = s.trim_end().to_string();
        s.pop();
        if s.trim_end().ends_with('"') {
            // remove the orphaned key string
            if let Some(open) = s.trim_end().strip_suffix('"').and_then(|r| r.rfind('"')) {
                s.truncate(open);
            }
        }
        // a trailing comma after the removal is also dropped
        let trimmed = s.trim_end().to_string();
        s = trimmed;
        if s.ends_with(',') {
            s.pop();
        }
    }

    // Balance brackets.
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }
    while let Some(close) = stack.pop() {
        s.push(close);
    }
    s
}

/// Lenient decode pipeline for model output: direct parse, then fence strip,
/// then outermost-object extraction, then truncation repair. Total failure
/// returns the raw text in the Failed variant so callers can log it.
pub fn parse_json_lenient<T: DeserializeOwned>(text: &str) -> JsonParse<T> {
    if let Ok(v) = serde_json::from_str::<T>(text) {
        return JsonParse::Parsed(v);
    }

    let stripped = strip_fences(text);
    if let Ok(v) = serde_json::from_str::<T>(stripped) {
        return JsonParse::Parsed(v);
    }

    if let Some(obj) = extract_json_object(stripped) {
        if let Ok(v) = serde_json::from_str::<T>(obj) {
            return JsonParse::Parsed(v);
        }
        let repaired = repair_truncated_json(obj);
        if let Ok(v) = serde_json::from_str::<T>(&repaired) {
            return JsonParse::Parsed(v);
        }
    }

    // Truncated output may have lost the closing brace entirely.
    let repaired = repair_truncated_json(stripped);
    if let Ok(v) = serde_json::from_str::<T>(&repaired) {
        return JsonParse::Parsed(v);
    }

    warn!("LLM output failed lenient JSON parse ({} chars)", text.len());
    JsonParse::Failed {
        raw: text.to_string(),
    }
}

/// Lenient decode for JSON arrays of model output.
pub fn parse_json_array_lenient<T: DeserializeOwned>(text: &str) -> Vec<T> {
    if let Ok(v) = serde_json::from_str::<Vec<T>>(text) {
        return v;
    }
    let stripped = strip_fences(text);
    if let Ok(v) = serde_json::from_str::<Vec<T>>(stripped) {
        return v;
    }
    if let Some(arr) = extract_json_array(stripped) {
        if let Ok(v) = serde_json::from_str::<Vec<T>>(arr) {
            return v;
        }
        let repaired = repair_truncated_json(arr);
        if let Ok(v) = serde_json::from_str::<Vec<T>>(&repaired) {
            return v;
        }
    }
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        #[serde(default)]
        score: i64,
    }

    #[test]
    fn test_direct_parse() {
        let parsed: JsonParse<Sample> = parse_json_lenient(r#"{"name":"a","score":5}"#);
        assert_eq!(
            parsed.ok().unwrap(),
            Sample {
                name: "a".into(),
                score: 5
            }
        );
    }

    #[test]
    fn test_fenced_parse() {
        let text = "```json\n{\"name\":\"b\",\"score\":1}\n```";
        let parsed: JsonParse<Sample> = parse_json_lenient(text);
        assert_eq!(parsed.ok().unwrap().name, "b");
    }

    #[test]
    fn test_embedded_object_parse() {
        let text = "Sure! Here is the analysis: {\"name\":\"c\",\"score\":2} hope that helps";
        let parsed: JsonParse<Sample> = parse_json_lenient(text);
        assert_eq!(parsed.ok().unwrap().name, "c");
    }

    #[test]
    fn test_truncated_object_repaired() {
        // cut mid-value, dangling key
        let text = r#"{"name":"d","score":3,"extra":"#;
        let parsed: JsonParse<Sample> = parse_json_lenient(text);
        let v = parsed.ok().unwrap();
        assert_eq!(v.name, "d");
        assert_eq!(v.score, 3);
    }

    #[test]
    fn test_truncated_string_repaired() {
        let text = r#"{"name":"e","score":7,"note":"this got cut o"#;
        let parsed: JsonParse<Sample> = parse_json_lenient(text);
        let v = parsed.ok().unwrap();
        assert_eq!(v.name, "e");
    }

    #[test]
    fn test_garbage_yields_failed_with_raw() {
        let parsed: JsonParse<Sample> = parse_json_lenient("no json at all here");
        match parsed {
            JsonParse::Failed { raw } => assert!(raw.contains("no json")),
            JsonParse::Parsed(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_array_lenient() {
        let text = "result:\n```json\n[{\"name\":\"x\"},{\"name\":\"y\"}]\n```";
        let items: Vec<Sample> = parse_json_array_lenient(text);
        assert_eq!(items.len(), 2);
        let none: Vec<Sample> = parse_json_array_lenient("nothing");
        assert!(none.is_empty());
    }

    #[test]
    fn test_extract_json_object_respects_strings() {
        let text = r#"noise {"a":"brace } inside","b":1} tail"#;
        let obj = extract_json_object(text).unwrap();
        assert!(obj.ends_with("1}"));
        assert!(serde_json::from_str::<serde_json::Value>(obj).is_ok());
    }
}
