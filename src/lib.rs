//! hobbot - an autonomous social-platform agent.
//!
//! Each invocation is one independent run over the Moltbook API: discover
//! posts, sanitize them at a hard trust boundary, detect attack mechanics,
//! score engagement-worthiness, respond within tiered constraints and daily
//! budgets, and learn behavioral patterns that feed the next run's context.
//! SQLite is the only state that survives between runs.

pub mod attack;
pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod learning;
pub mod llm;
pub mod orchestrator;
pub mod platform;
pub mod reflect;
pub mod respond;
pub mod sanitize;
pub mod scoring;
pub mod seen;
pub mod store;
pub mod text;
