//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Which text-generation provider the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Anthropic,
    Mock,
}

/// Which broadcaster backs the real-time layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcasterKind {
    /// In-process channel fan-out (the default)
    Channel,
    /// Drops every broadcast; used when no session layer is attached
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection URL (PostgreSQL)
    pub database_url: String,

    /// Text-generation gateway
    pub llm_provider: LlmProvider,
    pub anthropic_api_key: String,
    pub llm_model: String,

    /// Real-time layer
    pub broadcaster: BroadcasterKind,

    /// Runtime configuration
    pub log_level: String,
    pub rust_log: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let llm_provider = match env::var("LLM_PROVIDER").as_deref() {
            Ok("mock") => LlmProvider::Mock,
            _ => LlmProvider::Anthropic,
        };

        let anthropic_api_key = match llm_provider {
            LlmProvider::Anthropic => env::var("ANTHROPIC_API_KEY")
                .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY is required"))?,
            LlmProvider::Mock => env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
        };

        let broadcaster = match env::var("BROADCASTER").as_deref() {
            Ok("null") => BroadcasterKind::Null,
            _ => BroadcasterKind::Channel,
        };

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,

            llm_provider,
            anthropic_api_key,
            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string()),

            broadcaster,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "accord=debug".to_string()),
        };

        Ok(config)
    }
}
