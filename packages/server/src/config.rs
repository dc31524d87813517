use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Which Provider Gateway implementation to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmMode {
    /// Deterministic in-process provider, no network. Used for local dev and tests.
    Dev,
    /// Anthropic via rig.
    Anthropic,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub llm_mode: LlmMode,
    pub anthropic_api_key: Option<String>,
    pub default_mail_model: String,
    pub spell_correction: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let llm_mode = match env::var("LLM_MODE").as_deref() {
            Ok("anthropic") => LlmMode::Anthropic,
            _ => LlmMode::Dev,
        };

        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok();
        if llm_mode == LlmMode::Anthropic && anthropic_api_key.is_none() {
            anyhow::bail!("ANTHROPIC_API_KEY must be set when LLM_MODE=anthropic");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/engine.db?mode=rwc".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            llm_mode,
            anthropic_api_key,
            default_mail_model: env::var("MAIL_DEFAULT_MODEL")
                .unwrap_or_else(|_| "claude-3-5-sonnet".to_string()),
            spell_correction: env::var("SPELL_CORRECTION")
                .map(|v| v != "off")
                .unwrap_or(true),
        })
    }
}
