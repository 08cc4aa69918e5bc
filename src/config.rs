use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub database_path: String,

    // Translation engine (OpenAI-compatible chat completions endpoint)
    pub engine_api_key: String,
    pub engine_api_url: String,
    pub engine_model: String,
    pub engine_timeout_secs: u64,
    pub engine_max_tokens: u32,

    // Batching
    pub batch_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            // Storage
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/localehub.db".to_string()),

            // Translation engine
            engine_api_key: std::env::var("ENGINE_API_KEY")
                .context("ENGINE_API_KEY not set")?,
            engine_api_url: std::env::var("ENGINE_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            engine_model: std::env::var("ENGINE_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            engine_timeout_secs: std::env::var("ENGINE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            engine_max_tokens: std::env::var("ENGINE_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),

            // Batching
            batch_size: std::env::var("TRANSLATE_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
        })
    }
}
