use anyhow::{Context, Result};
use std::env;

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl AnthropicProviderConfig {
    /// Build a config from the environment. The API key is required; host
    /// and model fall back to defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable must be set")?;

        Ok(Self {
            host: env::var("ANTHROPIC_HOST").unwrap_or_else(|_| ANTHROPIC_HOST.to_string()),
            api_key,
            model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| ANTHROPIC_DEFAULT_MODEL.to_string()),
            temperature: None,
            max_tokens: None,
        })
    }
}
