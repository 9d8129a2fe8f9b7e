//! Minimal runtime configuration: token, API URL, log file, Redis URL.
//! Loaded from environment variables BOT_TOKEN, TELEGRAM_API_URL, LOG_FILE, REDIS_URL.

use anyhow::{Context, Result};
use std::env;

const DEFAULT_LOG_FILE: &str = "logs/telebot.log";

/// Telegram connectivity plus where to log and which Redis to use.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub telegram_api_url: Option<String>,
    pub log_file: Option<String>,
    /// `None` runs on the in-memory Redis emulation.
    pub redis_url: Option<String>,
}

impl TelegramConfig {
    /// Reads the environment; binaries load `.env` first. BOT_TOKEN is required.
    pub fn from_env() -> Result<Self> {
        let bot_token = env::var("BOT_TOKEN").map_err(|_| anyhow::anyhow!("BOT_TOKEN not set"))?;
        let telegram_api_url = env::var("TELEGRAM_API_URL")
            .or_else(|_| env::var("TELOXIDE_API_URL"))
            .ok();
        let log_file = env::var("LOG_FILE").ok();
        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        Ok(Self {
            bot_token,
            telegram_api_url,
            log_file,
            redis_url,
        })
    }

    /// Uses the given token; everything else is unset.
    pub fn with_token(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            telegram_api_url: None,
            log_file: None,
            redis_url: None,
        }
    }

    pub fn log_file_path(&self) -> &str {
        self.log_file.as_deref().unwrap_or(DEFAULT_LOG_FILE)
    }

    /// teloxide Bot pointed at the configured API server.
    pub fn build_bot(&self) -> Result<teloxide::Bot> {
        let bot = teloxide::Bot::new(&self.bot_token);
        match &self.telegram_api_url {
            Some(url) => {
                let url = reqwest::Url::parse(url).with_context(|| format!("invalid TELEGRAM_API_URL {:?}", url))?;
                Ok(bot.set_api_url(url))
            }
            None => Ok(bot),
        }
    }
}
