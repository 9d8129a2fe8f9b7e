//! Per-user message rate counters: throttling after a burst, soft ban after repeated violations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use telebot_core::User;
use telebot_stores::{KeyIntegerStore, RedisInterface};

use crate::error::ComponentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiSpamStatus {
    Clear,
    Throttling,
    SoftBan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AntiSpamConfig {
    pub throttle_after_messages: i64,
    pub throttle_duration: Duration,
    pub soft_ban_after_throttle_violations: i64,
    pub soft_ban_duration: Duration,
}

#[async_trait]
pub trait AntiSpamInterface: Send + Sync {
    async fn status(&self, user: &User) -> ComponentResult<AntiSpamStatus>;

    /// Present only for implementations that can throttle.
    fn config(&self) -> Option<&AntiSpamConfig> {
        None
    }
}

pub struct DisabledAntiSpam;

#[async_trait]
impl AntiSpamInterface for DisabledAntiSpam {
    async fn status(&self, _user: &User) -> ComponentResult<AntiSpamStatus> {
        Ok(AntiSpamStatus::Clear)
    }
}

/// Counts messages per user within the throttle window; users who keep hitting the limit are
/// soft-banned (silently ignored) for a while.
pub struct AntiSpam {
    config: AntiSpamConfig,
    recent_messages_counter: KeyIntegerStore,
    recent_throttle_violations_counter: KeyIntegerStore,
}

impl AntiSpam {
    pub fn new(redis: Arc<dyn RedisInterface>, bot_prefix: &str, config: AntiSpamConfig) -> ComponentResult<Self> {
        Ok(Self {
            recent_messages_counter: KeyIntegerStore::new("recent-msg-counter-for", bot_prefix, redis.clone())?
                .with_expiration(Some(config.throttle_duration)),
            recent_throttle_violations_counter: KeyIntegerStore::new(
                "recent-throttle-violations-for",
                bot_prefix,
                redis,
            )?
            .with_expiration(Some(config.soft_ban_duration)),
            config,
        })
    }
}

#[async_trait]
impl AntiSpamInterface for AntiSpam {
    async fn status(&self, user: &User) -> ComponentResult<AntiSpamStatus> {
        let violations = self.recent_throttle_violations_counter.load(user.id).await?;
        if violations.is_some_and(|v| v >= self.config.soft_ban_after_throttle_violations) {
            return Ok(AntiSpamStatus::SoftBan);
        }
        let message_count = self.recent_messages_counter.increment(user.id, true).await?;
        if message_count > self.config.throttle_after_messages {
            self.recent_throttle_violations_counter.increment(user.id, true).await?;
            return Ok(AntiSpamStatus::Throttling);
        }
        Ok(AntiSpamStatus::Clear)
    }

    fn config(&self) -> Option<&AntiSpamConfig> {
        Some(&self.config)
    }
}
