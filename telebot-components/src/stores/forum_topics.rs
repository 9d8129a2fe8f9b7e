//! Forum topics in the admin chat, created once and remembered by thread id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use telebot_core::{BotApi, SendOptions};
use telebot_stores::{DisplayCodec, KeyDictStore, RedisInterface};
use tracing::{error, info, instrument, warn};

use crate::error::{ComponentError, ComponentResult};
use crate::stores::category::Category;
use crate::utils::fill_placeholders;

const TOPIC_CREATION_BACKOFF: Duration = Duration::from_secs(5);

/// Texts posted to the admin chat while initialization keeps failing. Both may contain `{}`
/// placeholders.
#[derive(Debug, Clone)]
pub struct ForumTopicStoreErrorMessages {
    /// Placeholder: retry interval in seconds.
    pub admin_chat_is_not_forum_error: String,
    /// Placeholders: topic name, error, retry interval in seconds.
    pub cant_create_topic: String,
}

impl Default for ForumTopicStoreErrorMessages {
    fn default() -> Self {
        Self {
            admin_chat_is_not_forum_error: "Admin chat is not a forum, please enable topics. Retrying in {} sec"
                .to_string(),
            cant_create_topic: "Can't create forum topic {}: {}. Retrying in {} sec".to_string(),
        }
    }
}

/// Telegram's fixed set of topic icon colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForumTopicIconColor {
    Blue,
    Yellow,
    Violet,
    Lime,
    Pink,
    Red,
}

impl ForumTopicIconColor {
    pub const ALL: [Self; 6] = [Self::Blue, Self::Yellow, Self::Violet, Self::Lime, Self::Pink, Self::Red];

    pub fn rgb(self) -> u32 {
        match self {
            Self::Blue => 7322096,
            Self::Yellow => 16766590,
            Self::Violet => 13338331,
            Self::Lime => 9367192,
            Self::Pink => 16749490,
            Self::Red => 16478047,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumTopicSpec {
    pub name: String,
    pub icon_color: Option<ForumTopicIconColor>,
    pub icon_custom_emoji_id: Option<String>,
    /// Stable key for the topic, not a message thread id. Defaults to `name`; set it to keep
    /// a topic when renaming it.
    pub id: Option<String>,
}

impl ForumTopicSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon_color: None,
            icon_custom_emoji_id: None,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_icon_color(mut self, color: ForumTopicIconColor) -> Self {
        self.icon_color = Some(color);
        self
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    pub fn from_category(category: &Category) -> Self {
        Self::new(category.name.clone())
    }
}

pub struct ForumTopicStore {
    topics: Vec<ForumTopicSpec>,
    admin_chat_id: i64,
    error_messages: ForumTopicStoreErrorMessages,
    initialization_retry_interval: Option<Duration>,
    message_thread_id_by_topic: KeyDictStore<i32>,
    bot: RwLock<Option<Arc<dyn BotApi>>>,
    is_initialized: AtomicBool,
    is_initialization_in_progress: AtomicBool,
}

impl ForumTopicStore {
    pub fn new(
        redis: Arc<dyn RedisInterface>,
        bot_prefix: &str,
        admin_chat_id: i64,
        topics: Vec<ForumTopicSpec>,
        error_messages: ForumTopicStoreErrorMessages,
        initialization_retry_interval: Option<Duration>,
    ) -> ComponentResult<Self> {
        Ok(Self {
            topics,
            admin_chat_id,
            error_messages,
            initialization_retry_interval,
            message_thread_id_by_topic: KeyDictStore::with_codec("forum-topic-id", bot_prefix, redis, DisplayCodec)?
                .with_expiration(None),
            bot: RwLock::new(None),
            is_initialized: AtomicBool::new(false),
            is_initialization_in_progress: AtomicBool::new(false),
        })
    }

    pub fn topics(&self) -> &[ForumTopicSpec] {
        &self.topics
    }

    pub fn admin_chat_id(&self) -> i64 {
        self.admin_chat_id
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::SeqCst)
    }

    /// Thread id of a known topic; `None` until [`Self::background_job`] has finished.
    pub async fn get_message_thread_id(&self, topic_id: &str) -> ComponentResult<Option<i32>> {
        if !self.topics.iter().any(|t| t.id() == topic_id) {
            let available: Vec<&str> = self.topics.iter().map(ForumTopicSpec::id).collect();
            return Err(ComponentError::Other(format!(
                "unknown topic id {:?}, available ids are: {:?}",
                topic_id, available
            )));
        }
        if !self.is_initialized() {
            warn!(topic_id, "Message thread id requested before the store is initialized");
            return Ok(None);
        }
        Ok(self
            .message_thread_id_by_topic
            .get_subkey(self.admin_chat_id, topic_id)
            .await?)
    }

    pub fn setup(&self, bot: Arc<dyn BotApi>) {
        *self.bot.write() = Some(bot);
    }

    /// Makes sure every topic exists in the admin chat, creating missing ones.
    ///
    /// Waits for the admin chat to become a forum and retries failed attempts after the
    /// retry interval, reporting to the admin chat. Without an interval it gives up instead.
    #[instrument(skip(self), fields(admin_chat_id = self.admin_chat_id))]
    pub async fn background_job(&self) -> ComponentResult<()> {
        let bot = self.bot.read().clone();
        let Some(bot) = bot else {
            error!("Unable to initialize: bot has not been set up");
            return Ok(());
        };
        if self.is_initialized() {
            warn!("Forum topic store is already initialized");
            return Ok(());
        }
        if self.is_initialization_in_progress.swap(true, Ordering::SeqCst) {
            warn!("Another initialization is already in progress");
            return Ok(());
        }
        let result = self.initialize(bot.as_ref()).await;
        self.is_initialization_in_progress.store(false, Ordering::SeqCst);
        result
    }

    async fn initialize(&self, bot: &dyn BotApi) -> ComponentResult<()> {
        info!("Setting up forum topic store");
        loop {
            let admin_chat = bot.get_chat(self.admin_chat_id).await?;
            if admin_chat.is_forum {
                info!("Admin chat is a forum, continuing initialization");
                break;
            }
            warn!("Admin chat is not a forum");
            let Some(interval) = self.initialization_retry_interval else {
                info!("Aborting");
                return Ok(());
            };
            let text = fill_placeholders(
                &self.error_messages.admin_chat_is_not_forum_error,
                &[&interval.as_secs_f64()],
            );
            bot.send_message(self.admin_chat_id, &text, SendOptions::new()).await?;
            info!(retry_in_sec = interval.as_secs_f64(), "Will try again");
            tokio::time::sleep(interval).await;
        }

        loop {
            let mut current_topic = String::new();
            match self.sync_topics(bot, &mut current_topic).await {
                Ok(()) => break,
                Err(e) => {
                    error!(topic = %current_topic, error = %e, "Unexpected error creating forum topics");
                    let Some(interval) = self.initialization_retry_interval else {
                        info!("Aborting");
                        return Ok(());
                    };
                    let text = fill_placeholders(
                        &self.error_messages.cant_create_topic,
                        &[&current_topic, &e, &interval.as_secs_f64()],
                    );
                    bot.send_message(self.admin_chat_id, &text, SendOptions::new()).await?;
                    tokio::time::sleep(interval).await;
                }
            }
        }

        self.is_initialized.store(true, Ordering::SeqCst);
        info!("Forum topic store set up");
        Ok(())
    }

    async fn sync_topics(&self, bot: &dyn BotApi, current_topic: &mut String) -> ComponentResult<()> {
        for (spec, default_color) in self.topics.iter().zip(ForumTopicIconColor::ALL.iter().cycle()) {
            current_topic.clone_from(&spec.name);
            let existing = self
                .message_thread_id_by_topic
                .get_subkey(self.admin_chat_id, spec.id())
                .await?;
            if let Some(thread_id) = existing {
                info!(topic = %spec.name, thread_id, "Found saved message thread id, syncing");
                let synced = match bot
                    .edit_forum_topic(
                        self.admin_chat_id,
                        thread_id,
                        &spec.name,
                        spec.icon_custom_emoji_id.as_deref(),
                    )
                    .await
                {
                    Ok(()) => true,
                    Err(e) if e.description_contains("TOPIC_NOT_MODIFIED") => true,
                    Err(e) => {
                        error!(topic = %spec.name, error = %e, "Unexpected error syncing topic");
                        false
                    }
                };
                if synced {
                    info!(topic = %spec.name, "Forum topic OK");
                    tokio::time::sleep(TOPIC_CREATION_BACKOFF).await;
                    continue;
                }
                info!(topic = %spec.name, "Failed to sync topic, creating a new one");
            }

            let thread_id = bot
                .create_forum_topic(
                    self.admin_chat_id,
                    &spec.name,
                    Some(spec.icon_color.unwrap_or(*default_color).rgb()),
                    spec.icon_custom_emoji_id.as_deref(),
                )
                .await?;
            self.message_thread_id_by_topic
                .set_subkey(self.admin_chat_id, spec.id(), &thread_id, false)
                .await?;
            info!(topic = %spec.name, thread_id, "Created and saved forum topic");
            tokio::time::sleep(TOPIC_CREATION_BACKOFF).await;
        }
        info!("All topics are created");
        Ok(())
    }
}

/// Routes categories (or the absence of one) to forum topics, e.g. for the feedback handler.
pub struct CategoryForumTopicStore {
    forum_topic_store: Arc<ForumTopicStore>,
    topic_by_category: HashMap<Option<i64>, ForumTopicSpec>,
    thread_id_cache: DashMap<Option<i64>, i32>,
}

impl CategoryForumTopicStore {
    /// `None` maps messages without a category. Every mapped topic must be in the store.
    pub fn new(
        forum_topic_store: Arc<ForumTopicStore>,
        topic_by_category: impl IntoIterator<Item = (Option<i64>, ForumTopicSpec)>,
    ) -> ComponentResult<Self> {
        let topic_by_category: HashMap<_, _> = topic_by_category.into_iter().collect();
        if let Some(unknown) = topic_by_category
            .values()
            .find(|spec| !forum_topic_store.topics().contains(spec))
        {
            return Err(ComponentError::Config(format!(
                "category to forum topic mapping must include only topics added to the store, but {:?} is not",
                unknown
            )));
        }
        Ok(Self {
            forum_topic_store,
            topic_by_category,
            thread_id_cache: DashMap::new(),
        })
    }

    pub fn forum_topic_store(&self) -> &Arc<ForumTopicStore> {
        &self.forum_topic_store
    }

    pub async fn get_message_thread_id(&self, category: Option<&Category>) -> ComponentResult<Option<i32>> {
        let key = category.map(|c| c.id);
        let cached = self.thread_id_cache.get(&key).map(|thread_id| *thread_id);
        if cached.is_some() {
            return Ok(cached);
        }
        let Some(topic) = self.topic_by_category.get(&key) else {
            return Ok(None);
        };
        let thread_id = self.forum_topic_store.get_message_thread_id(topic.id()).await?;
        if let Some(thread_id) = thread_id {
            self.thread_id_cache.insert(key, thread_id);
        }
        Ok(thread_id)
    }

    pub fn setup(&self, bot: Arc<dyn BotApi>) {
        self.forum_topic_store.setup(bot);
    }

    pub async fn background_job(&self) -> ComponentResult<()> {
        self.forum_topic_store.background_job().await
    }
}
