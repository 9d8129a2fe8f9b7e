//! Feedback relay between users and an admin chat.
//!
//! Users write to the bot; their messages are forwarded (or copied) to the admin chat. Admins
//! reply to those messages and the bot copies the replies back to the user. On the way the
//! handler applies bans and anti-spam, marks messages with hashtags, keeps a per-user message
//! log and can route users into forum topics.

mod anti_spam;
mod integration;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use telebot_core::{
    BotApi, BotError, ChatType, EditOptions, Handler, HandlerResponse, InlineKeyboardMarkup, Message, SendOptions,
    SentMessage, Update, User,
};
use telebot_stores::times::{FIVE_MINUTES, HOUR, MONTH, YEAR};
use telebot_stores::{DisplayCodec, KeyFlagStore, KeyListStore, KeySetStore, KeyValueStore, RedisInterface};
use tracing::{debug, error, info, instrument};

pub use anti_spam::{AntiSpam, AntiSpamConfig, AntiSpamInterface, AntiSpamStatus, DisabledAntiSpam};
pub use integration::{
    AuxFeedbackIntegration, FeedbackIntegration, ForwardedUserMessage, IntegrationReplySink, UserMessageRepliedEvent,
};

use crate::error::{ComponentError, ComponentResult};
use crate::language::{AnyText, LanguageData};
use crate::stores::language::{validate_any_text, LanguageStoreInterface};
use crate::stores::{BannedUsersStore, Category, CategoryForumTopicStore, CategoryStore};
use crate::utils::{
    emoji_hash, fill_placeholders, format_duration, html_escape, html_link, join_paragraphs, telegram_message_url,
};

const CONST_KEY: &str = "const";
/// Expiration for stores a particular configuration never uses.
const DUMMY_EXPIRATION_TIME: Duration = Duration::from_secs(1312);
const ADMIN_CHAT_BULK_DELAY: Duration = Duration::from_millis(500);

/// Texts the handler sends. User-facing ones may be multilanguage when a language store is
/// used; admin chat ones are plain.
#[derive(Debug, Clone, Default)]
pub struct ServiceMessages {
    pub forwarded_to_admin_ok: Option<AnyText>,
    /// Required with [`FeedbackConfig::force_category_selection`].
    pub you_must_select_category: Option<AnyText>,
    /// Placeholders: message limit, throttle duration.
    pub throttling_template: Option<AnyText>,
    pub something_went_wrong: Option<AnyText>,

    pub copied_to_user_ok: Option<String>,
    pub can_not_delete_message: Option<String>,
    pub deleted_message_ok: Option<String>,
}

impl ServiceMessages {
    fn user_facing(&self) -> [&Option<AnyText>; 4] {
        [
            &self.forwarded_to_admin_ok,
            &self.you_must_select_category,
            &self.throttling_template,
            &self.something_went_wrong,
        ]
    }

    fn throttling(&self, config: &AntiSpamConfig, language: Option<&LanguageData>) -> ComponentResult<Option<String>> {
        let Some(template) = &self.throttling_template else {
            return Ok(None);
        };
        Ok(Some(fill_placeholders(
            template.to_str(language)?,
            &[&config.throttle_after_messages, &format_duration(config.throttle_duration)],
        )))
    }
}

/// How users are presented to admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAnonymization {
    /// Name, username and id are sent before the copied message.
    None,
    /// Messages are forwarded, which links to the user profile unless they hide it.
    Legacy,
    /// Messages are copied and preceded by a hashed identifier only.
    Full,
}

/// Maps `(user id, bot prefix)` to an anonymised identifier.
pub type UserIdHashFn = fn(i64, &str) -> ComponentResult<String>;

pub fn default_user_id_hash(user_id: i64, bot_prefix: &str) -> ComponentResult<String> {
    emoji_hash(user_id, bot_prefix, 4)
}

/// Decides whether a private message is feedback at all; rejected ones go to the next handler.
#[async_trait]
pub trait UserMessageFilter: Send + Sync {
    async fn accept(&self, message: &Message) -> ComponentResult<bool>;
}

pub struct ForwardingHookContext<'a> {
    pub bot: &'a dyn BotApi,
    pub user: &'a User,
    pub admin_chat_id: i64,
    pub message_thread_id: Option<i32>,
}

/// Runs right before or right after a user message reaches the admin chat. Returns the id of
/// the admin chat message it sent, if any, so it is tied to the user like forwarded ones.
#[async_trait]
pub trait ForwardingHook: Send + Sync {
    async fn run(&self, context: &ForwardingHookContext<'_>) -> ComponentResult<Option<i32>>;
}

#[async_trait]
pub trait AdminChatActionCallback: Send + Sync {
    async fn run(&self, admin_message: &Message, forwarded_message_id: i32, origin_chat_id: i64) -> ComponentResult<()>;
}

/// Custom admin chat command, used by replying to a user's message with exactly `command`.
#[derive(Clone)]
pub struct AdminChatAction {
    /// With the slash, e.g. `/close`.
    pub command: String,
    pub callback: Arc<dyn AdminChatActionCallback>,
    pub delete_everything_related_to_user_after: bool,
}

#[derive(Clone)]
pub struct FeedbackConfig {
    /// Distinguishes several handlers under the same bot prefix.
    pub name: String,
    /// When false, `/log` output goes to the private chat of the admin who asked.
    pub message_log_to_admin_chat: bool,
    /// Users must pick a category before their messages are forwarded.
    pub force_category_selection: bool,
    pub hashtags_in_admin_chat: bool,
    /// Reuse a user's hashtag message for this long.
    pub hashtag_message_rarer_than: Option<Duration>,
    /// Hashtag (without `#`) marking messages nobody has answered yet.
    pub unanswered_hashtag: Option<String>,
    pub confirm_forwarded_to_admin_rarer_than: Option<Duration>,
    /// Appended to `/help` in the admin chat; HTML.
    pub admin_chat_help_extra: Option<String>,
    pub user_anonymization: UserAnonymization,
    pub user_id_hash: UserIdHashFn,
    pub message_log_page_size: usize,
    pub forum_topic_per_user: bool,
    /// With topics per user, admins answer by simply writing in the user's topic.
    pub any_message_in_user_topic_is_reply: bool,
    pub user_forum_topic_lifetime: Duration,
    pub custom_user_message_filter: Option<Arc<dyn UserMessageFilter>>,
    pub before_forwarding: Option<Arc<dyn ForwardingHook>>,
    pub after_forwarding: Option<Arc<dyn ForwardingHook>>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            message_log_to_admin_chat: true,
            force_category_selection: false,
            hashtags_in_admin_chat: false,
            hashtag_message_rarer_than: None,
            unanswered_hashtag: None,
            confirm_forwarded_to_admin_rarer_than: None,
            admin_chat_help_extra: None,
            user_anonymization: UserAnonymization::Legacy,
            user_id_hash: default_user_id_hash,
            message_log_page_size: 30,
            forum_topic_per_user: false,
            any_message_in_user_topic_is_reply: true,
            user_forum_topic_lifetime: Duration::from_secs(90 * 24 * 3600),
            custom_user_message_filter: None,
            before_forwarding: None,
            after_forwarding: None,
        }
    }
}

/// Optional collaborators of a [`FeedbackHandler`].
#[derive(Clone, Default)]
pub struct FeedbackComponents {
    /// Defaults to [`DisabledAntiSpam`].
    pub anti_spam: Option<Arc<dyn AntiSpamInterface>>,
    pub banned_users: Option<Arc<BannedUsersStore>>,
    pub language: Option<Arc<dyn LanguageStoreInterface>>,
    pub category: Option<Arc<CategoryStore>>,
    pub forum_topics: Option<Arc<CategoryForumTopicStore>>,
    pub integrations: Vec<Arc<dyn FeedbackIntegration>>,
    pub admin_chat_actions: Vec<AdminChatAction>,
}

/// Hashtag message in the admin chat; hashtags are stored without `#`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HashtagMessageData {
    message_id: i32,
    hashtags: Vec<String>,
}

/// Admin reply delivered to a user, kept briefly for `/undo`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct CopiedMessageToUserData {
    origin_chat_id: i64,
    sent_message_id: i32,
}

/// What ends up in the admin chat on behalf of the user.
enum UserContent<'a> {
    Message(&'a Message),
    Text { text: &'a str, options: SendOptions },
    /// A message already posted in another chat, e.g. a mirrored admin chat.
    Copy { from_chat_id: i64, message_id: i32 },
}

impl UserContent<'_> {
    fn user_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Where the handler's answers to the user go.
enum UserReplier<'a> {
    ReplyTo(&'a Message),
    SendTo(i64),
    Silent,
}

impl UserReplier<'_> {
    async fn reply(&self, bot: &dyn BotApi, text: &str, markup: Option<InlineKeyboardMarkup>) -> ComponentResult<()> {
        let (chat_id, mut options) = match self {
            Self::ReplyTo(message) => (message.chat.id, SendOptions::new().reply_to(message.id)),
            Self::SendTo(chat_id) => (*chat_id, SendOptions::new()),
            Self::Silent => return Ok(()),
        };
        if let Some(markup) = markup {
            options = options.reply_markup(markup);
        }
        bot.send_message(chat_id, text, options).await?;
        Ok(())
    }
}

pub struct FeedbackHandler {
    bot: Arc<dyn BotApi>,
    admin_chat_id: i64,
    bot_prefix: String,
    config: FeedbackConfig,
    service_messages: ServiceMessages,
    anti_spam: Arc<dyn AntiSpamInterface>,
    banned_users_store: Option<Arc<BannedUsersStore>>,
    language_store: Option<Arc<dyn LanguageStoreInterface>>,
    category_store: Option<Arc<CategoryStore>>,
    forum_topic_store: Option<Arc<CategoryForumTopicStore>>,
    integrations: Vec<Arc<dyn FeedbackIntegration>>,
    admin_chat_actions: Vec<AdminChatAction>,

    /// Admin chat message -> user id.
    origin_chat_id_store: KeyValueStore<i64>,
    /// User id -> admin chat messages related to the user (forwarded and service ones).
    user_related_messages_store: KeySetStore<i32>,
    /// User id -> admin chat messages from and to the user.
    message_log_store: KeyListStore<i32>,
    recently_sent_confirmation_flag_store: KeyFlagStore,
    recent_hashtag_message_for_user_store: KeyValueStore<HashtagMessageData>,
    hashtag_message_for_forwarded_message_store: KeyValueStore<HashtagMessageData>,
    copied_to_user_data_store: KeyValueStore<CopiedMessageToUserData>,
    last_sent_user_identifier_store: KeyValueStore<String>,
    message_thread_id_by_user_id_store: KeyValueStore<i32>,
    last_forwarded_message_id_by_message_thread_id: KeyValueStore<i32>,
}

impl FeedbackHandler {
    pub fn new(
        bot: Arc<dyn BotApi>,
        redis: Arc<dyn RedisInterface>,
        bot_prefix: &str,
        admin_chat_id: i64,
        config: FeedbackConfig,
        service_messages: ServiceMessages,
        components: FeedbackComponents,
    ) -> ComponentResult<Self> {
        let bot_prefix = format!("{}{}", bot_prefix, config.name);
        let prefix = bot_prefix.as_str();

        if config.forum_topic_per_user && components.forum_topics.is_some() {
            return Err(ComponentError::Config(
                "forum topics can be used either for categories or per user, not both".to_string(),
            ));
        }
        if config.force_category_selection && service_messages.you_must_select_category.is_none() {
            return Err(ComponentError::Config(
                "force_category_selection requires the you_must_select_category message".to_string(),
            ));
        }
        for text in service_messages.user_facing().into_iter().flatten() {
            validate_any_text(text, components.language.as_deref())
                .map_err(|e| ComponentError::Config(format!("service message {:?}: {}", text, e)))?;
        }

        let mut commands: Vec<&str> = vec!["/log", "/ban", "/undo", "/help"];
        for action in &components.admin_chat_actions {
            if !action.command.starts_with('/') || commands.contains(&action.command.as_str()) {
                return Err(ComponentError::Config(format!(
                    "admin chat action command {:?} must start with '/' and be unique",
                    action.command
                )));
            }
            commands.push(&action.command);
        }

        if let Some(forum_topics) = &components.forum_topics {
            forum_topics.setup(bot.clone());
        }

        Ok(Self {
            origin_chat_id_store: KeyValueStore::with_codec("origin-chat-for-msg", prefix, redis.clone(), DisplayCodec)?
                .with_expiration(Some(YEAR)),
            user_related_messages_store: KeySetStore::with_codec("msgs-from-user", prefix, redis.clone(), DisplayCodec)?
                .with_expiration(Some(MONTH)),
            message_log_store: KeyListStore::with_codec("message-log-with", prefix, redis.clone(), DisplayCodec)?
                .with_expiration(Some(MONTH)),
            recently_sent_confirmation_flag_store: KeyFlagStore::new(
                "recently-sent-confirmation-to",
                prefix,
                redis.clone(),
            )?
            .with_expiration(Some(
                config.confirm_forwarded_to_admin_rarer_than.unwrap_or(DUMMY_EXPIRATION_TIME),
            )),
            recent_hashtag_message_for_user_store: KeyValueStore::new("recent-hashtag-message-for", prefix, redis.clone())?
                .with_expiration(Some(config.hashtag_message_rarer_than.unwrap_or(DUMMY_EXPIRATION_TIME))),
            hashtag_message_for_forwarded_message_store: KeyValueStore::new(
                "hashtag-msg-for-fwd",
                prefix,
                redis.clone(),
            )?
            .with_expiration(Some(MONTH)),
            copied_to_user_data_store: KeyValueStore::new("copied-to-user-ok", prefix, redis.clone())?
                .with_expiration(Some(FIVE_MINUTES)),
            last_sent_user_identifier_store: KeyValueStore::with_codec(
                "last-sent-user-id-hash",
                prefix,
                redis.clone(),
                DisplayCodec,
            )?
            .with_expiration(Some(HOUR * 12)),
            message_thread_id_by_user_id_store: KeyValueStore::with_codec(
                "message-thread-id-by-user",
                prefix,
                redis.clone(),
                DisplayCodec,
            )?
            .with_expiration(Some(config.user_forum_topic_lifetime)),
            last_forwarded_message_id_by_message_thread_id: KeyValueStore::with_codec(
                "last-fwd-msg-id-in-thread",
                prefix,
                redis,
                DisplayCodec,
            )?
            .with_expiration(Some(config.user_forum_topic_lifetime)),

            bot,
            admin_chat_id,
            bot_prefix,
            config,
            service_messages,
            anti_spam: components.anti_spam.unwrap_or_else(|| Arc::new(DisabledAntiSpam)),
            banned_users_store: components.banned_users,
            language_store: components.language,
            category_store: components.category,
            forum_topic_store: components.forum_topics,
            integrations: components.integrations,
            admin_chat_actions: components.admin_chat_actions,
        })
    }

    /// Wraps the handler and lets its integrations send replies back to it.
    pub fn into_shared(self) -> Arc<Self> {
        let handler = Arc::new(self);
        for integration in &handler.integrations {
            let sink: Weak<dyn IntegrationReplySink> = Arc::<Self>::downgrade(&handler);
            integration.register_reply_sink(sink);
        }
        handler
    }

    pub fn admin_chat_id(&self) -> i64 {
        self.admin_chat_id
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Creates category forum topics, if any are configured.
    pub async fn background_job(&self) -> ComponentResult<()> {
        match &self.forum_topic_store {
            Some(store) => store.background_job().await,
            None => Ok(()),
        }
    }

    /// Human readable identifier for the user shown to admins.
    pub fn user_identifier(&self, user: &User, support_html: bool) -> ComponentResult<String> {
        Ok(match self.config.user_anonymization {
            UserAnonymization::Full => (self.config.user_id_hash)(user.id, &self.bot_prefix)?,
            UserAnonymization::Legacy => user.full_name(),
            UserAnonymization::None => {
                let mut identifier = user.full_name();
                if let Some(username) = &user.username {
                    identifier.push_str(&format!(" @{}", username));
                }
                identifier.push_str(&format!(" (#{})", user.id));
                if support_html {
                    html_link(&format!("tg://user?id={}", user.id), &identifier)
                } else {
                    identifier
                }
            }
        })
    }

    async fn user_language(&self, user: &User) -> ComponentResult<Option<LanguageData>> {
        match &self.language_store {
            Some(store) => Ok(Some(store.get_user_language(user).await?)),
            None => Ok(None),
        }
    }

    /// Processes a message the user sent to the bot. Returns the admin chat message id when
    /// it was forwarded.
    pub async fn handle_user_message(&self, message: &Message, reply_to_user: bool) -> ComponentResult<Option<i32>> {
        let Some(user) = &message.from else {
            return Ok(None);
        };
        let replier = if reply_to_user {
            UserReplier::ReplyTo(message)
        } else {
            UserReplier::Silent
        };
        let send_user_identifier = self.config.user_anonymization != UserAnonymization::Legacy;
        self.process_user_message(user, UserContent::Message(message), replier, send_user_identifier)
            .await
    }

    /// Acts as if the user has written `text`, e.g. after pressing a button.
    pub async fn emulate_user_message(
        &self,
        user: &User,
        text: &str,
        options: SendOptions,
        no_response: bool,
        send_user_identifier: bool,
    ) -> ComponentResult<Option<i32>> {
        let replier = if no_response {
            UserReplier::Silent
        } else {
            UserReplier::SendTo(user.id)
        };
        self.process_user_message(user, UserContent::Text { text, options }, replier, send_user_identifier)
            .await
    }

    async fn process_user_message(
        &self,
        user: &User,
        content: UserContent<'_>,
        replier: UserReplier<'_>,
        send_user_identifier: bool,
    ) -> ComponentResult<Option<i32>> {
        let result = self
            .process_user_message_or_fail(user, content, &replier, send_user_identifier)
            .await;
        if result.is_err() {
            if let Some(text) = &self.service_messages.something_went_wrong {
                let language = self.user_language(user).await.ok().flatten();
                if let Ok(text) = text.to_str(language.as_ref()) {
                    if let Err(e) = self.bot.send_message(user.id, text, SendOptions::new()).await {
                        debug!(error = %e, "Unable to notify user about the failure");
                    }
                }
            }
        }
        result
    }

    #[instrument(skip_all, fields(user_id = user.id))]
    async fn process_user_message_or_fail(
        &self,
        user: &User,
        content: UserContent<'_>,
        replier: &UserReplier<'_>,
        send_user_identifier: bool,
    ) -> ComponentResult<Option<i32>> {
        let bot = self.bot.as_ref();
        if let Some(banned) = &self.banned_users_store {
            if banned.is_banned(user.id).await? {
                return Ok(None);
            }
        }
        let anti_spam_status = self.anti_spam.status(user).await?;
        if anti_spam_status == AntiSpamStatus::SoftBan {
            return Ok(None);
        }
        let language = self.user_language(user).await?;
        if anti_spam_status == AntiSpamStatus::Throttling {
            if let Some(config) = self.anti_spam.config() {
                if let Some(text) = self.service_messages.throttling(config, language.as_ref())? {
                    replier.reply(bot, &text, None).await?;
                }
            }
            return Ok(None);
        }

        let category = match &self.category_store {
            Some(store) => store.get_user_category(user).await?,
            None => None,
        };
        if category.is_none() && self.config.force_category_selection {
            if let (Some(store), Some(text)) = (&self.category_store, &self.service_messages.you_must_select_category) {
                replier
                    .reply(bot, text.to_str(language.as_ref())?, Some(store.markup(user).await?))
                    .await?;
                return Ok(None);
            }
        }

        let message_thread_id = self.message_thread_id_for(user, category.as_ref()).await?;

        let mut hashtag_message_data = None;
        if self.config.hashtags_in_admin_chat {
            hashtag_message_data = self
                .hashtag_message_for(user, category.as_ref(), message_thread_id)
                .await?;
        }

        if send_user_identifier && !self.config.forum_topic_per_user {
            let identifier = self.user_identifier(user, true)?;
            let last_sent = self.last_sent_user_identifier_store.load(CONST_KEY).await?;
            if last_sent.as_deref() != Some(identifier.as_str()) {
                let sent = bot
                    .send_message(self.admin_chat_id, &identifier, SendOptions::html().thread(message_thread_id))
                    .await?;
                self.last_sent_user_identifier_store.save(CONST_KEY, &identifier).await?;
                self.save_message_from_user(user, sent.message_id, message_thread_id)
                    .await?;
            }
        }

        let hook_context = ForwardingHookContext {
            bot,
            user,
            admin_chat_id: self.admin_chat_id,
            message_thread_id,
        };
        if let Some(hook) = &self.config.before_forwarding {
            if let Some(message_id) = hook.run(&hook_context).await? {
                self.save_message_from_user(user, message_id, message_thread_id).await?;
            }
        }

        let user_message = content.user_message().cloned();
        let admin_chat_message_id = self.send_to_admin_chat(content, message_thread_id).await?;
        self.save_message_from_user(user, admin_chat_message_id, message_thread_id)
            .await?;

        if let Some(hook) = &self.config.after_forwarding {
            if let Some(message_id) = hook.run(&hook_context).await? {
                self.save_message_from_user(user, message_id, message_thread_id).await?;
            }
        }

        if let Some(data) = &hashtag_message_data {
            self.hashtag_message_for_forwarded_message_store
                .save(admin_chat_message_id, data)
                .await?;
        }

        if let Some(confirmation) = &self.service_messages.forwarded_to_admin_ok {
            let recently_confirmed = match self.config.confirm_forwarded_to_admin_rarer_than {
                Some(_) => self.recently_sent_confirmation_flag_store.is_flag_set(user.id).await?,
                None => false,
            };
            if !recently_confirmed {
                replier.reply(bot, confirmation.to_str(language.as_ref())?, None).await?;
                if self.config.confirm_forwarded_to_admin_rarer_than.is_some() {
                    self.recently_sent_confirmation_flag_store.set_flag(user.id).await?;
                }
            }
        }

        let forwarded = ForwardedUserMessage {
            admin_chat_id: self.admin_chat_id,
            admin_chat_message_id,
            user,
            user_message: user_message.as_ref(),
            category: category.as_ref(),
        };
        for integration in &self.integrations {
            // the message is already in the admin chat at this point
            if let Err(e) = integration.handle_user_message(&forwarded).await {
                error!(integration = %integration.name(), error = %e, "Error exporting user message to integration");
            }
        }
        Ok(Some(admin_chat_message_id))
    }

    async fn message_thread_id_for(&self, user: &User, category: Option<&Category>) -> ComponentResult<Option<i32>> {
        if let Some(store) = &self.forum_topic_store {
            return store.get_message_thread_id(category).await;
        }
        if !self.config.forum_topic_per_user {
            return Ok(None);
        }
        if let Some(thread_id) = self.message_thread_id_by_user_id_store.load(user.id).await? {
            return Ok(Some(thread_id));
        }
        let topic_name = self.user_identifier(user, false)?;
        match self
            .bot
            .create_forum_topic(self.admin_chat_id, &topic_name, None, None)
            .await
        {
            Ok(thread_id) => {
                self.message_thread_id_by_user_id_store.save(user.id, &thread_id).await?;
                Ok(Some(thread_id))
            }
            Err(e) => {
                error!(error = %e, "Error creating forum topic for user, sending without message thread id");
                Ok(None)
            }
        }
    }

    /// Reuses the user's recent hashtag message or sends a new one when there is none or the
    /// category hashtag is missing from it.
    async fn hashtag_message_for(
        &self,
        user: &User,
        category: Option<&Category>,
        message_thread_id: Option<i32>,
    ) -> ComponentResult<Option<HashtagMessageData>> {
        let category_hashtag = category.and_then(|c| c.hashtag.clone());
        let recent = self.recent_hashtag_message_for_user_store.load(user.id).await?;
        let is_fresh = recent.as_ref().is_some_and(|data| {
            category_hashtag
                .as_ref()
                .map_or(true, |hashtag| data.hashtags.contains(hashtag))
        });
        if is_fresh {
            return Ok(recent);
        }

        let hashtags: Vec<String> = self
            .config
            .unanswered_hashtag
            .iter()
            .cloned()
            .chain(category_hashtag)
            .collect();
        if hashtags.is_empty() {
            return Ok(recent);
        }
        let sent = self
            .bot
            .send_message(
                self.admin_chat_id,
                &join_hashtags(&hashtags),
                SendOptions::new().thread(message_thread_id),
            )
            .await?;
        self.user_related_messages_store
            .add(user.id, &sent.message_id, false)
            .await?;
        let data = HashtagMessageData {
            message_id: sent.message_id,
            hashtags,
        };
        self.recent_hashtag_message_for_user_store.save(user.id, &data).await?;
        Ok(Some(data))
    }

    async fn send_to_admin_chat(&self, content: UserContent<'_>, message_thread_id: Option<i32>) -> ComponentResult<i32> {
        let bot = self.bot.as_ref();
        match content {
            UserContent::Message(message) if self.config.user_anonymization == UserAnonymization::Legacy => {
                let SentMessage { message_id, .. } = bot
                    .forward_message(self.admin_chat_id, message.chat.id, message.id, message_thread_id)
                    .await?;
                Ok(message_id)
            }
            UserContent::Message(message) => Ok(bot
                .copy_message(
                    self.admin_chat_id,
                    message.chat.id,
                    message.id,
                    SendOptions::new().thread(message_thread_id),
                )
                .await?),
            UserContent::Text { text, mut options } => {
                if options.message_thread_id.is_none() {
                    options.message_thread_id = message_thread_id;
                }
                Ok(bot.send_message(self.admin_chat_id, text, options).await?.message_id)
            }
            UserContent::Copy {
                from_chat_id,
                message_id,
            } => Ok(bot
                .copy_message(
                    self.admin_chat_id,
                    from_chat_id,
                    message_id,
                    SendOptions::new().thread(message_thread_id),
                )
                .await?),
        }
    }

    async fn save_message_from_user(
        &self,
        author: &User,
        admin_chat_message_id: i32,
        message_thread_id: Option<i32>,
    ) -> ComponentResult<()> {
        self.origin_chat_id_store.save(admin_chat_message_id, &author.id).await?;
        self.user_related_messages_store
            .add(author.id, &admin_chat_message_id, true)
            .await?;
        self.message_log_store.push(author.id, &admin_chat_message_id, true).await?;
        if let Some(thread_id) = message_thread_id {
            self.last_forwarded_message_id_by_message_thread_id
                .save(thread_id, &admin_chat_message_id)
                .await?;
        }
        Ok(())
    }

    async fn reply_in_admin_chat(&self, message: &Message, text: &str) -> ComponentResult<SentMessage> {
        Ok(self
            .bot
            .send_message(
                message.chat.id,
                text,
                SendOptions::new().reply_to(message.id).thread(message.message_thread_id),
            )
            .await?)
    }

    /// Returns false for admin chat messages the handler has nothing to do with.
    async fn handle_admin_chat_message(&self, message: &Message) -> ComponentResult<bool> {
        if message.is_command("help") {
            let mut options = SendOptions::html().reply_to(message.id).thread(message.message_thread_id).no_preview();
            options.disable_notification = true;
            self.bot
                .send_message(message.chat.id, &self.admin_help_message()?, options)
                .await?;
            return Ok(true);
        }
        if message.is_command("undo") && message.reply_to_message.is_some() {
            self.undo_copied_message(message).await?;
            return Ok(true);
        }
        match self.admin_to_bot(message).await {
            Ok(handled) => Ok(handled),
            Err(e) => {
                error!(error = %e, "Unexpected error while replying to forwarded message");
                self.reply_in_admin_chat(message, &format!("Something went wrong! {}", e))
                    .await?;
                Ok(true)
            }
        }
    }

    async fn undo_copied_message(&self, message: &Message) -> ComponentResult<()> {
        let Some(replied_to) = &message.reply_to_message else {
            return Ok(());
        };
        let Some(copied) = self.copied_to_user_data_store.load(replied_to.id).await? else {
            if let Some(text) = &self.service_messages.can_not_delete_message {
                self.reply_in_admin_chat(message, text).await?;
            }
            return Ok(());
        };
        match self
            .bot
            .delete_message(copied.origin_chat_id, copied.sent_message_id)
            .await
        {
            Ok(()) => {
                if let Some(text) = &self.service_messages.deleted_message_ok {
                    self.reply_in_admin_chat(message, text).await?;
                }
                self.copied_to_user_data_store.drop(replied_to.id).await?;
            }
            Err(e) => {
                error!(error = %e, "Error deleting message");
                if let Some(text) = &self.service_messages.can_not_delete_message {
                    self.reply_in_admin_chat(message, text).await?;
                }
            }
        }
        Ok(())
    }

    /// Resolves the admin chat message the admin is answering: an explicit reply, or in a
    /// per-user topic the last message forwarded there.
    async fn replied_admin_chat_message_id(&self, message: &Message) -> ComponentResult<Option<i32>> {
        if let Some(replied_to) = message.reply_to_message.as_deref().filter(|m| !m.forum_topic_created) {
            debug!("Message in admin chat is a non-trivial reply");
            return Ok(Some(replied_to.id));
        }
        if !self.config.forum_topic_per_user || !self.config.any_message_in_user_topic_is_reply {
            debug!("Ignoring message in admin chat: not a reply");
            return Ok(None);
        }
        let Some(thread_id) = message.message_thread_id else {
            debug!("Message in admin chat is not a reply and not in a topic");
            return Ok(None);
        };
        Ok(self
            .last_forwarded_message_id_by_message_thread_id
            .load(thread_id)
            .await?)
    }

    #[instrument(skip_all, fields(admin_message_id = message.id))]
    async fn admin_to_bot(&self, message: &Message) -> ComponentResult<bool> {
        let Some(forwarded_message_id) = self.replied_admin_chat_message_id(message).await? else {
            return Ok(false);
        };
        let Some(origin_chat_id) = self.origin_chat_id_store.load(forwarded_message_id).await? else {
            return Ok(false);
        };

        let text = message.text.as_deref().unwrap_or_default();
        if !text.starts_with('/') {
            self.copy_admin_reply_to_user(message, forwarded_message_id, origin_chat_id)
                .await?;
            return Ok(true);
        }

        if let Some(action) = self.admin_chat_actions.iter().find(|a| a.command == text.trim()) {
            info!(command = %action.command, origin_chat_id, "Running admin chat action");
            action.callback.run(message, forwarded_message_id, origin_chat_id).await?;
            if action.delete_everything_related_to_user_after {
                self.delete_user_related_messages(origin_chat_id, message.id).await?;
            }
            return Ok(true);
        }
        if text.trim() == "/ban" {
            if let Some(banned) = &self.banned_users_store {
                banned.ban_user(origin_chat_id).await?;
                self.delete_user_related_messages(origin_chat_id, message.id).await?;
                return Ok(true);
            }
        }
        if text.starts_with("/log") {
            self.send_message_log(message, origin_chat_id).await?;
            return Ok(true);
        }
        let mut available_commands: Vec<String> = self
            .admin_chat_actions
            .iter()
            .map(|a| format!("'{}'", a.command))
            .collect();
        available_commands.push("'/log'".to_string());
        if self.banned_users_store.is_some() {
            available_commands.push("'/ban'".to_string());
        }
        self.reply_in_admin_chat(
            message,
            &format!(
                "Invalid admin chat command: '{}'; available commands are: {}",
                text,
                available_commands.join(", ")
            ),
        )
        .await?;
        Ok(true)
    }

    async fn copy_admin_reply_to_user(
        &self,
        message: &Message,
        forwarded_message_id: i32,
        origin_chat_id: i64,
    ) -> ComponentResult<()> {
        let copied_message_id = match self
            .bot
            .copy_message(origin_chat_id, self.admin_chat_id, message.id, SendOptions::new())
            .await
        {
            Ok(id) => id,
            // most likely the user has blocked the bot
            Err(e @ BotError::Api { .. }) => {
                info!(error = %e, "Error copying message to user chat");
                self.reply_in_admin_chat(message, &e.to_string()).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.message_log_store.push(origin_chat_id, &message.id, false).await?;

        let copied = CopiedMessageToUserData {
            origin_chat_id,
            sent_message_id: copied_message_id,
        };
        self.copied_to_user_data_store.save(message.id, &copied).await?;
        if let Some(text) = &self.service_messages.copied_to_user_ok {
            let confirmation = self.reply_in_admin_chat(message, text).await?;
            self.copied_to_user_data_store
                .save(confirmation.message_id, &copied)
                .await?;
        }

        if self.config.hashtags_in_admin_chat {
            self.remove_unanswered_hashtag(forwarded_message_id).await?;
        }

        let has_attachments = message.content_type != "text";
        let event = UserMessageRepliedEvent {
            origin_chat_id,
            reply_text: html_escape(message.text_content().unwrap_or_default()),
            reply_has_attachments: has_attachments,
            reply_author: message.from.as_ref().map(|admin| admin.first_name.clone()),
            reply_link: telegram_message_url(self.admin_chat_id, message.id, None, None).ok(),
            main_admin_chat_message_id: forwarded_message_id,
            integration: None,
        };
        self.notify_integrations(&event, None).await;
        Ok(())
    }

    /// Tells every integration except `except` (by name) that the user got an answer.
    async fn notify_integrations(&self, event: &UserMessageRepliedEvent, except: Option<&str>) {
        for integration in &self.integrations {
            let name = integration.name();
            if except == Some(name.as_str()) {
                continue;
            }
            if let Err(e) = integration.handle_user_message_replied_elsewhere(event.clone()).await {
                error!(integration = %name, error = %e, "Error notifying integration, ignoring");
            }
        }
    }

    async fn remove_unanswered_hashtag(&self, forwarded_message_id: i32) -> ComponentResult<()> {
        let Some(unanswered) = &self.config.unanswered_hashtag else {
            return Ok(());
        };
        let Some(mut data) = self
            .hashtag_message_for_forwarded_message_store
            .load(forwarded_message_id)
            .await?
        else {
            return Ok(());
        };
        if !data.hashtags.contains(unanswered) {
            return Ok(());
        }
        data.hashtags.retain(|h| h != unanswered);
        let updated = if data.hashtags.is_empty() {
            self.bot.delete_message(self.admin_chat_id, data.message_id).await
        } else {
            self.bot
                .edit_message_text(
                    self.admin_chat_id,
                    data.message_id,
                    &join_hashtags(&data.hashtags),
                    EditOptions::default(),
                )
                .await
        };
        // Telegram refuses edits that change nothing, e.g. for already answered messages.
        if let Err(e) = updated {
            info!(error = %e, "Error updating hashtag message");
        }
        self.hashtag_message_for_forwarded_message_store
            .save(forwarded_message_id, &data)
            .await?;
        Ok(())
    }

    async fn delete_user_related_messages(&self, origin_chat_id: i64, initiator_message_id: i32) -> ComponentResult<()> {
        if self.config.forum_topic_per_user {
            if let Some(thread_id) = self.message_thread_id_by_user_id_store.load(origin_chat_id).await? {
                info!("Found forum topic for user, deleting it");
                self.bot.delete_forum_topic(self.admin_chat_id, thread_id).await?;
                self.message_thread_id_by_user_id_store.drop(origin_chat_id).await?;
                return Ok(());
            }
        }

        let mut message_ids = self.user_related_messages_store.all(origin_chat_id).await?;
        message_ids.insert(initiator_message_id);
        for message_id in message_ids {
            match self.bot.delete_message(self.admin_chat_id, message_id).await {
                Ok(()) => {
                    self.origin_chat_id_store.drop(message_id).await?;
                    tokio::time::sleep(ADMIN_CHAT_BULK_DELAY).await;
                }
                Err(e) => debug!(message_id, error = %e, "Unable to delete user related message"),
            }
        }
        self.user_related_messages_store.drop(origin_chat_id).await?;
        self.message_log_store.drop(origin_chat_id).await?;
        Ok(())
    }

    async fn send_message_log(&self, message: &Message, origin_chat_id: i64) -> ComponentResult<()> {
        let page = match message.command_arguments().first() {
            None => 0,
            Some(arg) => match arg.parse::<i64>() {
                Ok(page) if page > 0 => page - 1,
                Ok(page) => page,
                Err(_) => {
                    self.reply_in_admin_chat(message, "Bad command, expected format is '/log' or '/log <page number>'")
                        .await?;
                    return Ok(());
                }
            },
        };
        let log_message_ids = self.message_log_store.all(origin_chat_id).await?;
        let page_size = self.config.message_log_page_size.max(1);
        let total_pages = log_message_ids.len().div_ceil(page_size);
        // -1 is the last page, -2 the one before it, and so on
        let page = if page < 0 && total_pages > 0 {
            page.rem_euclid(total_pages as i64)
        } else {
            page.max(0)
        } as usize;
        let page_ids: Vec<i32> = log_message_ids
            .iter()
            .skip(page * page_size)
            .take(page_size)
            .copied()
            .collect();
        info!(
            page,
            total_pages,
            origin_chat_id,
            total_messages = log_message_ids.len(),
            on_page = page_ids.len(),
            "Forwarding message log page"
        );
        if page_ids.is_empty() {
            let text = if page == 0 {
                "Message log with this user is not available :(".to_string()
            } else {
                format!(
                    "Only {} messages are available in log, not enough messages for page {}",
                    log_message_ids.len(),
                    page + 1
                )
            };
            self.reply_in_admin_chat(message, &text).await?;
            return Ok(());
        }

        let destination = if self.config.message_log_to_admin_chat {
            self.admin_chat_id
        } else {
            match message.user_id() {
                Some(admin_id) => admin_id,
                None => return Ok(()),
            }
        };
        self.bot
            .send_message(
                destination,
                &format!("📜 Log page {} / {}", page + 1, total_pages),
                SendOptions::new(),
            )
            .await?;
        for message_id in page_ids {
            match self
                .bot
                .forward_message(destination, self.admin_chat_id, message_id, None)
                .await
            {
                Ok(log_message) => {
                    if self.config.message_log_to_admin_chat {
                        // forwarded log entries can be replied to and are cleaned up on ban
                        self.origin_chat_id_store
                            .save(log_message.message_id, &origin_chat_id)
                            .await?;
                        self.user_related_messages_store
                            .add(origin_chat_id, &log_message.message_id, false)
                            .await?;
                    }
                    tokio::time::sleep(ADMIN_CHAT_BULK_DELAY).await;
                }
                Err(e) => error!(page, total_pages, error = %e, "Error forwarding message log entry, continuing"),
            }
        }
        let mut footer = format!("⬆️ Log page {} / {}", page + 1, total_pages);
        if page + 1 < total_pages {
            footer.push_str(&format!("\nNext: <code>/log {}</code>", page + 2));
        }
        self.bot.send_message(destination, &footer, SendOptions::html()).await?;
        Ok(())
    }

    fn admin_help_message(&self) -> ComponentResult<String> {
        let mut paragraphs = vec![
            "<b>Admin chat help</b>".to_string(),
            "<i>Sent automatically in response to /help</i>".to_string(),
        ];

        let copies_or_forwards = match self.config.user_anonymization {
            UserAnonymization::Legacy => "forwards",
            _ => "copies",
        };
        let identifier_help = match self.config.user_anonymization {
            UserAnonymization::Full => {
                let example_id = rand::thread_rng().gen_range(1..=1000);
                format!(
                    "· Before a copied message the bot sends an anonymised user identifier, e.g. «{}»\n",
                    (self.config.user_id_hash)(example_id, &self.bot_prefix)?
                )
            }
            UserAnonymization::None => "· Before a copied message the bot sends the user's name and username\n".to_string(),
            UserAnonymization::Legacy => String::new(),
        };
        paragraphs.push(format!(
            "💬 <i>Basics</i>\n\
             · The bot {} here every message users send to it in private (except for /commands).\n\
             {}\
             · Reply to a message here and the bot will copy your reply to the user.\n\
             · To take a reply back, reply to it (or to the bot's confirmation) with /undo within 5 minutes",
            copies_or_forwards, identifier_help
        ));

        if let Some(store) = &self.category_store {
            let categories: Vec<String> = store
                .categories()
                .iter()
                .filter(|c| !c.hidden)
                .map(|c| match &c.hashtag {
                    Some(hashtag) => format!("<b>{}</b> (#{})", c.name, hashtag),
                    None => format!("<b>{}</b>", c.name),
                })
                .collect();
            let selection = if self.config.force_category_selection {
                "· Users must select a category."
            } else {
                "· Selecting a category is optional."
            };
            paragraphs.push(format!(
                "📊 <i>Categories</i>\n· Users are offered the categories: {}\n{}",
                categories.join(", "),
                selection
            ));
        }

        let mut security_help = "🛡️ <i>Security</i>\n\
            · The bot never reveals who answers from this chat. Everything you reply through the bot \
            reaches the user immediately and can only be taken back within 5 minutes, so be careful!"
            .to_string();
        if let Some(config) = self.anti_spam.config() {
            security_help.push_str(&format!(
                "\n· The bot limits how many messages users can send: currently at most {} messages per {}.",
                config.throttle_after_messages,
                format_duration(config.throttle_duration)
            ));
        }
        if self.banned_users_store.is_some() {
            security_help.push_str(
                "\n· Reply to a forwarded message with /ban to block the user and delete all their messages here",
            );
        }
        paragraphs.push(security_help);

        let log_destination = if self.config.message_log_to_admin_chat {
            "to this chat"
        } else {
            "to your private chat with the bot (write to it at least once first)"
        };
        paragraphs.push(format!(
            "📋 <i>Message log</i>\n\
             · Reply to a forwarded message with /log and the bot will forward the conversation with the user {}.\n\
             · The first {} messages are sent by default, use «/log 2», «/log 3» and so on for further pages",
            log_destination, self.config.message_log_page_size
        ));

        paragraphs.extend(self.integrations.iter().filter_map(|i| i.help_message_section()));

        if let Some(extra) = &self.config.admin_chat_help_extra {
            paragraphs.push(format!("🪄 <i>Other</i>\n{}", extra));
        }
        Ok(join_paragraphs(&paragraphs))
    }
}

fn join_hashtags(hashtags: &[String]) -> String {
    hashtags
        .iter()
        .map(|h| format!("#{}", h))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl IntegrationReplySink for FeedbackHandler {
    async fn message_replied_from_integration(
        &self,
        event: UserMessageRepliedEvent,
        notify_integrations: bool,
    ) -> ComponentResult<()> {
        debug!(?event, "Message replied from integration");
        if self.config.hashtags_in_admin_chat {
            self.remove_unanswered_hashtag(event.main_admin_chat_message_id).await?;
        }
        let integration_name = event.integration.as_deref().unwrap_or("integration");
        let via = match &event.reply_link {
            Some(link) => html_link(link, integration_name),
            None => html_escape(integration_name),
        };
        let author = html_escape(event.reply_author.as_deref().unwrap_or("<unknown admin>"));
        let mut text = format!("💬 <b>{}</b> via {}", author, via);
        if !event.reply_text.is_empty() {
            text.push_str(&format!("\n\n{}", event.reply_text));
        }
        if event.reply_has_attachments {
            text.push_str("\n\n📎 attachment");
        }
        let cloned_reply = self
            .bot
            .send_message(
                self.admin_chat_id,
                &text,
                SendOptions::html().reply_to(event.main_admin_chat_message_id),
            )
            .await?;
        self.message_log_store
            .push(event.origin_chat_id, &cloned_reply.message_id, true)
            .await?;

        if notify_integrations {
            self.notify_integrations(&event, event.integration.as_deref()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for FeedbackHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        let Some(message) = update.as_message() else {
            return Ok(HandlerResponse::Ignore);
        };
        if message.chat.id == self.admin_chat_id {
            return Ok(if self.handle_admin_chat_message(message).await? {
                HandlerResponse::Stop
            } else {
                HandlerResponse::Ignore
            });
        }
        if message.chat.chat_type == ChatType::Private && message.from.is_some() {
            if let Some(filter) = &self.config.custom_user_message_filter {
                if !filter.accept(message).await? {
                    return Ok(HandlerResponse::Ignore);
                }
            }
            self.handle_user_message(message, true).await?;
            return Ok(HandlerResponse::Stop);
        }
        Ok(HandlerResponse::Ignore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_hashtags() {
        assert_eq!(join_hashtags(&["new".to_string(), "bug".to_string()]), "#new #bug");
        assert_eq!(join_hashtags(&[]), "");
    }

    #[test]
    fn test_throttling_text() {
        let messages = ServiceMessages {
            throttling_template: Some("Please send no more than {} messages per {}!".into()),
            ..Default::default()
        };
        let config = AntiSpamConfig {
            throttle_after_messages: 5,
            throttle_duration: Duration::from_secs(60),
            soft_ban_after_throttle_violations: 10,
            soft_ban_duration: Duration::from_secs(3600),
        };
        assert_eq!(
            messages.throttling(&config, None).unwrap().as_deref(),
            Some("Please send no more than 5 messages per 0:01:00!")
        );
        assert_eq!(ServiceMessages::default().throttling(&config, None).unwrap(), None);
    }
}
