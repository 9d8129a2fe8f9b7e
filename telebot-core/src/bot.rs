//! Bot API abstraction used by all components.
//!
//! [`BotApi`] is transport-agnostic; telebot-telegram implements it via teloxide and tests use
//! [`crate::testing::RecordingBot`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BotResult;
use crate::keyboard::{InlineKeyboardMarkup, ParseMode, ReplyMarkup};
use crate::types::{Chat, User};

/// Optional parameters shared by send/copy calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<ReplyMarkup>,
    pub message_thread_id: Option<i32>,
    pub reply_to_message_id: Option<i32>,
    pub disable_web_page_preview: bool,
    pub disable_notification: bool,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn html() -> Self {
        Self::default().parse_mode(ParseMode::Html)
    }

    pub fn parse_mode(mut self, parse_mode: ParseMode) -> Self {
        self.parse_mode = Some(parse_mode);
        self
    }

    pub fn reply_markup(mut self, markup: impl Into<ReplyMarkup>) -> Self {
        self.reply_markup = Some(markup.into());
        self
    }

    pub fn thread(mut self, message_thread_id: Option<i32>) -> Self {
        self.message_thread_id = message_thread_id;
        self
    }

    pub fn reply_to(mut self, message_id: i32) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }

    pub fn no_preview(mut self) -> Self {
        self.disable_web_page_preview = true;
        self
    }
}

/// Optional parameters for edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

impl EditOptions {
    pub fn with_markup(markup: InlineKeyboardMarkup) -> Self {
        Self {
            parse_mode: None,
            reply_markup: Some(markup),
        }
    }
}

/// Identifies a message the bot has just sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub message_thread_id: Option<i32>,
}

/// The subset of the Telegram Bot API the components use.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn get_me(&self) -> BotResult<User>;

    async fn send_message(&self, chat_id: i64, text: &str, options: SendOptions) -> BotResult<SentMessage>;

    /// Copies a message without the "forwarded from" header. Returns the new message id.
    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        options: SendOptions,
    ) -> BotResult<i32>;

    async fn forward_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        message_thread_id: Option<i32>,
    ) -> BotResult<SentMessage>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> BotResult<()>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        options: EditOptions,
    ) -> BotResult<()>;

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i32,
        markup: Option<InlineKeyboardMarkup>,
    ) -> BotResult<()>;

    async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>, show_alert: bool) -> BotResult<()>;

    async fn get_chat(&self, chat_id: i64) -> BotResult<Chat>;

    /// Creates a forum topic and returns its message thread id.
    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_color: Option<u32>,
        icon_custom_emoji_id: Option<&str>,
    ) -> BotResult<i32>;

    async fn edit_forum_topic(
        &self,
        chat_id: i64,
        message_thread_id: i32,
        name: &str,
        icon_custom_emoji_id: Option<&str>,
    ) -> BotResult<()>;

    async fn delete_forum_topic(&self, chat_id: i64, message_thread_id: i32) -> BotResult<()>;
}
