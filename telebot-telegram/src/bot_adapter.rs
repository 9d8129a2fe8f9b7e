//! Wraps teloxide::Bot and implements [`telebot_core::BotApi`]. Production code talks to Telegram;
//! tests substitute [`telebot_core::testing::RecordingBot`].

use async_trait::async_trait;
use telebot_core::{
    BotApi, BotError, BotResult, Chat, EditOptions, InlineKeyboardMarkup, ParseMode, ReplyMarkup, SendOptions,
    SentMessage, ToCoreUser, User,
};
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQueryId, ChatId, CustomEmojiId, KeyboardButton, KeyboardMarkup, KeyboardRemove, LinkPreviewOptions,
    MessageId, ReplyParameters, Rgb, ThreadId,
};
use teloxide::RequestError;
use tracing::debug;

use crate::adapters::{chat_from_json, TelegramUserWrapper};

/// Thin wrapper around teloxide::Bot that implements telebot-core's BotApi trait.
#[derive(Clone)]
pub struct TelegramBotAdapter {
    bot: teloxide::Bot,
}

impl TelegramBotAdapter {
    pub fn new(bot: teloxide::Bot) -> Self {
        Self { bot }
    }

    /// Returns the underlying teloxide::Bot for direct API use when needed.
    pub fn inner(&self) -> &teloxide::Bot {
        &self.bot
    }
}

/// Flood control becomes [`BotError::RateLimited`] so callers can wait and retry.
pub(crate) fn map_error(error: RequestError) -> BotError {
    match error {
        RequestError::RetryAfter(seconds) => BotError::RateLimited {
            retry_after: seconds.seconds() as u64,
        },
        RequestError::Api(api) => BotError::api(api.to_string()),
        RequestError::Network(e) => BotError::Network(e.to_string()),
        other => BotError::InvalidResponse(other.to_string()),
    }
}

fn parse_mode(mode: ParseMode) -> teloxide::types::ParseMode {
    match mode {
        ParseMode::Html => teloxide::types::ParseMode::Html,
        ParseMode::MarkdownV2 => teloxide::types::ParseMode::MarkdownV2,
    }
}

fn inline_markup(markup: &InlineKeyboardMarkup) -> BotResult<teloxide::types::InlineKeyboardMarkup> {
    let rows = markup
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| match (&button.callback_data, &button.url) {
                    (_, Some(url)) => {
                        let url = reqwest::Url::parse(url)
                            .map_err(|e| BotError::InvalidResponse(format!("bad button url {:?}: {}", url, e)))?;
                        Ok(teloxide::types::InlineKeyboardButton::url(button.text.clone(), url))
                    }
                    (Some(data), None) => Ok(teloxide::types::InlineKeyboardButton::callback(
                        button.text.clone(),
                        data.clone(),
                    )),
                    (None, None) => Err(BotError::InvalidResponse(format!(
                        "button {:?} has neither callback data nor url",
                        button.text
                    ))),
                })
                .collect::<BotResult<Vec<_>>>()
        })
        .collect::<BotResult<Vec<_>>>()?;
    Ok(teloxide::types::InlineKeyboardMarkup::new(rows))
}

fn reply_markup(markup: &ReplyMarkup) -> BotResult<teloxide::types::ReplyMarkup> {
    Ok(match markup {
        ReplyMarkup::Inline(inline) => teloxide::types::ReplyMarkup::InlineKeyboard(inline_markup(inline)?),
        ReplyMarkup::Keyboard(keyboard) => {
            let rows = keyboard
                .keyboard
                .iter()
                .map(|row| row.iter().map(|b| KeyboardButton::new(b.text.clone())).collect::<Vec<_>>());
            let mut markup = KeyboardMarkup::new(rows);
            markup.resize_keyboard = keyboard.resize_keyboard;
            markup.one_time_keyboard = keyboard.one_time_keyboard;
            teloxide::types::ReplyMarkup::Keyboard(markup)
        }
        ReplyMarkup::Remove => teloxide::types::ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    })
}

fn thread(message_thread_id: i32) -> ThreadId {
    ThreadId(MessageId(message_thread_id))
}

/// Applies the [`SendOptions`] shared by sendMessage and copyMessage to a request builder.
macro_rules! with_send_options {
    ($request:expr, $options:expr) => {{
        let options: &SendOptions = $options;
        let mut request = $request;
        if let Some(mode) = options.parse_mode {
            request = request.parse_mode(parse_mode(mode));
        }
        if let Some(markup) = &options.reply_markup {
            request = request.reply_markup(reply_markup(markup)?);
        }
        if let Some(thread_id) = options.message_thread_id {
            request = request.message_thread_id(thread(thread_id));
        }
        if let Some(reply_to) = options.reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }
        if options.disable_notification {
            request = request.disable_notification(true);
        }
        request
    }};
}

#[async_trait]
impl BotApi for TelegramBotAdapter {
    async fn get_me(&self) -> BotResult<User> {
        let me = self.bot.get_me().await.map_err(map_error)?;
        Ok(TelegramUserWrapper(&me.user).to_core())
    }

    async fn send_message(&self, chat_id: i64, text: &str, options: SendOptions) -> BotResult<SentMessage> {
        let mut request = with_send_options!(self.bot.send_message(ChatId(chat_id), text), &options);
        if options.disable_web_page_preview {
            request = request.link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            });
        }
        let sent = request.await.map_err(map_error)?;
        debug!(chat_id, message_id = sent.id.0, "Message sent");
        Ok(SentMessage {
            chat_id,
            message_id: sent.id.0,
            message_thread_id: sent.thread_id.map(|t| t.0 .0),
        })
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        options: SendOptions,
    ) -> BotResult<i32> {
        let request = with_send_options!(
            self.bot
                .copy_message(ChatId(chat_id), ChatId(from_chat_id), MessageId(message_id)),
            &options
        );
        let copied = request.await.map_err(map_error)?;
        Ok(copied.0)
    }

    async fn forward_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        message_thread_id: Option<i32>,
    ) -> BotResult<SentMessage> {
        let mut request = self
            .bot
            .forward_message(ChatId(chat_id), ChatId(from_chat_id), MessageId(message_id));
        if let Some(thread_id) = message_thread_id {
            request = request.message_thread_id(thread(thread_id));
        }
        let forwarded = request.await.map_err(map_error)?;
        Ok(SentMessage {
            chat_id,
            message_id: forwarded.id.0,
            message_thread_id: forwarded.thread_id.map(|t| t.0 .0),
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> BotResult<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        options: EditOptions,
    ) -> BotResult<()> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text);
        if let Some(mode) = options.parse_mode {
            request = request.parse_mode(parse_mode(mode));
        }
        if let Some(markup) = &options.reply_markup {
            request = request.reply_markup(inline_markup(markup)?);
        }
        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i32,
        markup: Option<InlineKeyboardMarkup>,
    ) -> BotResult<()> {
        let mut request = self
            .bot
            .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id));
        if let Some(markup) = &markup {
            request = request.reply_markup(inline_markup(markup)?);
        }
        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>, show_alert: bool) -> BotResult<()> {
        let mut request = self
            .bot
            .answer_callback_query(CallbackQueryId(callback_query_id.to_string()));
        if let Some(text) = text {
            request = request.text(text);
        }
        if show_alert {
            request = request.show_alert(true);
        }
        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> BotResult<Chat> {
        let chat = self.bot.get_chat(ChatId(chat_id)).await.map_err(map_error)?;
        let json = serde_json::to_value(&chat).map_err(|e| BotError::InvalidResponse(e.to_string()))?;
        Ok(chat_from_json(chat_id, &json))
    }

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_color: Option<u32>,
        icon_custom_emoji_id: Option<&str>,
    ) -> BotResult<i32> {
        let mut request = self.bot.create_forum_topic(ChatId(chat_id), name);
        if let Some(color) = icon_color {
            request = request.icon_color(Rgb::from_u32(color));
        }
        if let Some(emoji_id) = icon_custom_emoji_id {
            request = request.icon_custom_emoji_id(CustomEmojiId(emoji_id.to_string()));
        }
        let topic = request.await.map_err(map_error)?;
        Ok(topic.thread_id.0 .0)
    }

    async fn edit_forum_topic(
        &self,
        chat_id: i64,
        message_thread_id: i32,
        name: &str,
        icon_custom_emoji_id: Option<&str>,
    ) -> BotResult<()> {
        let mut request = self
            .bot
            .edit_forum_topic(ChatId(chat_id), thread(message_thread_id))
            .name(name);
        if let Some(emoji_id) = icon_custom_emoji_id {
            request = request.icon_custom_emoji_id(CustomEmojiId(emoji_id.to_string()));
        }
        request.await.map_err(map_error)?;
        Ok(())
    }

    async fn delete_forum_topic(&self, chat_id: i64, message_thread_id: i32) -> BotResult<()> {
        self.bot
            .delete_forum_topic(ChatId(chat_id), thread(message_thread_id))
            .await
            .map_err(map_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telebot_core::{InlineKeyboardButton, KeyboardButton as CoreKeyboardButton, ReplyKeyboardMarkup};

    /// **Test: Inline markup keeps rows, callback data and url buttons.**
    #[test]
    fn test_inline_markup_conversion() {
        let markup = InlineKeyboardMarkup::new(vec![
            vec![
                InlineKeyboardButton::callback("Yes", "menu:1"),
                InlineKeyboardButton::callback("No", "menu:2"),
            ],
            vec![InlineKeyboardButton::url("Site", "https://example.org/")],
        ]);

        let converted = inline_markup(&markup).unwrap();

        assert_eq!(converted.inline_keyboard.len(), 2);
        assert_eq!(converted.inline_keyboard[0].len(), 2);
        assert_eq!(converted.inline_keyboard[0][1].text, "No");
        assert_eq!(converted.inline_keyboard[1][0].text, "Site");
    }

    /// **Test: Buttons with an unparsable url or without any action are rejected.**
    #[test]
    fn test_invalid_buttons_rejected() {
        let bad_url = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url("x", "not a url")]]);
        assert!(matches!(inline_markup(&bad_url), Err(BotError::InvalidResponse(_))));

        let empty = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton {
            text: "x".to_string(),
            callback_data: None,
            url: None,
        }]]);
        assert!(inline_markup(&empty).is_err());
    }

    /// **Test: Reply keyboards keep their flags; removal maps to KeyboardRemove.**
    #[test]
    fn test_reply_markup_conversion() {
        let keyboard = ReplyKeyboardMarkup {
            keyboard: vec![vec![CoreKeyboardButton::new("Start")]],
            resize_keyboard: true,
            one_time_keyboard: false,
        };
        match reply_markup(&ReplyMarkup::Keyboard(keyboard)).unwrap() {
            teloxide::types::ReplyMarkup::Keyboard(markup) => {
                assert!(markup.resize_keyboard);
                assert_eq!(markup.keyboard[0][0].text, "Start");
            }
            other => panic!("unexpected markup {:?}", other),
        }
        assert!(matches!(
            reply_markup(&ReplyMarkup::Remove).unwrap(),
            teloxide::types::ReplyMarkup::KeyboardRemove(_)
        ));
    }
}
