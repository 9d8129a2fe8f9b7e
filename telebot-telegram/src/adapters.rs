//! Adapters from Telegram (teloxide) types to telebot_core types.

use serde_json::Value;
use telebot_core::{CallbackQuery, Chat, ChatType, Message, ToCoreCallbackQuery, ToCoreMessage, ToCoreUser, User};

/// Wraps a teloxide User for conversion to core [`User`].
pub struct TelegramUserWrapper<'a>(pub &'a teloxide::types::User);

impl<'a> ToCoreUser for TelegramUserWrapper<'a> {
    fn to_core(&self) -> User {
        User {
            id: self.0.id.0 as i64,
            is_bot: self.0.is_bot,
            first_name: self.0.first_name.clone(),
            last_name: self.0.last_name.clone(),
            username: self.0.username.clone(),
            language_code: self.0.language_code.clone(),
        }
    }
}

/// Chat type and forum flag as they appear in the Bot API JSON.
///
/// Works for both message chats and full chat info returned by `getChat`.
pub(crate) fn chat_from_json(id: i64, chat: &Value) -> Chat {
    let chat_type = match chat.get("type").and_then(Value::as_str) {
        Some("group") => ChatType::Group,
        Some("supergroup") => ChatType::Supergroup,
        Some("channel") => ChatType::Channel,
        _ => ChatType::Private,
    };
    let is_forum = chat.get("is_forum").and_then(Value::as_bool).unwrap_or(false);
    Chat {
        id,
        chat_type,
        is_forum,
    }
}

/// Wraps a teloxide Message for conversion to core [`Message`].
pub struct TelegramMessageWrapper<'a>(pub &'a teloxide::types::Message);

impl<'a> ToCoreMessage for TelegramMessageWrapper<'a> {
    fn to_core(&self) -> Message {
        let msg = self.0;
        let chat_json = serde_json::to_value(&msg.chat).unwrap_or_default();
        Message {
            id: msg.id.0,
            chat: chat_from_json(msg.chat.id.0, &chat_json),
            from: msg.from.as_ref().map(|u| TelegramUserWrapper(u).to_core()),
            date: msg.date,
            text: msg.text().map(str::to_string),
            caption: msg.caption().map(str::to_string),
            content_type: self.content_type().to_string(),
            message_thread_id: msg.thread_id.map(|thread| thread.0 .0),
            is_topic_message: msg.is_topic_message,
            forum_topic_created: msg.forum_topic_created().is_some(),
            reply_to_message: msg
                .reply_to_message()
                .map(|reply| Box::new(TelegramMessageWrapper(reply).to_core())),
        }
    }
}

impl<'a> TelegramMessageWrapper<'a> {
    fn content_type(&self) -> &'static str {
        let msg = self.0;
        if msg.text().is_some() {
            "text"
        } else if msg.photo().is_some() {
            "photo"
        } else if msg.document().is_some() {
            "document"
        } else if msg.sticker().is_some() {
            "sticker"
        } else if msg.video().is_some() {
            "video"
        } else if msg.animation().is_some() {
            "animation"
        } else if msg.voice().is_some() {
            "voice"
        } else if msg.video_note().is_some() {
            "video_note"
        } else if msg.audio().is_some() {
            "audio"
        } else if msg.location().is_some() {
            "location"
        } else if msg.contact().is_some() {
            "contact"
        } else if msg.poll().is_some() {
            "poll"
        } else {
            "unknown"
        }
    }
}

/// Wraps a teloxide CallbackQuery for conversion to core [`CallbackQuery`].
///
/// Inaccessible (too old) messages are dropped.
pub struct TelegramCallbackQueryWrapper<'a>(pub &'a teloxide::types::CallbackQuery);

impl<'a> ToCoreCallbackQuery for TelegramCallbackQueryWrapper<'a> {
    fn to_core(&self) -> CallbackQuery {
        CallbackQuery {
            id: self.0.id.0.clone(),
            from: TelegramUserWrapper(&self.0.from).to_core(),
            data: self.0.data.clone(),
            message: self
                .0
                .regular_message()
                .map(|m| TelegramMessageWrapper(m).to_core()),
        }
    }
}
