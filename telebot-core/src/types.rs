//! Core types: user, chat, message, callback query, update, handler response and the Handler trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    /// IETF language tag of the user's client, if known.
    pub language_code: Option<String>,
}

impl User {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            first_name: first_name.into(),
            last_name: None,
            username: None,
            language_code: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    pub fn with_language_code(mut self, code: impl Into<String>) -> Self {
        self.language_code = Some(code.into());
        self
    }

    /// First and last name joined by a space.
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub chat_type: ChatType,
    /// Supergroup with topics enabled.
    pub is_forum: bool,
}

impl Chat {
    pub fn private(id: i64) -> Self {
        Self {
            id,
            chat_type: ChatType::Private,
            is_forum: false,
        }
    }

    pub fn supergroup(id: i64, is_forum: bool) -> Self {
        Self {
            id,
            chat_type: ChatType::Supergroup,
            is_forum,
        }
    }
}

/// A message as seen by handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i32,
    pub chat: Chat,
    pub from: Option<User>,
    pub date: DateTime<Utc>,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Telegram content type: `text`, `photo`, `document`, `sticker`, ...
    pub content_type: String,
    pub message_thread_id: Option<i32>,
    pub is_topic_message: bool,
    pub forum_topic_created: bool,
    pub reply_to_message: Option<Box<Message>>,
}

impl Message {
    /// Plain text message, the common case in tests and emulated messages.
    pub fn text(id: i32, chat: Chat, from: Option<User>, text: impl Into<String>) -> Self {
        Self {
            id,
            chat,
            from,
            date: Utc::now(),
            text: Some(text.into()),
            caption: None,
            content_type: "text".to_string(),
            message_thread_id: None,
            is_topic_message: false,
            forum_topic_created: false,
            reply_to_message: None,
        }
    }

    pub fn in_thread(mut self, thread_id: i32) -> Self {
        self.message_thread_id = Some(thread_id);
        self.is_topic_message = true;
        self
    }

    pub fn replying_to(mut self, message: Message) -> Self {
        self.reply_to_message = Some(Box::new(message));
        self
    }

    /// Text or caption, whichever is present.
    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }

    /// Command name without slash and bot mention, e.g. `ban` for `/ban@my_bot 1`.
    pub fn command(&self) -> Option<&str> {
        let text = self.text.as_deref()?;
        let first = text.split_whitespace().next()?;
        let name = first.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    pub fn is_command(&self, name: &str) -> bool {
        self.command() == Some(name)
    }

    /// Whitespace-separated arguments following the command.
    pub fn command_arguments(&self) -> Vec<&str> {
        match (self.command(), self.text.as_deref()) {
            (Some(_), Some(text)) => text.split_whitespace().skip(1).collect(),
            _ => Vec::new(),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.from.as_ref().map(|u| u.id)
    }
}

/// Inline button press.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub data: Option<String>,
    /// Message the pressed keyboard is attached to, if still accessible.
    pub message: Option<Message>,
}

/// Incoming update dispatched through the [`crate::HandlerChain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Update {
    Message(Message),
    CallbackQuery(CallbackQuery),
}

impl Update {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Message(m) => m.from.as_ref(),
            Self::CallbackQuery(q) => Some(&q.from),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user().map(|u| u.id).unwrap_or(0)
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Message(m) => Some(m.chat.id),
            Self::CallbackQuery(q) => q.message.as_ref().map(|m| m.chat.id),
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::CallbackQuery(_) => None,
        }
    }

    pub fn as_callback_query(&self) -> Option<&CallbackQuery> {
        match self {
            Self::CallbackQuery(q) => Some(q),
            Self::Message(_) => None,
        }
    }
}

/// Handler result for the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerResponse {
    /// Pass to next handler.
    Continue,
    /// Update consumed; stop the chain.
    Stop,
    /// Not for this handler, try next.
    Ignore,
}

/// Converts a transport-specific user type to core [`User`].
pub trait ToCoreUser: Send + Sync {
    fn to_core(&self) -> User;
}

/// Converts a transport-specific message type to core [`Message`].
pub trait ToCoreMessage: Send + Sync {
    fn to_core(&self) -> Message;
}

/// Converts a transport-specific callback query to core [`CallbackQuery`].
pub trait ToCoreCallbackQuery: Send + Sync {
    fn to_core(&self) -> CallbackQuery;
}

/// Single handler concept: optional before / handle / after. Chain runs all before, then handle until Stop, then all after (reverse).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs before the handle phase. Return false to stop the chain.
    async fn before(&self, _update: &Update) -> crate::error::Result<bool> {
        Ok(true)
    }
    /// Processes the update. Return Stop to end the handle phase. Default: Continue.
    async fn handle(&self, _update: &Update) -> crate::error::Result<HandlerResponse> {
        Ok(HandlerResponse::Continue)
    }
    /// Runs after the handle phase (reverse order), with the final response.
    async fn after(&self, _update: &Update, _response: &HandlerResponse) -> crate::error::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let user = User::new(1, "Ada").with_last_name("Lovelace");
        assert_eq!(user.full_name(), "Ada Lovelace");
        assert_eq!(User::new(2, "Bob").full_name(), "Bob");
    }

    #[test]
    fn test_command_parsing() {
        let msg = Message::text(1, Chat::private(1), None, "/log@feedback_bot -2");
        assert_eq!(msg.command(), Some("log"));
        assert!(msg.is_command("log"));
        assert_eq!(msg.command_arguments(), vec!["-2"]);

        let plain = Message::text(2, Chat::private(1), None, "hello /log");
        assert_eq!(plain.command(), None);
        assert!(plain.command_arguments().is_empty());
    }
}
