//! In-memory [`BotApi`] double that records every call.
//!
//! Sent messages get increasing ids; tests inspect [`RecordingBot::calls`] or the typed helpers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::bot::{BotApi, EditOptions, SendOptions, SentMessage};
use crate::error::{BotError, BotResult};
use crate::keyboard::InlineKeyboardMarkup;
use crate::types::{Chat, User};

/// One recorded API call.
#[derive(Debug, Clone, PartialEq)]
pub enum BotCall {
    SendMessage {
        chat_id: i64,
        text: String,
        options: SendOptions,
        message_id: i32,
    },
    CopyMessage {
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        options: SendOptions,
        new_message_id: i32,
    },
    ForwardMessage {
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        message_thread_id: Option<i32>,
        new_message_id: i32,
    },
    DeleteMessage {
        chat_id: i64,
        message_id: i32,
    },
    EditMessageText {
        chat_id: i64,
        message_id: i32,
        text: String,
        options: EditOptions,
    },
    EditMessageReplyMarkup {
        chat_id: i64,
        message_id: i32,
        markup: Option<InlineKeyboardMarkup>,
    },
    AnswerCallbackQuery {
        callback_query_id: String,
        text: Option<String>,
        show_alert: bool,
    },
    GetChat {
        chat_id: i64,
    },
    CreateForumTopic {
        chat_id: i64,
        name: String,
        icon_color: Option<u32>,
        message_thread_id: i32,
    },
    EditForumTopic {
        chat_id: i64,
        message_thread_id: i32,
        name: String,
    },
    DeleteForumTopic {
        chat_id: i64,
        message_thread_id: i32,
    },
}

/// Mock bot: records calls, hands out sequential ids, can be told to fail specific methods.
pub struct RecordingBot {
    calls: Mutex<Vec<BotCall>>,
    next_id: AtomicI32,
    chats: Mutex<HashMap<i64, Chat>>,
    failures: Mutex<HashMap<&'static str, Vec<BotError>>>,
}

impl Default for RecordingBot {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(1000),
            chats: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RecordingBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers what `get_chat` returns for `chat.id`.
    pub async fn set_chat(&self, chat: Chat) {
        self.chats.lock().await.insert(chat.id, chat);
    }

    /// Queues an error for the next call to `method` (e.g. `"send_message"`).
    pub async fn fail_next(&self, method: &'static str, error: BotError) {
        self.failures.lock().await.entry(method).or_default().push(error);
    }

    pub async fn calls(&self) -> Vec<BotCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }

    /// `(chat_id, text)` of every sent message.
    pub async fn sent_texts(&self) -> Vec<(i64, String)> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                BotCall::SendMessage { chat_id, text, .. } => Some((*chat_id, text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Count of messages delivered to `chat_id` by send, copy or forward.
    pub async fn delivered_to(&self, chat_id: i64) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| match c {
                BotCall::SendMessage { chat_id: c, .. }
                | BotCall::CopyMessage { chat_id: c, .. }
                | BotCall::ForwardMessage { chat_id: c, .. } => *c == chat_id,
                _ => false,
            })
            .count()
    }

    async fn take_failure(&self, method: &'static str) -> BotResult<()> {
        let mut failures = self.failures.lock().await;
        match failures.get_mut(method) {
            Some(queue) if !queue.is_empty() => Err(queue.remove(0)),
            _ => Ok(()),
        }
    }

    async fn record(&self, call: BotCall) {
        self.calls.lock().await.push(call);
    }

    fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl BotApi for RecordingBot {
    async fn get_me(&self) -> BotResult<User> {
        let mut me = User::new(1, "Test bot").with_username("test_bot");
        me.is_bot = true;
        Ok(me)
    }

    async fn send_message(&self, chat_id: i64, text: &str, options: SendOptions) -> BotResult<SentMessage> {
        self.take_failure("send_message").await?;
        let message_id = self.next_id();
        let message_thread_id = options.message_thread_id;
        self.record(BotCall::SendMessage {
            chat_id,
            text: text.to_string(),
            options,
            message_id,
        })
        .await;
        Ok(SentMessage {
            chat_id,
            message_id,
            message_thread_id,
        })
    }

    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        options: SendOptions,
    ) -> BotResult<i32> {
        self.take_failure("copy_message").await?;
        let new_message_id = self.next_id();
        self.record(BotCall::CopyMessage {
            chat_id,
            from_chat_id,
            message_id,
            options,
            new_message_id,
        })
        .await;
        Ok(new_message_id)
    }

    async fn forward_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i32,
        message_thread_id: Option<i32>,
    ) -> BotResult<SentMessage> {
        self.take_failure("forward_message").await?;
        let new_message_id = self.next_id();
        self.record(BotCall::ForwardMessage {
            chat_id,
            from_chat_id,
            message_id,
            message_thread_id,
            new_message_id,
        })
        .await;
        Ok(SentMessage {
            chat_id,
            message_id: new_message_id,
            message_thread_id,
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> BotResult<()> {
        self.take_failure("delete_message").await?;
        self.record(BotCall::DeleteMessage { chat_id, message_id }).await;
        Ok(())
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        options: EditOptions,
    ) -> BotResult<()> {
        self.take_failure("edit_message_text").await?;
        self.record(BotCall::EditMessageText {
            chat_id,
            message_id,
            text: text.to_string(),
            options,
        })
        .await;
        Ok(())
    }

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i32,
        markup: Option<InlineKeyboardMarkup>,
    ) -> BotResult<()> {
        self.take_failure("edit_message_reply_markup").await?;
        self.record(BotCall::EditMessageReplyMarkup {
            chat_id,
            message_id,
            markup,
        })
        .await;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>, show_alert: bool) -> BotResult<()> {
        self.record(BotCall::AnswerCallbackQuery {
            callback_query_id: callback_query_id.to_string(),
            text: text.map(str::to_string),
            show_alert,
        })
        .await;
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> BotResult<Chat> {
        self.take_failure("get_chat").await?;
        self.record(BotCall::GetChat { chat_id }).await;
        Ok(self
            .chats
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_else(|| Chat::private(chat_id)))
    }

    async fn create_forum_topic(
        &self,
        chat_id: i64,
        name: &str,
        icon_color: Option<u32>,
        _icon_custom_emoji_id: Option<&str>,
    ) -> BotResult<i32> {
        self.take_failure("create_forum_topic").await?;
        let message_thread_id = self.next_id();
        self.record(BotCall::CreateForumTopic {
            chat_id,
            name: name.to_string(),
            icon_color,
            message_thread_id,
        })
        .await;
        Ok(message_thread_id)
    }

    async fn edit_forum_topic(
        &self,
        chat_id: i64,
        message_thread_id: i32,
        name: &str,
        _icon_custom_emoji_id: Option<&str>,
    ) -> BotResult<()> {
        self.take_failure("edit_forum_topic").await?;
        self.record(BotCall::EditForumTopic {
            chat_id,
            message_thread_id,
            name: name.to_string(),
        })
        .await;
        Ok(())
    }

    async fn delete_forum_topic(&self, chat_id: i64, message_thread_id: i32) -> BotResult<()> {
        self.take_failure("delete_forum_topic").await?;
        self.record(BotCall::DeleteForumTopic {
            chat_id,
            message_thread_id,
        })
        .await;
        Ok(())
    }
}
