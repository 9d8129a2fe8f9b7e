use serde::{Deserialize, Serialize};
use telebot_core::keyboard::ParseMode;
use telebot_core::{BotApi, BotResult, Message, SendOptions};

use super::subscriber::Subscriber;

/// What a broadcast delivers to each subscriber. Stored in Redis as tagged JSON.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSender {
    Text {
        text: String,
        #[serde(default = "default_parse_mode")]
        parse_mode: Option<ParseMode>,
    },
    Copy {
        source_chat_id: i64,
        source_message_id: i32,
    },
}

fn default_parse_mode() -> Option<ParseMode> {
    Some(ParseMode::Html)
}

impl MessageSender {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            parse_mode: default_parse_mode(),
        }
    }

    /// Re-sends an existing message (e.g. one an admin wrote to the bot) without the "forwarded" header.
    pub fn from_message(message: &Message) -> Self {
        Self::Copy {
            source_chat_id: message.chat.id,
            source_message_id: message.id,
        }
    }

    pub async fn send(&self, bot: &dyn BotApi, subscriber: &Subscriber) -> BotResult<()> {
        match self {
            Self::Text { text, parse_mode } => {
                let mut options = SendOptions::new();
                options.parse_mode = *parse_mode;
                bot.send_message(subscriber.user_id, text, options).await?;
            }
            Self::Copy {
                source_chat_id,
                source_message_id,
            } => {
                bot.copy_message(subscriber.user_id, *source_chat_id, *source_message_id, SendOptions::new())
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_sender_json() {
        let sender = MessageSender::text("<b>hi</b>");
        let dump = serde_json::to_string(&sender).unwrap();
        assert_eq!(dump, r#"{"type":"text","text":"<b>hi</b>","parse_mode":"HTML"}"#);

        let copy: MessageSender =
            serde_json::from_str(r#"{"type":"copy","source_chat_id":-100,"source_message_id":7}"#).unwrap();
        assert_eq!(
            copy,
            MessageSender::Copy {
                source_chat_id: -100,
                source_message_id: 7
            }
        );

        let plain: MessageSender = serde_json::from_str(r#"{"type":"text","text":"x"}"#).unwrap();
        assert_eq!(plain, MessageSender::text("x"));
    }
}
