//! Extension points of the feedback handler: integrations that receive every forwarded user
//! message and every admin reply, and the aux admin chat mirror built on top of them.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use telebot_core::{Message, User};
use telebot_stores::times::YEAR;
use telebot_stores::{DisplayCodec, KeyValueStore, RedisInterface};
use tracing::{debug, info};

use super::{FeedbackHandler, UserAnonymization, UserContent, UserReplier};
use crate::error::{ComponentError, ComponentResult};
use crate::stores::Category;

/// A user message that has just reached the admin chat.
pub struct ForwardedUserMessage<'a> {
    pub admin_chat_id: i64,
    pub admin_chat_message_id: i32,
    pub user: &'a User,
    /// `None` for emulated messages.
    pub user_message: Option<&'a Message>,
    pub category: Option<&'a Category>,
}

/// An admin has answered a user, either in the admin chat or through an integration.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessageRepliedEvent {
    pub origin_chat_id: i64,
    /// HTML.
    pub reply_text: String,
    pub reply_has_attachments: bool,
    pub reply_author: Option<String>,
    pub reply_link: Option<String>,
    /// The answered message, in the admin chat of whoever receives the event.
    pub main_admin_chat_message_id: i32,
    /// Name of the integration the reply went through; `None` for the admin chat itself.
    pub integration: Option<String>,
}

/// Receives replies made outside the admin chat. Implemented by [`FeedbackHandler`].
#[async_trait]
pub trait IntegrationReplySink: Send + Sync {
    async fn message_replied_from_integration(
        &self,
        event: UserMessageRepliedEvent,
        notify_integrations: bool,
    ) -> ComponentResult<()>;
}

/// Exports user messages somewhere else and/or accepts admin replies from there.
#[async_trait]
pub trait FeedbackIntegration: Send + Sync {
    /// Human-readable, also used to avoid echoing a reply back to where it came from.
    fn name(&self) -> String;

    /// Added to the admin chat `/help` when present; HTML.
    fn help_message_section(&self) -> Option<String> {
        None
    }

    async fn handle_user_message(&self, forwarded: &ForwardedUserMessage<'_>) -> ComponentResult<()>;

    async fn handle_user_message_replied_elsewhere(&self, event: UserMessageRepliedEvent) -> ComponentResult<()>;

    /// Called once the owning handler is shared; replies made through the integration go there.
    fn register_reply_sink(&self, _sink: Weak<dyn IntegrationReplySink>) {}
}

/// Message id mapping between the main and the aux admin chat.
struct AuxChatLinks {
    name: String,
    main_by_aux: KeyValueStore<i32>,
    aux_by_main: KeyValueStore<i32>,
    main_sink: RwLock<Option<Weak<dyn IntegrationReplySink>>>,
}

impl AuxChatLinks {
    async fn link(&self, main_message_id: i32, aux_message_id: i32) -> ComponentResult<()> {
        self.main_by_aux.save(aux_message_id, &main_message_id).await?;
        self.aux_by_main.save(main_message_id, &aux_message_id).await?;
        Ok(())
    }
}

/// The main handler as seen from the aux one: passes aux chat replies up.
struct MainChatIntegration {
    links: Arc<AuxChatLinks>,
}

const MAIN_CHAT_INTEGRATION_NAME: &str = "main admin chat";

#[async_trait]
impl FeedbackIntegration for MainChatIntegration {
    fn name(&self) -> String {
        MAIN_CHAT_INTEGRATION_NAME.to_string()
    }

    async fn handle_user_message(&self, _forwarded: &ForwardedUserMessage<'_>) -> ComponentResult<()> {
        Ok(())
    }

    async fn handle_user_message_replied_elsewhere(&self, mut event: UserMessageRepliedEvent) -> ComponentResult<()> {
        let sink = self.links.main_sink.read().clone().and_then(|weak| weak.upgrade());
        let Some(sink) = sink else {
            debug!("Main feedback handler is gone, not mirroring the reply");
            return Ok(());
        };
        let Some(main_message_id) = self.links.main_by_aux.load(event.main_admin_chat_message_id).await? else {
            info!("Message in aux admin chat has no saved main admin chat message id, ignoring");
            return Ok(());
        };
        event.main_admin_chat_message_id = main_message_id;
        event.integration = Some(self.links.name.clone());
        sink.message_replied_from_integration(event, true).await
    }
}

/// A second feedback handler plugged into the main one: every user message also lands in the
/// aux admin chat, and replies from either chat are mirrored to the other.
///
/// Put [`AuxFeedbackIntegration::handler`] into the chain after the main handler so the aux chat
/// gets its admin commands; keep only it when the main chat is retired.
pub struct AuxFeedbackIntegration {
    handler: Arc<FeedbackHandler>,
    links: Arc<AuxChatLinks>,
}

impl AuxFeedbackIntegration {
    pub fn new(mut handler: FeedbackHandler, redis: Arc<dyn RedisInterface>, bot_prefix: &str) -> ComponentResult<Self> {
        if !handler.integrations.is_empty() {
            return Err(ComponentError::Config(
                "aux feedback handler can't have integrations itself".to_string(),
            ));
        }
        let suffix = handler.config.name.clone();
        let name = if suffix.is_empty() {
            "<unnamed feedback handler>".to_string()
        } else {
            suffix.clone()
        };
        let links = Arc::new(AuxChatLinks {
            name,
            main_by_aux: KeyValueStore::with_codec(
                &format!("main-by-aux-msg-id-{}", suffix),
                bot_prefix,
                redis.clone(),
                DisplayCodec,
            )?
            .with_expiration(Some(YEAR)),
            aux_by_main: KeyValueStore::with_codec(
                &format!("aux-by-main-msg-id-{}", suffix),
                bot_prefix,
                redis,
                DisplayCodec,
            )?
            .with_expiration(Some(YEAR)),
            main_sink: RwLock::new(None),
        });
        handler.integrations.push(Arc::new(MainChatIntegration { links: links.clone() }));
        Ok(Self {
            handler: handler.into_shared(),
            links,
        })
    }

    pub fn handler(&self) -> Arc<FeedbackHandler> {
        self.handler.clone()
    }
}

#[async_trait]
impl FeedbackIntegration for AuxFeedbackIntegration {
    fn name(&self) -> String {
        self.links.name.clone()
    }

    async fn handle_user_message(&self, forwarded: &ForwardedUserMessage<'_>) -> ComponentResult<()> {
        let aux_message_id = match forwarded.user_message {
            Some(message) => self.handler.handle_user_message(message, false).await?,
            None => {
                // emulated message: clone what the main chat got
                let content = UserContent::Copy {
                    from_chat_id: forwarded.admin_chat_id,
                    message_id: forwarded.admin_chat_message_id,
                };
                let send_user_identifier = self.handler.config.user_anonymization != UserAnonymization::Legacy;
                self.handler
                    .process_user_message(forwarded.user, content, UserReplier::Silent, send_user_identifier)
                    .await?
            }
        };
        if let Some(aux_message_id) = aux_message_id {
            self.links.link(forwarded.admin_chat_message_id, aux_message_id).await?;
        }
        Ok(())
    }

    async fn handle_user_message_replied_elsewhere(&self, mut event: UserMessageRepliedEvent) -> ComponentResult<()> {
        let Some(aux_message_id) = self.links.aux_by_main.load(event.main_admin_chat_message_id).await? else {
            info!("Message in the main admin chat has no saved aux admin chat message id, ignoring");
            return Ok(());
        };
        event.main_admin_chat_message_id = aux_message_id;
        if event.integration.is_none() {
            event.integration = Some(MAIN_CHAT_INTEGRATION_NAME.to_string());
        }
        self.handler.message_replied_from_integration(event, false).await
    }

    fn register_reply_sink(&self, sink: Weak<dyn IntegrationReplySink>) {
        *self.links.main_sink.write() = Some(sink);
    }
}
