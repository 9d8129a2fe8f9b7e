//! User-selected categories (e.g. topics of a feedback request).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use telebot_core::{
    BotApi, CallbackData, CallbackQuery, Handler, HandlerResponse, InlineKeyboardButton, InlineKeyboardMarkup,
    Message, Update, User,
};
use telebot_stores::times::DAY;
use telebot_stores::{DisplayCodec, KeyValueStore, RedisInterface};
use tracing::{debug, error, instrument};

use crate::error::{ComponentError, ComponentResult};
use crate::language::AnyText;
use crate::stores::language::{validate_any_text, LanguageStoreInterface};
use crate::stores::utils::callback_query_processing_error;

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub button_caption: AnyText,
    pub hashtag: Option<String>,
    /// Hidden from the menu for new users but kept for those who already selected it.
    pub hidden: bool,
}

impl Category {
    pub fn new(id: i64, name: impl Into<String>, button_caption: impl Into<AnyText>) -> Self {
        Self {
            id,
            name: name.into(),
            button_caption: button_caption.into(),
            hashtag: None,
            hidden: false,
        }
    }

    pub fn with_hashtag(mut self, hashtag: impl Into<String>) -> Self {
        self.hashtag = Some(hashtag.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

pub struct CategorySelectedContext {
    pub bot: Arc<dyn BotApi>,
    pub message: Option<Message>,
    pub user: User,
    pub category: Category,
}

#[async_trait]
pub trait CategorySelectedHook: Send + Sync {
    async fn on_category_selected(&self, context: CategorySelectedContext) -> ComponentResult<()>;
}

pub struct CategoryStore {
    categories: Vec<Category>,
    categories_by_id: HashMap<i64, Category>,
    user_category_store: KeyValueStore<i64>,
    callback_data: CallbackData,
    language_store: Option<Arc<dyn LanguageStoreInterface>>,
}

impl CategoryStore {
    pub const DEFAULT_CATEGORY_TTL: Duration = Duration::from_secs(15 * DAY.as_secs());

    pub fn new(
        bot_prefix: &str,
        redis: Arc<dyn RedisInterface>,
        categories: Vec<Category>,
        category_ttl: Duration,
        language_store: Option<Arc<dyn LanguageStoreInterface>>,
    ) -> ComponentResult<Self> {
        for category in &categories {
            validate_any_text(&category.button_caption, language_store.as_deref()).map_err(|e| {
                ComponentError::Config(format!("button caption of category {:?}: {}", category.name, e))
            })?;
        }
        Ok(Self {
            categories_by_id: categories.iter().map(|c| (c.id, c.clone())).collect(),
            categories,
            user_category_store: KeyValueStore::with_codec("user-category", bot_prefix, redis, DisplayCodec)?
                .with_expiration(Some(category_ttl)),
            callback_data: CallbackData::new("category", &["cat_id"]),
            language_store,
        })
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn get_category(&self, id: i64) -> Option<&Category> {
        self.categories_by_id.get(&id)
    }

    pub async fn save_user_category(&self, user: &User, category: &Category) -> ComponentResult<bool> {
        Ok(self.user_category_store.save(user.id, &category.id).await?)
    }

    /// The selected category; `None` if nothing is selected, the selection expired, or the
    /// category is no longer configured.
    pub async fn get_user_category(&self, user: &User) -> ComponentResult<Option<Category>> {
        let id = self.user_category_store.load(user.id).await?;
        Ok(id.and_then(|id| self.categories_by_id.get(&id).cloned()))
    }

    /// One button per visible category; the user's current one is checked.
    pub async fn markup(&self, user: &User) -> ComponentResult<InlineKeyboardMarkup> {
        let language = match &self.language_store {
            Some(store) => Some(store.get_user_language(user).await?),
            None => None,
        };
        let current = self.get_user_category(user).await?;
        let rows = self
            .categories
            .iter()
            .filter(|c| !c.hidden)
            .map(|category| {
                let mut caption = category.button_caption.to_str(language.as_ref())?.to_string();
                if current.as_ref().is_some_and(|c| c.id == category.id) {
                    caption = format!("✅ {}", caption);
                }
                let data = self.callback_data.new_data(&[&category.id.to_string()])?;
                Ok(vec![InlineKeyboardButton::callback(caption, data)])
            })
            .collect::<ComponentResult<Vec<_>>>()?;
        Ok(InlineKeyboardMarkup::new(rows))
    }

    pub fn setup(
        self: Arc<Self>,
        bot: Arc<dyn BotApi>,
        on_category_selected: Option<Arc<dyn CategorySelectedHook>>,
    ) -> CategoryHandler {
        CategoryHandler {
            store: self,
            bot,
            on_category_selected,
        }
    }
}

/// Processes `category:<id>` callback queries.
pub struct CategoryHandler {
    store: Arc<CategoryStore>,
    bot: Arc<dyn BotApi>,
    on_category_selected: Option<Arc<dyn CategorySelectedHook>>,
}

impl CategoryHandler {
    #[instrument(skip(self, call), fields(user_id = call.from.id))]
    async fn category_selected(&self, call: &CallbackQuery) -> ComponentResult<()> {
        let bot = self.bot.as_ref();
        let data = call.data.as_deref().unwrap_or_default();
        let category_id = match self.store.callback_data.single(data).ok().and_then(|id| id.parse::<i64>().ok()) {
            Some(id) => id,
            None => {
                callback_query_processing_error(bot, call, &format!("corrupted callback query '{}'", data)).await;
                return Ok(());
            }
        };
        let Some(category) = self.store.get_category(category_id).cloned() else {
            callback_query_processing_error(bot, call, &format!("corrupted category id: {}", category_id)).await;
            return Ok(());
        };
        if !self.store.save_user_category(&call.from, &category).await? {
            callback_query_processing_error(bot, call, "unable to save category").await;
            return Ok(());
        }

        // Fails when the same button is pressed twice and the markup is unchanged.
        if let Err(e) = self.refresh_markup(call).await {
            debug!(error = %e, "Category markup not updated");
        }

        if let Some(hook) = &self.on_category_selected {
            let context = CategorySelectedContext {
                bot: self.bot.clone(),
                message: call.message.clone(),
                user: call.from.clone(),
                category,
            };
            if let Err(e) = hook.on_category_selected(context).await {
                error!(error = %e, "Error in category selected hook");
            }
        }
        Ok(())
    }

    async fn refresh_markup(&self, call: &CallbackQuery) -> ComponentResult<()> {
        self.bot.answer_callback_query(&call.id, None, false).await?;
        if let Some(message) = &call.message {
            let markup = self.store.markup(&call.from).await?;
            self.bot
                .edit_message_reply_markup(message.chat.id, message.id, Some(markup))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for CategoryHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        let Some(call) = update.as_callback_query() else {
            return Ok(HandlerResponse::Ignore);
        };
        if !call
            .data
            .as_deref()
            .is_some_and(|d| d.split(':').next() == Some(self.store.callback_data.prefix()))
        {
            return Ok(HandlerResponse::Ignore);
        }
        self.category_selected(call).await?;
        Ok(HandlerResponse::Stop)
    }
}
