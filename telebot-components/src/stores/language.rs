//! User language selection.
//!
//! [`LanguageStore`] remembers the language each user picked from an inline selector; the choice
//! falls back to the Telegram interface language and then to a default. [`LanguageSelectionHandler`]
//! processes `lang:<code>` button presses and, after [`LanguageStore::send_reply_keyboard_selector`],
//! language buttons pressed on the reply keyboard.

use std::sync::Arc;

use async_trait::async_trait;
use telebot_core::{
    BotApi, CallbackData, CallbackQuery, ChatType, EditOptions, Handler, HandlerResponse, InlineKeyboardButton,
    InlineKeyboardMarkup, KeyboardButton, Message, ParseMode, ReplyKeyboardMarkup, SendOptions, Update, User,
};
use telebot_stores::times::DAY;
use telebot_stores::{FnCodec, KeyFlagStore, KeyValueStore, RedisInterface};
use tracing::{error, info, instrument};

use crate::error::{ComponentError, ComponentResult};
use crate::language::{AnyText, LanguageData};
use crate::stores::utils::callback_query_processing_error;

/// What components need from a language store.
#[async_trait]
pub trait LanguageStoreInterface: Send + Sync {
    /// Checks that a multilanguage text covers every supported language.
    fn validate_multilang(&self, text: &AnyText) -> ComponentResult<()>;

    async fn get_user_language(&self, user: &User) -> ComponentResult<LanguageData>;
}

/// Validates a user-facing text against an optional language store: multilanguage texts must
/// cover all of its languages, and without a store texts must be plain.
pub fn validate_any_text(text: &AnyText, language_store: Option<&dyn LanguageStoreInterface>) -> ComponentResult<()> {
    match language_store {
        Some(store) => store.validate_multilang(text),
        None => text.validate(None),
    }
}

/// Piece of a language button label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageLabelPart {
    /// Flag emoji, or uppercase code when there is none.
    Emoji,
    /// Uppercase code.
    Code,
    NameEn,
    NameLocal,
    Literal(String),
}

#[derive(Debug, Clone)]
pub struct LanguageSelectionMenuConfig {
    pub emoji_buttons: bool,
    /// Marks the selected language with `✅ `; otherwise with `[ .. ]` brackets.
    pub select_with_checkmark: bool,
    pub prompt: Option<AnyText>,
    pub prompt_parse_mode: Option<ParseMode>,
    pub language_label_template: Option<Vec<LanguageLabelPart>>,
}

impl Default for LanguageSelectionMenuConfig {
    fn default() -> Self {
        Self {
            emoji_buttons: true,
            select_with_checkmark: true,
            prompt: None,
            prompt_parse_mode: None,
            language_label_template: None,
        }
    }
}

impl LanguageSelectionMenuConfig {
    fn validate(&self) -> ComponentResult<()> {
        if self.emoji_buttons && self.language_label_template.is_some() {
            return Err(ComponentError::Config(
                "emoji buttons and button template options are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    fn effective_template(&self) -> Vec<LanguageLabelPart> {
        match &self.language_label_template {
            Some(template) if !template.is_empty() => template.clone(),
            _ if self.emoji_buttons => vec![LanguageLabelPart::Emoji],
            _ => vec![LanguageLabelPart::Code],
        }
    }

    pub fn language_label(&self, language: &LanguageData) -> String {
        self.effective_template()
            .iter()
            .map(|part| match part {
                LanguageLabelPart::Emoji => language.emoji_or_code(),
                LanguageLabelPart::Code => language.code.to_uppercase(),
                LanguageLabelPart::NameEn => language.name.to_string(),
                LanguageLabelPart::NameLocal => {
                    if language.local_name.is_empty() {
                        language.name.to_string()
                    } else {
                        language.local_name.to_string()
                    }
                }
                LanguageLabelPart::Literal(s) => s.clone(),
            })
            .collect()
    }
}

/// Passed to [`LanguageChangeHook`] after a user switched language.
pub struct LanguageChangeContext {
    pub bot: Arc<dyn BotApi>,
    pub message: Option<Message>,
    pub message_id: Option<i32>,
    pub user: User,
    pub language: LanguageData,
}

#[async_trait]
pub trait LanguageChangeHook: Send + Sync {
    async fn on_language_change(&self, context: LanguageChangeContext) -> ComponentResult<()>;
}

pub struct LanguageStore {
    user_language_store: KeyValueStore<LanguageData>,
    languages: Vec<LanguageData>,
    default_language: LanguageData,
    menu_config: LanguageSelectionMenuConfig,
    callback_data: CallbackData,
    /// Users who got the reply keyboard selector and haven't answered yet.
    reply_keyboard_selector_users: KeyFlagStore,
}

impl LanguageStore {
    pub fn new(
        redis: Arc<dyn RedisInterface>,
        bot_prefix: &str,
        supported_languages: impl IntoIterator<Item = impl Into<LanguageData>>,
        default_language: impl Into<LanguageData>,
        menu_config: LanguageSelectionMenuConfig,
    ) -> ComponentResult<Self> {
        menu_config.validate()?;
        let codec = FnCodec::new(
            |language: &LanguageData| language.code.to_string(),
            |dump: &str| LanguageData::lookup(dump).map_err(|e| e.to_string()),
        );
        let store = Self {
            user_language_store: KeyValueStore::with_codec("user-language", bot_prefix, redis.clone(), codec)?
                .with_expiration(None),
            reply_keyboard_selector_users: KeyFlagStore::new("language-reply-keyboard-selector", bot_prefix, redis)?
                .with_expiration(Some(DAY)),
            languages: supported_languages.into_iter().map(Into::into).collect(),
            default_language: default_language.into(),
            menu_config,
            callback_data: CallbackData::new("lang", &["code"]),
        };
        if let Some(prompt) = &store.menu_config.prompt {
            store.validate_multilang(prompt)?;
        }
        Ok(store)
    }

    pub fn languages(&self) -> &[LanguageData] {
        &self.languages
    }

    pub fn default_language(&self) -> LanguageData {
        self.default_language
    }

    /// The stored choice, unless that language is no longer supported.
    pub async fn get_selected_user_language(&self, user: &User) -> ComponentResult<Option<LanguageData>> {
        let selected = self.user_language_store.load(user.id).await?;
        Ok(selected.filter(|language| self.languages.contains(language)))
    }

    pub async fn set_user_language(&self, user: &User, language: impl Into<LanguageData>) -> ComponentResult<bool> {
        let language = language.into();
        if !self.languages.contains(&language) {
            return Err(ComponentError::UnsupportedLanguage(language.code.to_string()));
        }
        Ok(self.user_language_store.save(user.id, &language).await?)
    }

    /// One row with a button per supported language; the selected one is marked.
    pub fn markup_for_selected_language(&self, selected: &LanguageData) -> ComponentResult<InlineKeyboardMarkup> {
        let row = self
            .languages
            .iter()
            .map(|language| {
                let mut label = self.menu_config.language_label(language);
                if language == selected {
                    label = if self.menu_config.select_with_checkmark {
                        format!("✅ {}", label)
                    } else {
                        format!("[ {} ]", label)
                    };
                }
                Ok(InlineKeyboardButton::callback(
                    label,
                    self.callback_data.new_data(&[language.code])?,
                ))
            })
            .collect::<ComponentResult<Vec<_>>>()?;
        Ok(InlineKeyboardMarkup::new(vec![row]))
    }

    pub async fn markup_for_user(&self, user: &User) -> ComponentResult<InlineKeyboardMarkup> {
        let language = self.get_user_language(user).await?;
        self.markup_for_selected_language(&language)
    }

    /// Sends the configured prompt with the selector attached.
    pub async fn send_inline_selector(&self, bot: &dyn BotApi, user: &User) -> ComponentResult<()> {
        let prompt = self.menu_config.prompt.as_ref().ok_or_else(|| {
            ComponentError::Config("send_inline_selector requires a prompt in the menu config".to_string())
        })?;
        let language = self.get_user_language(user).await?;
        let mut options = SendOptions::new().reply_markup(self.markup_for_selected_language(&language)?);
        options.parse_mode = self.menu_config.prompt_parse_mode;
        bot.send_message(user.id, prompt.to_str(Some(&language))?, options)
            .await?;
        Ok(())
    }

    /// One language per row, labelled like the inline buttons but without the selection mark.
    pub fn reply_keyboard_markup(&self) -> ReplyKeyboardMarkup {
        ReplyKeyboardMarkup {
            keyboard: self
                .languages
                .iter()
                .map(|language| vec![KeyboardButton::new(self.menu_config.language_label(language))])
                .collect(),
            resize_keyboard: true,
            one_time_keyboard: true,
        }
    }

    /// Sends the configured prompt with a reply keyboard of languages. The pressed button comes
    /// back as a plain message, which [`LanguageSelectionHandler`] takes for a day.
    pub async fn send_reply_keyboard_selector(&self, bot: &dyn BotApi, user: &User) -> ComponentResult<()> {
        let prompt = self.menu_config.prompt.as_ref().ok_or_else(|| {
            ComponentError::Config("send_reply_keyboard_selector requires a prompt in the menu config".to_string())
        })?;
        let language = self.get_user_language(user).await?;
        let mut options = SendOptions::new().reply_markup(self.reply_keyboard_markup());
        options.parse_mode = self.menu_config.prompt_parse_mode;
        bot.send_message(user.id, prompt.to_str(Some(&language))?, options)
            .await?;
        self.reply_keyboard_selector_users.set_flag(user.id).await?;
        Ok(())
    }

    fn language_by_label(&self, label: &str) -> Option<LanguageData> {
        let label = label.trim();
        self.languages
            .iter()
            .find(|language| self.menu_config.language_label(language) == label)
            .copied()
    }

    /// Handler for selector button presses.
    pub fn setup(
        self: Arc<Self>,
        bot: Arc<dyn BotApi>,
        on_language_change: Option<Arc<dyn LanguageChangeHook>>,
    ) -> LanguageSelectionHandler {
        LanguageSelectionHandler {
            store: self,
            bot,
            on_language_change,
        }
    }
}

#[async_trait]
impl LanguageStoreInterface for LanguageStore {
    fn validate_multilang(&self, text: &AnyText) -> ComponentResult<()> {
        crate::language::validate_multilang(text, &self.languages)
    }

    async fn get_user_language(&self, user: &User) -> ComponentResult<LanguageData> {
        if let Some(stored) = self.get_selected_user_language(user).await? {
            return Ok(stored);
        }
        let interface_language = user
            .language_code
            .as_deref()
            .and_then(|code| LanguageData::lookup(code).ok())
            .filter(|language| self.languages.contains(language));
        Ok(interface_language.unwrap_or(self.default_language))
    }
}

/// Processes `lang:<code>` callback queries and reply keyboard answers for a [`LanguageStore`].
pub struct LanguageSelectionHandler {
    store: Arc<LanguageStore>,
    bot: Arc<dyn BotApi>,
    on_language_change: Option<Arc<dyn LanguageChangeHook>>,
}

impl LanguageSelectionHandler {
    #[instrument(skip(self, call), fields(user_id = call.from.id))]
    async fn language_selected(&self, call: &CallbackQuery) -> ComponentResult<()> {
        let bot = self.bot.as_ref();
        let data = call.data.as_deref().unwrap_or_default();
        let language = match self
            .store
            .callback_data
            .single(data)
            .map_err(ComponentError::from)
            .and_then(|code| LanguageData::lookup(&code))
        {
            Ok(language) => language,
            Err(_) => {
                callback_query_processing_error(bot, call, &format!("corrupted callback query '{}'", data)).await;
                return Ok(());
            }
        };
        if !self.store.languages.contains(&language) {
            callback_query_processing_error(bot, call, &format!("language '{}' is not supported", language)).await;
            return Ok(());
        }

        let user = &call.from;
        let previous = self.store.get_user_language(user).await?;
        if !self.store.set_user_language(user, language).await? {
            callback_query_processing_error(bot, call, "unable to save selected language").await;
            return Ok(());
        }
        bot.answer_callback_query(&call.id, None, false).await?;
        if language == previous {
            return Ok(());
        }
        info!(language = %language, previous = %previous, "User language changed");

        if let Some(message) = &call.message {
            let markup = self.store.markup_for_selected_language(&language)?;
            let edited = match &self.store.menu_config.prompt {
                Some(prompt) => {
                    let options = EditOptions {
                        parse_mode: self.store.menu_config.prompt_parse_mode,
                        reply_markup: Some(markup),
                    };
                    bot.edit_message_text(message.chat.id, message.id, prompt.to_str(Some(&language))?, options)
                        .await
                }
                None => {
                    bot.edit_message_reply_markup(message.chat.id, message.id, Some(markup))
                        .await
                }
            };
            if let Err(e) = edited {
                error!(error = %e, "Error editing language selector");
            }
        }

        self.language_changed(user, language, call.message.as_ref()).await;
        Ok(())
    }

    /// A private message with a reply keyboard label, from a user who was sent the selector.
    #[instrument(skip_all, fields(message_id = message.id))]
    async fn reply_keyboard_language_selected(&self, message: &Message) -> ComponentResult<bool> {
        if message.chat.chat_type != ChatType::Private {
            return Ok(false);
        }
        let Some(user) = &message.from else {
            return Ok(false);
        };
        let Some(language) = message.text.as_deref().and_then(|text| self.store.language_by_label(text)) else {
            return Ok(false);
        };
        if !self.store.reply_keyboard_selector_users.unset_flag(user.id).await? {
            return Ok(false);
        }
        let previous = self.store.get_user_language(user).await?;
        self.store.set_user_language(user, language).await?;
        if language != previous {
            info!(language = %language, previous = %previous, "User language changed from reply keyboard");
            self.language_changed(user, language, Some(message)).await;
        }
        Ok(true)
    }

    async fn language_changed(&self, user: &User, language: LanguageData, message: Option<&Message>) {
        let Some(hook) = &self.on_language_change else {
            return;
        };
        let context = LanguageChangeContext {
            bot: self.bot.clone(),
            message: message.cloned(),
            message_id: message.map(|m| m.id),
            user: user.clone(),
            language,
        };
        if let Err(e) = hook.on_language_change(context).await {
            error!(error = %e, "Error in language change hook, ignoring");
        }
    }
}

#[async_trait]
impl Handler for LanguageSelectionHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        if let Some(message) = update.as_message() {
            return Ok(if self.reply_keyboard_language_selected(message).await? {
                HandlerResponse::Stop
            } else {
                HandlerResponse::Ignore
            });
        }
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
        self.language_selected(call).await?;
        Ok(HandlerResponse::Stop)
    }
}

/// Always answers with the same language; for single-language bots reusing multilanguage components.
pub struct DummyLanguageStore {
    language: LanguageData,
}

impl DummyLanguageStore {
    pub fn new(language: impl Into<LanguageData>) -> Self {
        Self {
            language: language.into(),
        }
    }
}

#[async_trait]
impl LanguageStoreInterface for DummyLanguageStore {
    fn validate_multilang(&self, text: &AnyText) -> ComponentResult<()> {
        crate::language::validate_multilang(text, std::slice::from_ref(&self.language))
    }

    async fn get_user_language(&self, _user: &User) -> ComponentResult<LanguageData> {
        Ok(self.language)
    }
}
