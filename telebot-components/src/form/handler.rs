//! Walks users through a [`Form`], one message or button press at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use telebot_core::{
    BotApi, CallbackData, CallbackQuery, ChatType, Handler, HandlerResponse, InlineKeyboardButton,
    InlineKeyboardMarkup, KeyboardButton, Message, ReplyKeyboardMarkup, ReplyMarkup, SendOptions, SentMessage,
    Update, User,
};
use telebot_stores::times::DAY;
use telebot_stores::{KeyValueStore, RedisInterface};
use tracing::{debug, error, info, instrument};

use super::field::{BadFieldValue, FieldKind, FieldValue, FormField};
use super::{Form, FormResult};
use crate::calendar::{calendar_keyboard, CalendarAction, CalendarCallbackPayload};
use crate::error::{ComponentError, ComponentResult};
use crate::language::{AnyText, LanguageData};
use crate::stores::callback_query_processing_error;
use crate::stores::language::{validate_any_text, LanguageStoreInterface};
use crate::utils::{fill_placeholders, html_escape, join_paragraphs};

#[derive(Debug, Clone)]
pub struct FormHandlerConfig {
    pub echo_filled_field: bool,
    pub retry_field_msg: AnyText,
    /// `{}` is replaced with the available commands.
    pub unsupported_cmd_error_template: AnyText,
    /// `{}` is replaced with the error.
    pub cancelling_because_of_error_template: AnyText,
    /// `{}` is replaced with the cancel commands.
    pub form_starting_template: AnyText,
    /// `{}` is replaced with the skip command.
    pub can_skip_field_template: AnyText,
    pub cant_skip_field_msg: AnyText,
    pub cancel_cmd: String,
    pub cancel_aliases: Vec<String>,
    pub skip_cmd: String,
    /// Unfinished forms are forgotten after this long.
    pub state_lifetime: Duration,
}

impl Default for FormHandlerConfig {
    fn default() -> Self {
        Self {
            echo_filled_field: false,
            retry_field_msg: "Please try again.".into(),
            unsupported_cmd_error_template: "Unsupported command, available commands are: {}".into(),
            cancelling_because_of_error_template: "Something went wrong, the form is cancelled: {}".into(),
            form_starting_template: "Send {} to stop filling the form.".into(),
            can_skip_field_template: "({} to skip)".into(),
            cant_skip_field_msg: "This field can't be skipped.".into(),
            cancel_cmd: "/cancel".to_string(),
            cancel_aliases: Vec::new(),
            skip_cmd: "/skip".to_string(),
            state_lifetime: DAY,
        }
    }
}

impl FormHandlerConfig {
    fn cancel_cmds(&self) -> Vec<&str> {
        std::iter::once(self.cancel_cmd.as_str())
            .chain(self.cancel_aliases.iter().map(String::as_str))
            .collect()
    }

    fn texts(&self) -> [&AnyText; 6] {
        [
            &self.retry_field_msg,
            &self.unsupported_cmd_error_template,
            &self.cancelling_because_of_error_template,
            &self.form_starting_template,
            &self.can_skip_field_template,
            &self.cant_skip_field_msg,
        ]
    }
}

/// Passed to [`FormExitHook`] when a form is completed or cancelled.
pub struct FormExitContext {
    pub bot: Arc<dyn BotApi>,
    pub user: User,
    /// The message that ended the form; `None` when it was a button press.
    pub last_message: Option<Message>,
    pub result: FormResult,
}

#[async_trait]
pub trait FormExitHook: Send + Sync {
    async fn on_exit(&self, context: FormExitContext) -> ComponentResult<()>;
}

/// Progress of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FormState {
    current_field: String,
    result: FormResult,
    /// Toggled options of the current multiple select field, in option order.
    #[serde(default)]
    selected: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormAction {
    Completed,
    Cancelled,
    KeepGoing,
}

struct StepEffect {
    action: FormAction,
    /// HTML text and the keyboard to show with it.
    response: Option<(String, ReplyMarkup)>,
}

impl StepEffect {
    fn keep_going(text: String, markup: ReplyMarkup) -> Self {
        Self {
            action: FormAction::KeepGoing,
            response: Some((text, markup)),
        }
    }
}

pub struct FormHandler {
    bot: Arc<dyn BotApi>,
    form: Form,
    config: FormHandlerConfig,
    language_store: Option<Arc<dyn LanguageStoreInterface>>,
    state_store: KeyValueStore<FormState>,
    callback_data: CallbackData,
    on_completed: Arc<dyn FormExitHook>,
    on_cancelled: Option<Arc<dyn FormExitHook>>,
}

impl FormHandler {
    /// `name` tells several forms of one bot apart in Redis keys and button payloads.
    pub fn new(
        bot: Arc<dyn BotApi>,
        redis: Arc<dyn RedisInterface>,
        bot_prefix: &str,
        name: &str,
        form: Form,
        config: FormHandlerConfig,
        language_store: Option<Arc<dyn LanguageStoreInterface>>,
        on_completed: Arc<dyn FormExitHook>,
    ) -> ComponentResult<Self> {
        if name.is_empty() || name.contains(':') || name.len() > 24 {
            return Err(ComponentError::Config(format!("invalid form name {:?}", name)));
        }
        let store = language_store.as_deref();
        for text in config.texts() {
            validate_any_text(text, store)?;
        }
        for field in form.fields() {
            for text in field.texts() {
                validate_any_text(text, store)?;
            }
        }
        let state_store = KeyValueStore::new(&format!("form-state-{}", name), bot_prefix, redis)?
            .with_expiration(Some(config.state_lifetime));
        Ok(Self {
            bot,
            form,
            config,
            language_store,
            state_store,
            callback_data: CallbackData::new(format!("form-{}", name), &["action", "arg"]),
            on_completed,
            on_cancelled: None,
        })
    }

    pub fn on_cancelled(mut self, hook: Arc<dyn FormExitHook>) -> Self {
        self.on_cancelled = Some(hook);
        self
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    async fn language(&self, user: &User) -> ComponentResult<Option<LanguageData>> {
        match &self.language_store {
            Some(store) => Ok(Some(store.get_user_language(user).await?)),
            None => Ok(None),
        }
    }

    pub async fn is_filling(&self, user: &User) -> ComponentResult<bool> {
        Ok(self.state_store.exists(user.id).await?)
    }

    /// Starts (or restarts) the form for the user and asks the first question.
    #[instrument(skip_all, fields(user_id = user.id))]
    pub async fn start(&self, user: &User, initial_result: Option<FormResult>) -> ComponentResult<SentMessage> {
        let field = self.form.start_field();
        let state = FormState {
            current_field: field.name.clone(),
            result: initial_result.unwrap_or_default(),
            selected: Vec::new(),
        };
        self.state_store.save(user.id, &state).await?;
        let language = self.language(user).await?;
        let language = language.as_ref();
        let starting = fill_placeholders(
            self.config.form_starting_template.to_str(language)?,
            &[&self.config.cancel_cmds().join(", ")],
        );
        let text = join_paragraphs(&[starting, self.query_text(field, language)?]);
        let markup = self.markup(field, &[], language, None)?;
        info!(form = %self.callback_data.prefix(), "Form started");
        Ok(self
            .bot
            .send_message(user.id, &text, SendOptions::html().reply_markup(markup))
            .await?)
    }

    fn query_text(&self, field: &FormField, language: Option<&LanguageData>) -> ComponentResult<String> {
        let mut text = field.query_message.to_str(language)?.to_string();
        if !field.required {
            let hint = fill_placeholders(self.config.can_skip_field_template.to_str(language)?, &[&self.config.skip_cmd]);
            text.push(' ');
            text.push_str(&hint);
        }
        Ok(text)
    }

    fn button(&self, label: impl Into<String>, action: &str, arg: &str) -> ComponentResult<InlineKeyboardButton> {
        Ok(InlineKeyboardButton::callback(
            label,
            self.callback_data.new_data(&[action, arg])?,
        ))
    }

    /// Keyboard for fields answered with buttons under the question.
    fn inline_markup(
        &self,
        field: &FormField,
        selected: &[String],
        language: Option<&LanguageData>,
        month: Option<(i32, u32)>,
    ) -> ComponentResult<Option<InlineKeyboardMarkup>> {
        match &field.kind {
            FieldKind::MultipleSelect {
                options, finish_button, ..
            } => {
                let mut rows = Vec::with_capacity(options.len() + 1);
                for option in options {
                    let label = option.label.to_str(language)?;
                    let label = if selected.contains(&option.id) {
                        format!("✅ {}", label)
                    } else {
                        label.to_string()
                    };
                    rows.push(vec![self.button(label, "toggle", &option.id)?]);
                }
                rows.push(vec![self.button(finish_button.to_str(language)?, "finish", "-")?]);
                Ok(Some(InlineKeyboardMarkup::new(rows)))
            }
            FieldKind::Date { calendar, .. } => {
                let (year, month) = month.unzip();
                let markup = calendar_keyboard(
                    year,
                    month,
                    |payload| Ok(self.callback_data.new_data(&["calendar", payload])?),
                    calendar,
                    None,
                    field.today(),
                )?;
                Ok(Some(markup))
            }
            FieldKind::PlainText { .. } | FieldKind::SingleSelect { .. } => Ok(None),
        }
    }

    fn markup(
        &self,
        field: &FormField,
        selected: &[String],
        language: Option<&LanguageData>,
        month: Option<(i32, u32)>,
    ) -> ComponentResult<ReplyMarkup> {
        if let FieldKind::SingleSelect {
            options,
            menu_row_width,
            ..
        } = &field.kind
        {
            let buttons = options
                .iter()
                .map(|o| Ok(KeyboardButton::new(o.label.to_str(language)?)))
                .collect::<ComponentResult<Vec<_>>>()?;
            return Ok(ReplyMarkup::Keyboard(ReplyKeyboardMarkup {
                keyboard: buttons.chunks((*menu_row_width).max(1)).map(<[_]>::to_vec).collect(),
                resize_keyboard: true,
                one_time_keyboard: true,
            }));
        }
        Ok(match self.inline_markup(field, selected, language, month)? {
            Some(markup) => ReplyMarkup::Inline(markup),
            None => ReplyMarkup::Remove,
        })
    }

    fn current_field(&self, state: &FormState) -> ComponentResult<&FormField> {
        self.form
            .field(&state.current_field)
            .ok_or_else(|| ComponentError::Other(format!("form has no field {:?}", state.current_field)))
    }

    fn retry(
        &self,
        field: &FormField,
        state: &FormState,
        error: Option<&str>,
        language: Option<&LanguageData>,
    ) -> ComponentResult<StepEffect> {
        let mut paragraphs: Vec<&str> = error.into_iter().collect();
        paragraphs.push(self.config.retry_field_msg.to_str(language)?);
        Ok(StepEffect::keep_going(
            join_paragraphs(&paragraphs),
            self.markup(field, &state.selected, language, None)?,
        ))
    }

    /// Stores the value and moves on to the next field or completes the form.
    fn accept(
        &self,
        state: &mut FormState,
        field: &FormField,
        value: Option<FieldValue>,
        language: Option<&LanguageData>,
    ) -> ComponentResult<StepEffect> {
        let mut paragraphs = Vec::new();
        if let (true, Some(template), Some(value)) =
            (self.config.echo_filled_field, &field.echo_result_template, &value)
        {
            let value = html_escape(&field.value_to_str(value, language)?);
            paragraphs.push(fill_placeholders(template.to_str(language)?, &[&value]));
        }
        let next = self.form.next_field(field, value.as_ref());
        state.result.insert(field.name.clone(), value);
        state.selected.clear();

        let Some(next) = next else {
            let response = (!paragraphs.is_empty()).then(|| (join_paragraphs(&paragraphs), ReplyMarkup::Remove));
            return Ok(StepEffect {
                action: FormAction::Completed,
                response,
            });
        };
        debug!(field = %next.name, "Moving to the next form field");
        paragraphs.push(self.query_text(next, language)?);
        state.current_field = next.name.clone();
        Ok(StepEffect::keep_going(
            join_paragraphs(&paragraphs),
            self.markup(next, &[], language, None)?,
        ))
    }

    fn update(
        &self,
        state: &mut FormState,
        message: &Message,
        language: Option<&LanguageData>,
    ) -> ComponentResult<StepEffect> {
        let field = self.current_field(state)?;
        let text = message.text_content().unwrap_or_default().trim();
        if message.content_type == "text" && text.starts_with('/') {
            if self.config.cancel_cmds().contains(&text) {
                return Ok(StepEffect {
                    action: FormAction::Cancelled,
                    response: None,
                });
            }
            if text == self.config.skip_cmd {
                if field.required {
                    let msg = self.config.cant_skip_field_msg.to_str(language)?;
                    return self.retry(field, state, Some(msg), language);
                }
                return self.accept(state, field, None, language);
            }
            let available: Vec<&str> = std::iter::once(self.config.skip_cmd.as_str())
                .chain(self.config.cancel_cmds())
                .collect();
            let msg = fill_placeholders(
                self.config.unsupported_cmd_error_template.to_str(language)?,
                &[&available.join(", ")],
            );
            return Ok(StepEffect::keep_going(
                msg,
                self.markup(field, &state.selected, language, None)?,
            ));
        }
        match field.parse(text, language)? {
            Ok(value) => self.accept(state, field, Some(value), language),
            Err(BadFieldValue(msg)) => self.retry(field, state, Some(msg.to_str(language)?), language),
        }
    }

    /// Sends the response, then either saves the progress or ends the form.
    async fn apply(
        &self,
        user: &User,
        state: FormState,
        effect: StepEffect,
        last_message: Option<&Message>,
    ) -> ComponentResult<()> {
        if let Some((text, markup)) = effect.response {
            self.bot
                .send_message(user.id, &text, SendOptions::html().reply_markup(markup))
                .await?;
        }
        let hook = match effect.action {
            FormAction::KeepGoing => {
                self.state_store.save(user.id, &state).await?;
                return Ok(());
            }
            FormAction::Completed => Some(&self.on_completed),
            FormAction::Cancelled => self.on_cancelled.as_ref(),
        };
        info!(action = ?effect.action, "Form finished");
        self.state_store.drop(user.id).await?;
        if let Some(hook) = hook {
            let context = FormExitContext {
                bot: self.bot.clone(),
                user: user.clone(),
                last_message: last_message.cloned(),
                result: state.result,
            };
            if let Err(e) = hook.on_exit(context).await {
                error!(error = %e, "Error in form exit hook");
            }
        }
        Ok(())
    }

    fn cancelled_by_error(&self, e: &ComponentError, language: Option<&LanguageData>) -> ComponentResult<StepEffect> {
        error!(error = %e, "Error processing form step, cancelling the form");
        let text = fill_placeholders(
            self.config.cancelling_because_of_error_template.to_str(language)?,
            &[&html_escape(&e.to_string())],
        );
        Ok(StepEffect {
            action: FormAction::Cancelled,
            response: Some((text, ReplyMarkup::Remove)),
        })
    }

    #[instrument(skip_all, fields(user_id = user.id))]
    async fn message_step(&self, message: &Message, user: &User, mut state: FormState) -> ComponentResult<()> {
        let language = self.language(user).await?;
        let language = language.as_ref();
        let effect = match self.update(&mut state, message, language) {
            Ok(effect) => effect,
            Err(e) => self.cancelled_by_error(&e, language)?,
        };
        self.apply(user, state, effect, Some(message)).await
    }

    #[instrument(skip_all, fields(user_id = call.from.id))]
    async fn button_pressed(&self, call: &CallbackQuery) -> ComponentResult<()> {
        let bot = self.bot.as_ref();
        let data = call.data.as_deref().unwrap_or_default();
        let Ok(mut parsed) = self.callback_data.parse(data) else {
            callback_query_processing_error(bot, call, &format!("corrupted callback query '{}'", data)).await;
            return Ok(());
        };
        let action = parsed.remove("action").unwrap_or_default();
        let arg = parsed.remove("arg").unwrap_or_default();
        let user = &call.from;
        let Some(mut state) = self.state_store.load(user.id).await? else {
            // buttons of a finished or expired form
            bot.answer_callback_query(&call.id, None, false).await?;
            return Ok(());
        };
        let language = self.language(user).await?;
        let language = language.as_ref();
        let field = self.current_field(&state)?;
        let message = call.message.as_ref();

        let value = match (action.as_str(), &field.kind) {
            (
                "toggle",
                FieldKind::MultipleSelect {
                    options, max_selected, ..
                },
            ) => {
                if !options.iter().any(|o| o.id == arg) {
                    callback_query_processing_error(bot, call, &format!("unknown option '{}'", arg)).await;
                    return Ok(());
                }
                if state.selected.contains(&arg) {
                    state.selected.retain(|id| *id != arg);
                } else if max_selected.map_or(true, |max| state.selected.len() < max) {
                    state.selected.push(arg);
                    state
                        .selected
                        .sort_by_key(|id| options.iter().position(|o| o.id == *id));
                }
                bot.answer_callback_query(&call.id, None, false).await?;
                self.state_store.save(user.id, &state).await?;
                if let Some(message) = message {
                    let markup = self.inline_markup(field, &state.selected, language, None)?;
                    bot.edit_message_reply_markup(message.chat.id, message.id, markup)
                        .await?;
                }
                return Ok(());
            }
            (
                "finish",
                FieldKind::MultipleSelect {
                    nothing_selected_msg, ..
                },
            ) => {
                if state.selected.is_empty() && field.required {
                    bot.answer_callback_query(&call.id, Some(nothing_selected_msg.to_str(language)?), true)
                        .await?;
                    return Ok(());
                }
                (!state.selected.is_empty()).then(|| FieldValue::SelectedMany(state.selected.clone()))
            }
            ("calendar", FieldKind::Date { .. }) => {
                let Ok(payload) = CalendarCallbackPayload::load(&arg) else {
                    callback_query_processing_error(bot, call, &format!("corrupted calendar payload '{}'", arg)).await;
                    return Ok(());
                };
                match payload.action {
                    CalendarAction::Noop => {
                        bot.answer_callback_query(&call.id, None, false).await?;
                        return Ok(());
                    }
                    CalendarAction::Update => {
                        bot.answer_callback_query(&call.id, None, false).await?;
                        if let (Some(message), Some(year), Some(month)) = (message, payload.year, payload.month) {
                            let markup = self.inline_markup(field, &[], language, Some((year, month)))?;
                            bot.edit_message_reply_markup(message.chat.id, message.id, markup)
                                .await?;
                        }
                        return Ok(());
                    }
                    CalendarAction::Select => {
                        let Some(date) = payload.date() else {
                            callback_query_processing_error(bot, call, "invalid calendar date").await;
                            return Ok(());
                        };
                        match field.check_date(date) {
                            Ok(value) => Some(value),
                            Err(BadFieldValue(msg)) => {
                                bot.answer_callback_query(&call.id, Some(msg.to_str(language)?), true)
                                    .await?;
                                return Ok(());
                            }
                        }
                    }
                }
            }
            _ => {
                debug!(action = %action, field = %field.name, "Button doesn't belong to the current field");
                bot.answer_callback_query(&call.id, None, false).await?;
                return Ok(());
            }
        };

        bot.answer_callback_query(&call.id, None, false).await?;
        if let Some(message) = message {
            // the answer is in, the buttons are no longer needed
            if let Err(e) = bot.edit_message_reply_markup(message.chat.id, message.id, None).await {
                debug!(error = %e, "Unable to remove form field buttons");
            }
        }
        let effect = match self.accept(&mut state, field, value, language) {
            Ok(effect) => effect,
            Err(e) => self.cancelled_by_error(&e, language)?,
        };
        self.apply(user, state, effect, None).await
    }
}

#[async_trait]
impl Handler for FormHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        if let Some(call) = update.as_callback_query() {
            let data = call.data.as_deref().unwrap_or_default();
            if data.split(':').next() != Some(self.callback_data.prefix()) {
                return Ok(HandlerResponse::Ignore);
            }
            self.button_pressed(call).await?;
            return Ok(HandlerResponse::Stop);
        }
        let Some(message) = update.as_message() else {
            return Ok(HandlerResponse::Ignore);
        };
        if message.chat.chat_type != ChatType::Private {
            return Ok(HandlerResponse::Ignore);
        }
        let Some(user) = &message.from else {
            return Ok(HandlerResponse::Ignore);
        };
        let Some(state) = self.state_store.load(user.id).await.map_err(ComponentError::from)? else {
            return Ok(HandlerResponse::Ignore);
        };
        self.message_step(message, user, state).await?;
        Ok(HandlerResponse::Stop)
    }
}
