//! Inline menu trees: submenus navigate by editing the menu message in place, terminators end
//! the interaction and hand over to a hook.

use std::sync::Arc;

use async_trait::async_trait;
use telebot_core::{
    BotApi, CallbackData, CallbackQuery, EditOptions, Handler, HandlerResponse, InlineKeyboardButton,
    InlineKeyboardMarkup, SendOptions, Update, User,
};
use tracing::{error, instrument};

use crate::error::{ComponentError, ComponentResult};
use crate::stores::callback_query_processing_error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub text: String,
    pub items: Vec<MenuItem>,
}

impl Menu {
    pub fn new(text: impl Into<String>, items: Vec<MenuItem>) -> Self {
        Self {
            text: text.into(),
            items,
        }
    }

    fn submenus(&self) -> impl Iterator<Item = &Menu> {
        self.items.iter().filter_map(|item| match &item.action {
            MenuAction::Submenu(menu) => Some(menu),
            MenuAction::Terminator(_) => None,
        })
    }

    /// Children first, then each child's descendants in turn.
    fn collect_descendants<'a>(&'a self, out: &mut Vec<&'a Menu>) {
        let children: Vec<&Menu> = self.submenus().collect();
        out.extend(children.iter().copied());
        for child in children {
            child.collect_descendants(out);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    Submenu(Menu),
    /// Application-defined terminator id passed to the [`TerminatorHook`].
    Terminator(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub label: String,
    pub action: MenuAction,
}

impl MenuItem {
    pub fn submenu(label: impl Into<String>, menu: Menu) -> Self {
        Self {
            label: label.into(),
            action: MenuAction::Submenu(menu),
        }
    }

    pub fn terminator(label: impl Into<String>, terminator: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: MenuAction::Terminator(terminator.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MenuConfig {
    /// `None` disables back buttons.
    pub back_label: Option<String>,
    /// After a terminator is pressed, buttons stop working and the chosen one is checked.
    pub lock_after_termination: bool,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            back_label: Some("back".to_string()),
            lock_after_termination: true,
        }
    }
}

pub struct TerminatorContext {
    pub bot: Arc<dyn BotApi>,
    pub user: User,
    pub terminator: String,
    pub menu_message_id: Option<i32>,
}

#[async_trait]
pub trait TerminatorHook: Send + Sync {
    async fn on_terminator(&self, context: TerminatorContext) -> ComponentResult<()>;
}

#[derive(Debug, Clone)]
enum FlatAction {
    Route(usize),
    Terminate(String),
}

#[derive(Debug, Clone)]
struct FlatItem {
    label: String,
    menu: usize,
    action: FlatAction,
}

#[derive(Debug, Clone)]
struct FlatMenu {
    text: String,
    parent: Option<usize>,
    items: Vec<usize>,
}

/// Menu tree flattened into id-addressable menus and items. Ids are indices: the root menu is
/// `0`, descendants follow; items are numbered menu by menu.
pub struct MenuHandler {
    bot: Arc<dyn BotApi>,
    config: MenuConfig,
    menus: Vec<FlatMenu>,
    items: Vec<FlatItem>,
    on_terminator: Option<Arc<dyn TerminatorHook>>,
    route_callback_data: CallbackData,
    terminate_callback_data: CallbackData,
    inactive_callback_data: CallbackData,
}

impl MenuHandler {
    pub fn new(
        bot: Arc<dyn BotApi>,
        menu_tree: &Menu,
        config: MenuConfig,
        on_terminator: Option<Arc<dyn TerminatorHook>>,
    ) -> ComponentResult<Self> {
        let mut ordered = vec![menu_tree];
        menu_tree.collect_descendants(&mut ordered);
        let index_of = |menu: &Menu| ordered.iter().position(|m| std::ptr::eq(*m, menu));

        let mut menus: Vec<FlatMenu> = ordered
            .iter()
            .map(|m| FlatMenu {
                text: m.text.clone(),
                parent: None,
                items: Vec::new(),
            })
            .collect();
        let mut items = Vec::new();
        for (menu_idx, menu) in ordered.iter().enumerate() {
            for item in &menu.items {
                let action = match &item.action {
                    MenuAction::Submenu(submenu) => {
                        let submenu_idx = index_of(submenu)
                            .ok_or_else(|| ComponentError::Config("submenu missing from menu tree".to_string()))?;
                        menus[submenu_idx].parent = Some(menu_idx);
                        FlatAction::Route(submenu_idx)
                    }
                    MenuAction::Terminator(terminator) => FlatAction::Terminate(terminator.clone()),
                };
                menus[menu_idx].items.push(items.len());
                items.push(FlatItem {
                    label: item.label.clone(),
                    menu: menu_idx,
                    action,
                });
            }
        }

        let handler = Self {
            bot,
            config,
            menus,
            items,
            on_terminator,
            route_callback_data: CallbackData::new("menu", &["route_to"]),
            terminate_callback_data: CallbackData::new("terminator", &["id"]),
            inactive_callback_data: CallbackData::new("inactive_button", &[]),
        };
        // surfaces callback data overflow at construction
        for menu_idx in 0..handler.menus.len() {
            handler.keyboard_markup(menu_idx)?;
        }
        Ok(handler)
    }

    pub fn menu_count(&self) -> usize {
        self.menus.len()
    }

    /// Sends the root menu to the user.
    pub async fn start_menu(&self, user: &User) -> ComponentResult<()> {
        let root = &self.menus[0];
        self.bot
            .send_message(user.id, &root.text, SendOptions::new().reply_markup(self.keyboard_markup(0)?))
            .await?;
        Ok(())
    }

    fn item_button(&self, item_idx: usize) -> ComponentResult<InlineKeyboardButton> {
        let item = &self.items[item_idx];
        let data = match &item.action {
            FlatAction::Route(menu_idx) => self.route_callback_data.new_data(&[&menu_idx.to_string()])?,
            FlatAction::Terminate(_) => self.terminate_callback_data.new_data(&[&item_idx.to_string()])?,
        };
        Ok(InlineKeyboardButton::callback(item.label.clone(), data))
    }

    fn keyboard_markup(&self, menu_idx: usize) -> ComponentResult<InlineKeyboardMarkup> {
        let menu = &self.menus[menu_idx];
        let mut rows = menu
            .items
            .iter()
            .map(|&item_idx| Ok(vec![self.item_button(item_idx)?]))
            .collect::<ComponentResult<Vec<_>>>()?;
        if let (Some(parent), Some(back_label)) = (menu.parent, &self.config.back_label) {
            let data = self.route_callback_data.new_data(&[&parent.to_string()])?;
            rows.push(vec![InlineKeyboardButton::callback(back_label.clone(), data)]);
        }
        Ok(InlineKeyboardMarkup::new(rows))
    }

    fn inactive_keyboard_markup(&self, menu_idx: usize, selected_item_idx: usize) -> ComponentResult<InlineKeyboardMarkup> {
        let data = self.inactive_callback_data.new_data(&[])?;
        let rows = self.menus[menu_idx]
            .items
            .iter()
            .map(|&item_idx| {
                let label = &self.items[item_idx].label;
                let text = if item_idx == selected_item_idx {
                    format!("✅ {}", label)
                } else {
                    label.clone()
                };
                vec![InlineKeyboardButton::callback(text, data.clone())]
            })
            .collect();
        Ok(InlineKeyboardMarkup::new(rows))
    }

    fn parse_index(&self, callback_data: &CallbackData, data: &str, len: usize) -> Option<usize> {
        callback_data
            .single(data)
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|idx| *idx < len)
    }

    #[instrument(skip(self, call), fields(user_id = call.from.id))]
    async fn route(&self, call: &CallbackQuery, data: &str) -> ComponentResult<()> {
        let Some(menu_idx) = self.parse_index(&self.route_callback_data, data, self.menus.len()) else {
            callback_query_processing_error(self.bot.as_ref(), call, &format!("corrupted callback query '{}'", data))
                .await;
            return Ok(());
        };
        self.bot.answer_callback_query(&call.id, None, false).await?;
        if let Some(message) = &call.message {
            self.bot
                .edit_message_text(
                    message.chat.id,
                    message.id,
                    &self.menus[menu_idx].text,
                    EditOptions::with_markup(self.keyboard_markup(menu_idx)?),
                )
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, call), fields(user_id = call.from.id))]
    async fn terminate(&self, call: &CallbackQuery, data: &str) -> ComponentResult<()> {
        let Some(item_idx) = self.parse_index(&self.terminate_callback_data, data, self.items.len()) else {
            callback_query_processing_error(self.bot.as_ref(), call, &format!("corrupted callback query '{}'", data))
                .await;
            return Ok(());
        };
        let item = &self.items[item_idx];
        let FlatAction::Terminate(terminator) = &item.action else {
            callback_query_processing_error(self.bot.as_ref(), call, &format!("menu item {} is not a terminator", item_idx))
                .await;
            return Ok(());
        };
        self.bot.answer_callback_query(&call.id, None, false).await?;
        if self.config.lock_after_termination {
            if let Some(message) = &call.message {
                self.bot
                    .edit_message_text(
                        message.chat.id,
                        message.id,
                        &self.menus[item.menu].text,
                        EditOptions::with_markup(self.inactive_keyboard_markup(item.menu, item_idx)?),
                    )
                    .await?;
            }
        }
        if let Some(hook) = &self.on_terminator {
            let context = TerminatorContext {
                bot: self.bot.clone(),
                user: call.from.clone(),
                terminator: terminator.clone(),
                menu_message_id: call.message.as_ref().map(|m| m.id),
            };
            if let Err(e) = hook.on_terminator(context).await {
                error!(error = %e, "Error in terminator hook");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Handler for MenuHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        let Some(call) = update.as_callback_query() else {
            return Ok(HandlerResponse::Ignore);
        };
        let data = call.data.as_deref().unwrap_or_default();
        let prefix = data.split(':').next().unwrap_or_default();
        if prefix == self.route_callback_data.prefix() {
            self.route(call, data).await?;
        } else if prefix == self.terminate_callback_data.prefix() {
            self.terminate(call, data).await?;
        } else if prefix == self.inactive_callback_data.prefix() {
            self.bot.answer_callback_query(&call.id, None, false).await?;
        } else {
            return Ok(HandlerResponse::Ignore);
        }
        Ok(HandlerResponse::Stop)
    }
}
