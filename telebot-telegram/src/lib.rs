//! # telebot-telegram
//!
//! Telegram transport layer: teloxide adapters, the [`telebot_core::BotApi`] implementation,
//! env config and the dispatcher runner. No persistence or component logic lives here.

mod adapters;
mod bot_adapter;
mod config;
mod runner;

pub use adapters::{TelegramCallbackQueryWrapper, TelegramMessageWrapper, TelegramUserWrapper};
pub use bot_adapter::TelegramBotAdapter;
pub use config::TelegramConfig;
pub use runner::run_dispatcher;
