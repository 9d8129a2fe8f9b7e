//! # telebot-core
//!
//! Core types and traits for Telegram bot components: [`BotApi`], [`Handler`], [`HandlerChain`],
//! update/message/user types, inline keyboards, callback data and tracing initialization.
//! Transport-agnostic; telebot-telegram implements [`BotApi`] with teloxide.

pub mod bot;
pub mod callback_data;
pub mod chain;
pub mod error;
pub mod keyboard;
pub mod logger;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use bot::{BotApi, EditOptions, SendOptions, SentMessage};
pub use callback_data::CallbackData;
pub use chain::HandlerChain;
pub use error::{BotError, BotResult, HandlerError, Result, TelebotError};
pub use keyboard::{
    InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, ParseMode, ReplyKeyboardMarkup,
    ReplyMarkup,
};
pub use logger::init_tracing;
pub use types::{
    CallbackQuery, Chat, ChatType, Handler, HandlerResponse, Message, ToCoreCallbackQuery,
    ToCoreMessage, ToCoreUser, Update, User,
};
