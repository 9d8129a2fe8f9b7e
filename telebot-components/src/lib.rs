//! # telebot-components
//!
//! Reusable building blocks for Telegram bots, persisted through [`telebot_stores`].
//!
//! ## Modules
//!
//! - [`language`] – language table, multilanguage texts
//! - [`stores`] – user language, categories, banned users, user groups, forum topics
//! - [`secrets`] – per-owner secrets in Redis (encrypted) or a TOML file
//! - [`feedback`] – user ⇄ admin chat relay with anti-spam, hashtags and message log
//! - [`menu`] – inline menu trees
//! - [`calendar`] – inline calendar keyboard
//! - [`form`] – multi-step forms with text, select and date fields
//! - [`broadcast`] – topic subscriptions and scheduled broadcasts
//! - [`utils`] – text helpers, background job helpers and the error alerts layer
//!
//! Components that talk to Telegram hold an `Arc<dyn BotApi>` and implement [`telebot_core::Handler`]
//! where they consume updates.

pub mod broadcast;
pub mod calendar;
mod error;
pub mod feedback;
pub mod form;
pub mod language;
pub mod menu;
pub mod secrets;
pub mod stores;
pub mod utils;

pub use error::{ComponentError, ComponentResult};
pub use language::{AnyText, Language, LanguageData, MultilangText};
