//! Component error types.

use telebot_core::{BotError, TelebotError};
use telebot_stores::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Bot error: {0}")]
    Bot(#[from] BotError),

    #[error("Unknown language code: {0:?}")]
    UnknownLanguage(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Missing localisation: {0}")]
    MissingLocalisation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid callback data: {0}")]
    CallbackData(String),

    #[error("Secret error: {0}")]
    Secret(String),

    #[error("{0}")]
    Other(String),
}

impl From<ComponentError> for TelebotError {
    fn from(e: ComponentError) -> Self {
        match e {
            ComponentError::Bot(e) => TelebotError::Bot(e),
            ComponentError::Config(msg) => TelebotError::Config(msg),
            ComponentError::Store(e) => e.into(),
            other => TelebotError::Unknown(other.to_string()),
        }
    }
}

impl From<telebot_core::HandlerError> for ComponentError {
    fn from(e: telebot_core::HandlerError) -> Self {
        Self::CallbackData(e.to_string())
    }
}

pub type ComponentResult<T> = std::result::Result<T, ComponentError>;
