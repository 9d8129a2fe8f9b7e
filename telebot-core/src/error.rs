use thiserror::Error;

/// Failure reported by the bot transport (Telegram Bot API or a test double).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BotError {
    #[error("Telegram API error: {description}")]
    Api { description: String },

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BotError {
    pub fn api(description: impl Into<String>) -> Self {
        Self::Api {
            description: description.into(),
        }
    }

    /// True when the API description contains `fragment` (e.g. `TOPIC_NOT_MODIFIED`).
    pub fn description_contains(&self, fragment: &str) -> bool {
        match self {
            Self::Api { description } => description.contains(fragment),
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum TelebotError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Bot error: {0}")]
    Bot(#[from] BotError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("No text in message")]
    NoText,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid callback data: {0}")]
    InvalidCallbackData(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("State error: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, TelebotError>;

pub type BotResult<T> = std::result::Result<T, BotError>;
