//! Store error types.

use thiserror::Error;

use crate::diff::DiffError;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Failure talking to Redis. `transient` marks errors worth retrying (I/O, dropped connection, timeout).
    #[error("Redis error: {message}")]
    Redis { message: String, transient: bool },

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Attempt to create {kind} with prefix {prefix:?} already in use")]
    DuplicatePrefix { kind: String, prefix: String },

    #[error("Version corruption at {store_prefix}[{key}] offset {offset}: {message}")]
    VersionCorruption {
        message: String,
        store_prefix: String,
        key: String,
        offset: usize,
    },

    #[error("Patch error: {0}")]
    Patch(#[from] DiffError),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Redis { transient: true, .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Redis {
            transient: e.is_io_error() || e.is_connection_dropped() || e.is_timeout(),
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<StoreError> for telebot_core::TelebotError {
    fn from(e: StoreError) -> Self {
        telebot_core::TelebotError::Store(e.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
