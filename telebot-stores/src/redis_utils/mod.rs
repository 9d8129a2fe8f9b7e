//! The subset of Redis the stores use, as an enum of commands.
//!
//! Backends implement [`RedisInterface::execute`] and [`RedisInterface::execute_pipeline`]; the typed
//! helpers (`get`, `sadd`, ...) are provided on top. Values are plain bytes, keys are strings.

mod client;
mod emulation;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{StoreError, StoreResult};

pub use client::RedisClient;
pub use emulation::RedisEmulation;

/// One Redis command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Set { key: String, value: Vec<u8>, ex: Option<Duration> },
    Get { key: String },
    Expire { key: String, ttl: Duration },
    Persist { key: String },
    Del { keys: Vec<String> },
    Copy { source: String, destination: String, replace: bool },
    Rename { source: String, destination: String },
    SAdd { key: String, members: Vec<Vec<u8>> },
    SRem { key: String, members: Vec<Vec<u8>> },
    SMembers { key: String },
    SIsMember { key: String, member: Vec<u8> },
    SPop { key: String, count: Option<usize> },
    Incr { key: String },
    RPush { key: String, values: Vec<Vec<u8>> },
    RPop { key: String, count: Option<usize> },
    LRange { key: String, start: i64, stop: i64 },
    LLen { key: String },
    LSet { key: String, index: i64, value: Vec<u8> },
    LTrim { key: String, start: i64, stop: i64 },
    Exists { keys: Vec<String> },
    Keys { pattern: String },
    HSet { key: String, field: String, value: Vec<u8> },
    HGet { key: String, field: String },
    HKeys { key: String },
    HVals { key: String },
    HLen { key: String },
    HGetAll { key: String },
    HDel { key: String, fields: Vec<String> },
    DbSize,
    FlushDb,
}

/// Shape of the reply a command produces; real backends use it to decode raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    Status,
    Int,
    OptionalBulk,
    Array,
    OptionalArray,
    Pairs,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set { .. } => "SET",
            Self::Get { .. } => "GET",
            Self::Expire { .. } => "EXPIRE",
            Self::Persist { .. } => "PERSIST",
            Self::Del { .. } => "DEL",
            Self::Copy { .. } => "COPY",
            Self::Rename { .. } => "RENAME",
            Self::SAdd { .. } => "SADD",
            Self::SRem { .. } => "SREM",
            Self::SMembers { .. } => "SMEMBERS",
            Self::SIsMember { .. } => "SISMEMBER",
            Self::SPop { .. } => "SPOP",
            Self::Incr { .. } => "INCR",
            Self::RPush { .. } => "RPUSH",
            Self::RPop { .. } => "RPOP",
            Self::LRange { .. } => "LRANGE",
            Self::LLen { .. } => "LLEN",
            Self::LSet { .. } => "LSET",
            Self::LTrim { .. } => "LTRIM",
            Self::Exists { .. } => "EXISTS",
            Self::Keys { .. } => "KEYS",
            Self::HSet { .. } => "HSET",
            Self::HGet { .. } => "HGET",
            Self::HKeys { .. } => "HKEYS",
            Self::HVals { .. } => "HVALS",
            Self::HLen { .. } => "HLEN",
            Self::HGetAll { .. } => "HGETALL",
            Self::HDel { .. } => "HDEL",
            Self::DbSize => "DBSIZE",
            Self::FlushDb => "FLUSHDB",
        }
    }

    pub(crate) fn reply_kind(&self) -> ReplyKind {
        match self {
            Self::Set { .. }
            | Self::Rename { .. }
            | Self::LSet { .. }
            | Self::LTrim { .. }
            | Self::FlushDb => ReplyKind::Status,
            Self::Get { .. } | Self::HGet { .. } => ReplyKind::OptionalBulk,
            Self::SPop { count: None, .. } | Self::RPop { count: None, .. } => ReplyKind::OptionalBulk,
            Self::SPop { .. } | Self::RPop { .. } => ReplyKind::OptionalArray,
            Self::SMembers { .. }
            | Self::LRange { .. }
            | Self::Keys { .. }
            | Self::HKeys { .. }
            | Self::HVals { .. } => ReplyKind::Array,
            Self::HGetAll { .. } => ReplyKind::Pairs,
            _ => ReplyKind::Int,
        }
    }
}

/// Decoded command reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Vec<u8>>),
    Pairs(Vec<(Vec<u8>, Vec<u8>)>),
}

impl Reply {
    fn unexpected(self, command: &str) -> StoreError {
        StoreError::UnexpectedReply {
            command: command.to_string(),
            reply: format!("{:?}", self),
        }
    }

    pub fn into_int(self, command: &str) -> StoreResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(other.unexpected(command)),
        }
    }

    /// `OK` status or a non-zero integer.
    pub fn into_bool(self, command: &str) -> StoreResult<bool> {
        match self {
            Self::Ok => Ok(true),
            Self::Nil => Ok(false),
            Self::Int(n) => Ok(n != 0),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_optional_bytes(self, command: &str) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(b) => Ok(Some(b)),
            other => Err(other.unexpected(command)),
        }
    }

    /// Array reply; nil counts as empty.
    pub fn into_array(self, command: &str) -> StoreResult<Vec<Vec<u8>>> {
        match self {
            Self::Nil => Ok(Vec::new()),
            Self::Array(items) => Ok(items),
            Self::Bulk(b) => Ok(vec![b]),
            other => Err(other.unexpected(command)),
        }
    }

    pub fn into_pairs(self, command: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        match self {
            Self::Nil => Ok(Vec::new()),
            Self::Pairs(pairs) => Ok(pairs),
            other => Err(other.unexpected(command)),
        }
    }
}

/// Commands queued for one atomic round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Adds EXPIRE for `key` when `ttl` is set.
    pub fn expire_opt(self, key: &str, ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => self.add(Command::Expire {
                key: key.to_string(),
                ttl,
            }),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Abstract interface for the parts of Redis the stores use.
#[async_trait]
pub trait RedisInterface: Send + Sync {
    async fn execute(&self, command: Command) -> StoreResult<Reply>;

    /// Runs all commands atomically, returning one reply per command.
    async fn execute_pipeline(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>>;

    async fn run(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        self.execute_pipeline(pipeline.into_commands()).await
    }

    async fn set(&self, key: &str, value: &[u8], ex: Option<Duration>) -> StoreResult<bool> {
        self.execute(Command::Set {
            key: key.to_string(),
            value: value.to_vec(),
            ex,
        })
        .await?
        .into_bool("SET")
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute(Command::Get { key: key.to_string() })
            .await?
            .into_optional_bytes("GET")
    }

    /// True when the timeout was set (the key exists).
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.execute(Command::Expire {
            key: key.to_string(),
            ttl,
        })
        .await?
        .into_bool("EXPIRE")
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        self.execute(Command::Persist { key: key.to_string() })
            .await?
            .into_bool("PERSIST")
    }

    /// Number of deleted keys.
    async fn delete(&self, keys: &[&str]) -> StoreResult<i64> {
        self.execute(Command::Del {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
        .await?
        .into_int("DEL")
    }

    async fn copy(&self, source: &str, destination: &str, replace: bool) -> StoreResult<bool> {
        self.execute(Command::Copy {
            source: source.to_string(),
            destination: destination.to_string(),
            replace,
        })
        .await?
        .into_bool("COPY")
    }

    async fn rename(&self, source: &str, destination: &str) -> StoreResult<bool> {
        self.execute(Command::Rename {
            source: source.to_string(),
            destination: destination.to_string(),
        })
        .await?
        .into_bool("RENAME")
    }

    /// Number of members actually added.
    async fn sadd(&self, key: &str, members: &[&[u8]]) -> StoreResult<i64> {
        self.execute(Command::SAdd {
            key: key.to_string(),
            members: members.iter().map(|m| m.to_vec()).collect(),
        })
        .await?
        .into_int("SADD")
    }

    async fn srem(&self, key: &str, members: &[&[u8]]) -> StoreResult<i64> {
        self.execute(Command::SRem {
            key: key.to_string(),
            members: members.iter().map(|m| m.to_vec()).collect(),
        })
        .await?
        .into_int("SREM")
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.execute(Command::SMembers { key: key.to_string() })
            .await?
            .into_array("SMEMBERS")
    }

    async fn sismember(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.execute(Command::SIsMember {
            key: key.to_string(),
            member: member.to_vec(),
        })
        .await?
        .into_bool("SISMEMBER")
    }

    /// Removes and returns one random member, or `None` for a missing key.
    async fn spop(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute(Command::SPop {
            key: key.to_string(),
            count: None,
        })
        .await?
        .into_optional_bytes("SPOP")
    }

    async fn spop_count(&self, key: &str, count: usize) -> StoreResult<Vec<Vec<u8>>> {
        self.execute(Command::SPop {
            key: key.to_string(),
            count: Some(count),
        })
        .await?
        .into_array("SPOP")
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.execute(Command::Incr { key: key.to_string() })
            .await?
            .into_int("INCR")
    }

    /// List length after the push.
    async fn rpush(&self, key: &str, values: &[&[u8]]) -> StoreResult<i64> {
        self.execute(Command::RPush {
            key: key.to_string(),
            values: values.iter().map(|v| v.to_vec()).collect(),
        })
        .await?
        .into_int("RPUSH")
    }

    async fn rpop(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute(Command::RPop {
            key: key.to_string(),
            count: None,
        })
        .await?
        .into_optional_bytes("RPOP")
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<Vec<u8>>> {
        self.execute(Command::LRange {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_array("LRANGE")
    }

    async fn llen(&self, key: &str) -> StoreResult<i64> {
        self.execute(Command::LLen { key: key.to_string() })
            .await?
            .into_int("LLEN")
    }

    async fn lset(&self, key: &str, index: i64, value: &[u8]) -> StoreResult<bool> {
        self.execute(Command::LSet {
            key: key.to_string(),
            index,
            value: value.to_vec(),
        })
        .await?
        .into_bool("LSET")
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StoreResult<bool> {
        self.execute(Command::LTrim {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_bool("LTRIM")
    }

    /// Number of the given keys that exist.
    async fn exists(&self, keys: &[&str]) -> StoreResult<i64> {
        self.execute(Command::Exists {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        })
        .await?
        .into_int("EXISTS")
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let raw = self
            .execute(Command::Keys {
                pattern: pattern.to_string(),
            })
            .await?
            .into_array("KEYS")?;
        Ok(raw
            .into_iter()
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .collect())
    }

    /// 1 when a new field was created, 0 when an existing one was updated.
    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> StoreResult<i64> {
        self.execute(Command::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_vec(),
        })
        .await?
        .into_int("HSET")
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute(Command::HGet {
            key: key.to_string(),
            field: field.to_string(),
        })
        .await?
        .into_optional_bytes("HGET")
    }

    async fn hkeys(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.execute(Command::HKeys { key: key.to_string() })
            .await?
            .into_array("HKEYS")
    }

    async fn hvals(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        self.execute(Command::HVals { key: key.to_string() })
            .await?
            .into_array("HVALS")
    }

    async fn hlen(&self, key: &str) -> StoreResult<i64> {
        self.execute(Command::HLen { key: key.to_string() })
            .await?
            .into_int("HLEN")
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.execute(Command::HGetAll { key: key.to_string() })
            .await?
            .into_pairs("HGETALL")
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> StoreResult<i64> {
        self.execute(Command::HDel {
            key: key.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        })
        .await?
        .into_int("HDEL")
    }

    async fn dbsize(&self) -> StoreResult<i64> {
        self.execute(Command::DbSize).await?.into_int("DBSIZE")
    }

    async fn flushdb(&self) -> StoreResult<bool> {
        self.execute(Command::FlushDb).await?.into_bool("FLUSHDB")
    }
}

/// Real Redis when `url` is given, in-memory emulation otherwise.
pub async fn connect(url: Option<&str>) -> StoreResult<Arc<dyn RedisInterface>> {
    match url {
        Some(url) => {
            let client = RedisClient::connect(url).await?;
            info!("Connected to Redis");
            Ok(Arc::new(client))
        }
        None => {
            info!("REDIS_URL not set, using in-memory Redis emulation");
            Ok(Arc::new(RedisEmulation::new()))
        }
    }
}
