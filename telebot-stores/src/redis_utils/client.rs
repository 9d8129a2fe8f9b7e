//! Real Redis backend over a multiplexed async connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::{Command, RedisInterface, Reply, ReplyKind};
use crate::error::StoreResult;

#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        Self::from_client(client).await
    }

    /// Connects to a specific logical database of the server at `url`.
    pub async fn connect_db(url: &str, db: i64) -> StoreResult<Self> {
        let mut info = redis::IntoConnectionInfo::into_connection_info(url)?;
        info.redis.db = db;
        let client = redis::Client::open(info)?;
        Self::from_client(client).await
    }

    async fn from_client(client: redis::Client) -> StoreResult<Self> {
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self { connection })
    }
}

fn to_redis_cmd(command: &Command) -> redis::Cmd {
    let mut cmd = redis::cmd(command.name());
    match command {
        Command::Set { key, value, ex } => {
            cmd.arg(key).arg(value.as_slice());
            if let Some(ex) = ex {
                cmd.arg("PX").arg(ex.as_millis() as u64);
            }
        }
        Command::Get { key }
        | Command::Persist { key }
        | Command::SMembers { key }
        | Command::Incr { key }
        | Command::LLen { key }
        | Command::HKeys { key }
        | Command::HVals { key }
        | Command::HLen { key }
        | Command::HGetAll { key } => {
            cmd.arg(key);
        }
        Command::Expire { key, ttl } => {
            cmd = redis::cmd("PEXPIRE");
            cmd.arg(key).arg(ttl.as_millis() as u64);
        }
        Command::Del { keys } | Command::Exists { keys } => {
            cmd.arg(keys);
        }
        Command::Copy {
            source,
            destination,
            replace,
        } => {
            cmd.arg(source).arg(destination);
            if *replace {
                cmd.arg("REPLACE");
            }
        }
        Command::Rename { source, destination } => {
            cmd.arg(source).arg(destination);
        }
        Command::SAdd { key, members } | Command::SRem { key, members } => {
            cmd.arg(key);
            for m in members {
                cmd.arg(m.as_slice());
            }
        }
        Command::SIsMember { key, member } => {
            cmd.arg(key).arg(member.as_slice());
        }
        Command::SPop { key, count } | Command::RPop { key, count } => {
            cmd.arg(key);
            if let Some(count) = count {
                cmd.arg(*count);
            }
        }
        Command::RPush { key, values } => {
            cmd.arg(key);
            for v in values {
                cmd.arg(v.as_slice());
            }
        }
        Command::LRange { key, start, stop } | Command::LTrim { key, start, stop } => {
            cmd.arg(key).arg(*start).arg(*stop);
        }
        Command::LSet { key, index, value } => {
            cmd.arg(key).arg(*index).arg(value.as_slice());
        }
        Command::Keys { pattern } => {
            cmd.arg(pattern);
        }
        Command::HSet { key, field, value } => {
            cmd.arg(key).arg(field).arg(value.as_slice());
        }
        Command::HGet { key, field } => {
            cmd.arg(key).arg(field);
        }
        Command::HDel { key, fields } => {
            cmd.arg(key).arg(fields);
        }
        Command::DbSize | Command::FlushDb => {}
    }
    cmd
}

fn decode(kind: ReplyKind, value: &redis::Value) -> StoreResult<Reply> {
    if matches!(value, redis::Value::Nil) {
        return Ok(Reply::Nil);
    }
    Ok(match kind {
        ReplyKind::Status => Reply::Ok,
        ReplyKind::Int => Reply::Int(redis::from_redis_value(value)?),
        ReplyKind::OptionalBulk => Reply::Bulk(redis::from_redis_value(value)?),
        ReplyKind::Array | ReplyKind::OptionalArray => Reply::Array(redis::from_redis_value(value)?),
        ReplyKind::Pairs => {
            let map: std::collections::HashMap<Vec<u8>, Vec<u8>> = redis::from_redis_value(value)?;
            Reply::Pairs(map.into_iter().collect())
        }
    })
}

#[async_trait]
impl RedisInterface for RedisClient {
    async fn execute(&self, command: Command) -> StoreResult<Reply> {
        let mut connection = self.connection.clone();
        let value: redis::Value = to_redis_cmd(&command).query_async(&mut connection).await?;
        debug!(command = command.name(), "redis command executed");
        decode(command.reply_kind(), &value)
    }

    async fn execute_pipeline(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            pipe.add_command(to_redis_cmd(command));
        }
        let mut connection = self.connection.clone();
        let values: Vec<redis::Value> = pipe.query_async(&mut connection).await?;
        commands
            .iter()
            .zip(values.iter())
            .map(|(command, value)| decode(command.reply_kind(), value))
            .collect()
    }
}
