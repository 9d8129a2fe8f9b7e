//! Base for stores that keep one entity per Redis key.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreResult;
use crate::generic::PrefixedStore;
use crate::redis_utils::{Command, Pipeline, RedisInterface, Reply};
use crate::retry::redis_retry;
use crate::times::MONTH;

/// Untyped single-key store: prefixing, expiration and key-level operations.
///
/// Every call goes through the transient-error retry.
#[derive(Clone)]
pub struct KeyStore {
    prefixed: PrefixedStore,
    redis: Arc<dyn RedisInterface>,
    expiration: Option<Duration>,
}

impl KeyStore {
    pub fn new(kind: &str, name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
        Ok(Self {
            prefixed: PrefixedStore::new(kind, name, prefix)?,
            redis,
            expiration: Some(MONTH),
        })
    }

    /// `None` keeps keys forever.
    pub fn with_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    pub fn name(&self) -> &str {
        self.prefixed.name()
    }

    pub fn prefix(&self) -> &str {
        self.prefixed.prefix()
    }

    pub fn full_prefix(&self) -> &str {
        self.prefixed.full_prefix()
    }

    pub fn full_key(&self, key: impl Display) -> String {
        self.prefixed.full_key(key)
    }

    pub fn redis(&self) -> &Arc<dyn RedisInterface> {
        &self.redis
    }

    pub async fn execute(&self, command: Command) -> StoreResult<Reply> {
        let redis = &self.redis;
        let command = &command;
        redis_retry(self.full_prefix(), move || async move { redis.execute(command.clone()).await }).await
    }

    pub async fn run(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>> {
        let redis = &self.redis;
        let commands = pipeline.commands();
        redis_retry(self.full_prefix(), move || async move {
            redis.execute_pipeline(commands.to_vec()).await
        })
        .await
    }

    /// Runs `write` followed by EXPIRE (when `reset_ttl` and an expiration is set); returns the reply to `write`.
    pub(crate) async fn write_with_ttl(&self, full_key: &str, write: Command, reset_ttl: bool) -> StoreResult<Reply> {
        let ttl = if reset_ttl { self.expiration } else { None };
        let pipeline = Pipeline::new().add(write).expire_opt(full_key, ttl);
        let mut replies = self.run(pipeline).await?.into_iter();
        Ok(replies.next().unwrap_or(Reply::Nil))
    }

    pub async fn drop(&self, key: impl Display) -> StoreResult<bool> {
        let reply = self
            .execute(Command::Del {
                keys: vec![self.full_key(key)],
            })
            .await?;
        Ok(reply.into_int("DEL")? == 1)
    }

    /// Copies the value under `key` to `new_key`, replacing what was there.
    pub async fn copy(&self, key: impl Display, new_key: impl Display) -> StoreResult<bool> {
        self.execute(Command::Copy {
            source: self.full_key(key),
            destination: self.full_key(new_key),
            replace: true,
        })
        .await?
        .into_bool("COPY")
    }

    pub async fn rename(&self, key: impl Display, to: impl Display) -> StoreResult<bool> {
        self.execute(Command::Rename {
            source: self.full_key(key),
            destination: self.full_key(to),
        })
        .await?
        .into_bool("RENAME")
    }

    pub async fn manual_expire(&self, key: impl Display, ttl: Duration) -> StoreResult<bool> {
        self.execute(Command::Expire {
            key: self.full_key(key),
            ttl,
        })
        .await?
        .into_bool("EXPIRE")
    }

    pub async fn persist(&self, key: impl Display) -> StoreResult<bool> {
        self.execute(Command::Persist { key: self.full_key(key) })
            .await?
            .into_bool("PERSIST")
    }

    pub async fn exists(&self, key: impl Display) -> StoreResult<bool> {
        let reply = self
            .execute(Command::Exists {
                keys: vec![self.full_key(key)],
            })
            .await?;
        Ok(reply.into_int("EXISTS")? == 1)
    }

    /// Keys currently in the store, without the prefix.
    pub async fn list_keys(&self) -> StoreResult<Vec<String>> {
        let full_prefix = self.full_prefix();
        let keys = self
            .execute(Command::Keys {
                pattern: format!("{}*", escape_glob(full_prefix)),
            })
            .await?
            .into_array("KEYS")?;
        Ok(keys
            .into_iter()
            .filter_map(|k| String::from_utf8(k).ok())
            .filter_map(|k| k.strip_prefix(full_prefix).map(str::to_string))
            .collect())
    }
}

fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Delegates the key-level operations of [`KeyStore`] to a `key_store` field.
macro_rules! delegate_key_ops {
    ($($generic:ident),* ; $store:ty) => {
        impl<$($generic),*> $store {
            pub fn with_expiration(mut self, expiration: Option<std::time::Duration>) -> Self {
                self.key_store = self.key_store.with_expiration(expiration);
                self
            }

            pub fn key_store(&self) -> &$crate::generic::KeyStore {
                &self.key_store
            }

            pub async fn drop(&self, key: impl std::fmt::Display) -> $crate::StoreResult<bool> {
                self.key_store.drop(key).await
            }

            pub async fn copy(
                &self,
                key: impl std::fmt::Display,
                new_key: impl std::fmt::Display,
            ) -> $crate::StoreResult<bool> {
                self.key_store.copy(key, new_key).await
            }

            pub async fn rename(
                &self,
                key: impl std::fmt::Display,
                to: impl std::fmt::Display,
            ) -> $crate::StoreResult<bool> {
                self.key_store.rename(key, to).await
            }

            pub async fn manual_expire(
                &self,
                key: impl std::fmt::Display,
                ttl: std::time::Duration,
            ) -> $crate::StoreResult<bool> {
                self.key_store.manual_expire(key, ttl).await
            }

            pub async fn exists(&self, key: impl std::fmt::Display) -> $crate::StoreResult<bool> {
                self.key_store.exists(key).await
            }

            pub async fn list_keys(&self) -> $crate::StoreResult<Vec<String>> {
                self.key_store.list_keys().await
            }
        }
    };
}

pub(crate) use delegate_key_ops;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_utils::RedisEmulation;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
        assert_eq!(escape_glob("plain-prefix-"), "plain-prefix-");
    }

    #[tokio::test]
    async fn test_key_operations() {
        let redis: Arc<dyn RedisInterface> = Arc::new(RedisEmulation::new());
        let store = KeyStore::new("KeyStore", "key-ops", "key-store-test", redis.clone()).unwrap();

        redis.set(&store.full_key("a"), b"1", None).await.unwrap();
        assert!(store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());

        assert!(store.copy("a", "b").await.unwrap());
        let mut keys = store.list_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        assert!(store.rename("b", "c").await.unwrap());
        assert!(store.drop("a").await.unwrap());
        assert!(!store.drop("a").await.unwrap());
        assert_eq!(store.list_keys().await.unwrap(), vec!["c".to_string()]);
    }
}
