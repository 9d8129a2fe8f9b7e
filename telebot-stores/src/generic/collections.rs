//! Container stores: sets, lists and dicts under a key.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, JsonCodec};
use crate::error::StoreResult;
use crate::generic::key_store::delegate_key_ops;
use crate::generic::KeyStore;
use crate::redis_utils::{Command, Pipeline, RedisInterface, Reply};

fn decode<T>(codec: &dyn Codec<T>, bytes: &[u8]) -> StoreResult<T> {
    codec.load(&String::from_utf8_lossy(bytes))
}

macro_rules! codec_store {
    ($store:ident, $kind:literal) => {
        impl<T: Serialize + DeserializeOwned + 'static> $store<T> {
            pub fn new(name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
                Self::with_codec(name, prefix, redis, JsonCodec)
            }
        }

        impl<T> $store<T> {
            pub fn with_codec(
                name: &str,
                prefix: &str,
                redis: Arc<dyn RedisInterface>,
                codec: impl Codec<T> + 'static,
            ) -> StoreResult<Self> {
                Ok(Self {
                    key_store: KeyStore::new($kind, name, prefix, redis)?,
                    codec: Arc::new(codec),
                })
            }

            fn from_parts(key_store: KeyStore, codec: Arc<dyn Codec<T>>) -> Self {
                Self { key_store, codec }
            }
        }

        impl<T> Clone for $store<T> {
            fn clone(&self) -> Self {
                Self::from_parts(self.key_store.clone(), self.codec.clone())
            }
        }

        delegate_key_ops!(T; $store<T>);
    };
}

/// A set of items per key.
pub struct KeySetStore<T> {
    key_store: KeyStore,
    codec: Arc<dyn Codec<T>>,
}

codec_store!(KeySetStore, "KeySetStore");

impl<T> KeySetStore<T> {
    /// `true` if the item was not in the set yet.
    pub async fn add(&self, key: impl Display, item: &T, reset_ttl: bool) -> StoreResult<bool> {
        self.add_multiple(key, std::slice::from_ref(item), reset_ttl).await
    }

    /// `true` if every item was new.
    pub async fn add_multiple(&self, key: impl Display, items: &[T], reset_ttl: bool) -> StoreResult<bool> {
        let full_key = self.key_store.full_key(key);
        let members = items
            .iter()
            .map(|item| self.codec.dump(item).map(String::into_bytes))
            .collect::<StoreResult<Vec<_>>>()?;
        let n_items = members.len() as i64;
        let ttl = if reset_ttl { self.key_store.expiration() } else { None };
        let pipeline = Pipeline::new()
            .add(Command::SAdd {
                key: full_key.clone(),
                members,
            })
            .expire_opt(&full_key, ttl);
        let replies = self.key_store.run(pipeline).await?;
        Ok(replies.into_iter().enumerate().all(|(i, reply)| match (i, reply) {
            (0, Reply::Int(added)) => added == n_items,
            (_, Reply::Int(n)) => n == 1,
            (_, Reply::Ok) => true,
            _ => false,
        }))
    }

    /// Removes and returns up to `count` random items.
    pub async fn pop_multiple(&self, key: impl Display, count: usize) -> StoreResult<Vec<T>> {
        let dumps = self
            .key_store
            .execute(Command::SPop {
                key: self.key_store.full_key(key),
                count: Some(count),
            })
            .await?
            .into_array("SPOP")?;
        dumps.iter().map(|d| decode(self.codec.as_ref(), d)).collect()
    }

    pub async fn remove(&self, key: impl Display, item: &T) -> StoreResult<bool> {
        let removed = self
            .key_store
            .execute(Command::SRem {
                key: self.key_store.full_key(key),
                members: vec![self.codec.dump(item)?.into_bytes()],
            })
            .await?
            .into_int("SREM")?;
        Ok(removed == 1)
    }

    pub async fn includes(&self, key: impl Display, item: &T) -> StoreResult<bool> {
        self.key_store
            .execute(Command::SIsMember {
                key: self.key_store.full_key(key),
                member: self.codec.dump(item)?.into_bytes(),
            })
            .await?
            .into_bool("SISMEMBER")
    }

    pub async fn all(&self, key: impl Display) -> StoreResult<HashSet<T>>
    where
        T: Eq + Hash,
    {
        let dumps = self
            .key_store
            .execute(Command::SMembers {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_array("SMEMBERS")?;
        dumps.iter().map(|d| decode(self.codec.as_ref(), d)).collect()
    }
}

/// A single set, kept under a constant key.
pub struct SetStore<T> {
    inner: KeySetStore<T>,
}

impl<T> Clone for SetStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Serialize + DeserializeOwned + 'static> SetStore<T> {
    pub fn new(name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
        Self::with_codec(name, prefix, redis, JsonCodec)
    }
}

impl<T> SetStore<T> {
    const KEY: &'static str = "const";

    pub fn with_codec(
        name: &str,
        prefix: &str,
        redis: Arc<dyn RedisInterface>,
        codec: impl Codec<T> + 'static,
    ) -> StoreResult<Self> {
        let key_store = KeyStore::new("SetStore", &format!("{}-fixed", name), prefix, redis)?;
        Ok(Self {
            inner: KeySetStore::from_parts(key_store, Arc::new(codec)),
        })
    }

    pub fn with_expiration(mut self, expiration: Option<std::time::Duration>) -> Self {
        self.inner = self.inner.with_expiration(expiration);
        self
    }

    pub async fn drop(&self) -> StoreResult<bool> {
        self.inner.drop(Self::KEY).await
    }

    pub async fn add(&self, item: &T) -> StoreResult<bool> {
        self.inner.add(Self::KEY, item, true).await
    }

    pub async fn remove(&self, item: &T) -> StoreResult<bool> {
        self.inner.remove(Self::KEY, item).await
    }

    pub async fn includes(&self, item: &T) -> StoreResult<bool> {
        self.inner.includes(Self::KEY, item).await
    }

    pub async fn all(&self) -> StoreResult<HashSet<T>>
    where
        T: Eq + Hash,
    {
        self.inner.all(Self::KEY).await
    }
}

/// A list of items per key.
pub struct KeyListStore<T> {
    key_store: KeyStore,
    codec: Arc<dyn Codec<T>>,
}

codec_store!(KeyListStore, "KeyListStore");

impl<T> KeyListStore<T> {
    /// Appends the item; returns the list length after the push.
    pub async fn push(&self, key: impl Display, item: &T, reset_ttl: bool) -> StoreResult<i64> {
        let full_key = self.key_store.full_key(key);
        let value = self.codec.dump(item)?.into_bytes();
        self.key_store
            .write_with_ttl(
                &full_key,
                Command::RPush {
                    key: full_key.clone(),
                    values: vec![value],
                },
                reset_ttl,
            )
            .await?
            .into_int("RPUSH")
    }

    pub async fn all(&self, key: impl Display) -> StoreResult<Vec<T>> {
        Ok(self.tail(key, 0).await?.unwrap_or_default())
    }

    pub async fn length(&self, key: impl Display) -> StoreResult<i64> {
        self.key_store
            .execute(Command::LLen {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_int("LLEN")
    }

    /// Items from `start` (negative counts from the end) to the end; `None` when that is empty.
    pub async fn tail(&self, key: impl Display, start: i64) -> StoreResult<Option<Vec<T>>> {
        let dumps = self
            .key_store
            .execute(Command::LRange {
                key: self.key_store.full_key(key),
                start,
                stop: -1,
            })
            .await?
            .into_array("LRANGE")?;
        if dumps.is_empty() {
            return Ok(None);
        }
        dumps
            .iter()
            .map(|d| decode(self.codec.as_ref(), d))
            .collect::<StoreResult<Vec<_>>>()
            .map(Some)
    }

    /// Replaces the item at `index`.
    pub async fn set(&self, key: impl Display, index: i64, item: &T, reset_ttl: bool) -> StoreResult<bool> {
        let full_key = self.key_store.full_key(key);
        let value = self.codec.dump(item)?.into_bytes();
        self.key_store
            .write_with_ttl(
                &full_key,
                Command::LSet {
                    key: full_key.clone(),
                    index,
                    value,
                },
                reset_ttl,
            )
            .await?
            .into_bool("LSET")
    }

    /// Keeps items `0..=last` (negative counts from the end).
    pub async fn trim(&self, key: impl Display, last: i64) -> StoreResult<()> {
        self.key_store
            .execute(Command::LTrim {
                key: self.key_store.full_key(key),
                start: 0,
                stop: last,
            })
            .await?;
        Ok(())
    }
}

/// A string-keyed dict of items per key.
pub struct KeyDictStore<T> {
    key_store: KeyStore,
    codec: Arc<dyn Codec<T>>,
}

codec_store!(KeyDictStore, "KeyDictStore");

impl<T> KeyDictStore<T> {
    /// `true` if the subkey is new.
    pub async fn set_subkey(
        &self,
        key: impl Display,
        subkey: impl Display,
        value: &T,
        reset_ttl: bool,
    ) -> StoreResult<bool> {
        let full_key = self.key_store.full_key(key);
        let value = self.codec.dump(value)?.into_bytes();
        let added = self
            .key_store
            .write_with_ttl(
                &full_key,
                Command::HSet {
                    key: full_key.clone(),
                    field: subkey.to_string(),
                    value,
                },
                reset_ttl,
            )
            .await?
            .into_int("HSET")?;
        Ok(added == 1)
    }

    pub async fn get_subkey(&self, key: impl Display, subkey: impl Display) -> StoreResult<Option<T>> {
        let dump = self
            .key_store
            .execute(Command::HGet {
                key: self.key_store.full_key(key),
                field: subkey.to_string(),
            })
            .await?
            .into_optional_bytes("HGET")?;
        dump.map(|d| decode(self.codec.as_ref(), &d)).transpose()
    }

    pub async fn list_subkeys(&self, key: impl Display) -> StoreResult<Vec<String>> {
        let subkeys = self
            .key_store
            .execute(Command::HKeys {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_array("HKEYS")?;
        Ok(subkeys
            .into_iter()
            .map(|s| String::from_utf8_lossy(&s).into_owned())
            .collect())
    }

    pub async fn list_values(&self, key: impl Display) -> StoreResult<Vec<T>> {
        let dumps = self
            .key_store
            .execute(Command::HVals {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_array("HVALS")?;
        dumps.iter().map(|d| decode(self.codec.as_ref(), d)).collect()
    }

    pub async fn load(&self, key: impl Display) -> StoreResult<HashMap<String, T>> {
        let pairs = self
            .key_store
            .execute(Command::HGetAll {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_pairs("HGETALL")?;
        pairs
            .into_iter()
            .map(|(field, dump)| {
                let value = decode(self.codec.as_ref(), &dump)?;
                Ok((String::from_utf8_lossy(&field).into_owned(), value))
            })
            .collect()
    }

    /// `true` if the subkey existed.
    pub async fn remove_subkey(&self, key: impl Display, subkey: impl Display) -> StoreResult<bool> {
        let removed = self
            .key_store
            .execute(Command::HDel {
                key: self.key_store.full_key(key),
                fields: vec![subkey.to_string()],
            })
            .await?
            .into_int("HDEL")?;
        Ok(removed == 1)
    }
}
