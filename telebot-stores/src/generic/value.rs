//! Scalar stores: values, counters and flags.

use std::fmt::Display;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{Codec, DisplayCodec, JsonCodec};
use crate::error::StoreResult;
use crate::generic::key_store::delegate_key_ops;
use crate::generic::KeyStore;
use crate::redis_utils::{Command, RedisInterface};

/// One value per key.
pub struct KeyValueStore<T> {
    key_store: KeyStore,
    codec: Arc<dyn Codec<T>>,
}

impl<T> Clone for KeyValueStore<T> {
    fn clone(&self) -> Self {
        Self {
            key_store: self.key_store.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<T: Serialize + DeserializeOwned + 'static> KeyValueStore<T> {
    pub fn new(name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
        Self::with_codec(name, prefix, redis, JsonCodec)
    }
}

impl<T> KeyValueStore<T> {
    pub fn with_codec(
        name: &str,
        prefix: &str,
        redis: Arc<dyn RedisInterface>,
        codec: impl Codec<T> + 'static,
    ) -> StoreResult<Self> {
        Ok(Self {
            key_store: KeyStore::new("KeyValueStore", name, prefix, redis)?,
            codec: Arc::new(codec),
        })
    }

    /// Overwrites the value and resets its TTL.
    pub async fn save(&self, key: impl Display, value: &T) -> StoreResult<bool> {
        let dump = self.codec.dump(value)?;
        self.key_store
            .execute(Command::Set {
                key: self.key_store.full_key(key),
                value: dump.into_bytes(),
                ex: self.key_store.expiration(),
            })
            .await?
            .into_bool("SET")
    }

    /// Resets the TTL without touching the value; `false` if the key does not exist.
    pub async fn touch(&self, key: impl Display) -> StoreResult<bool> {
        match self.key_store.expiration() {
            Some(ttl) => self.key_store.manual_expire(key, ttl).await,
            None => Ok(true),
        }
    }

    pub async fn load(&self, key: impl Display) -> StoreResult<Option<T>> {
        let dump = self
            .key_store
            .execute(Command::Get {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_optional_bytes("GET")?;
        dump.map(|bytes| self.codec.load(&String::from_utf8_lossy(&bytes)))
            .transpose()
    }
}

delegate_key_ops!(T; KeyValueStore<T>);

/// Counters, stored as decimal strings.
#[derive(Clone)]
pub struct KeyIntegerStore {
    key_store: KeyStore,
}

impl KeyIntegerStore {
    pub fn new(name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
        Ok(Self {
            key_store: KeyStore::new("KeyIntegerStore", name, prefix, redis)?,
        })
    }

    /// Increments the counter (missing keys start from 0) and returns the new value.
    pub async fn increment(&self, key: impl Display, reset_ttl: bool) -> StoreResult<i64> {
        let full_key = self.key_store.full_key(key);
        self.key_store
            .write_with_ttl(&full_key, Command::Incr { key: full_key.clone() }, reset_ttl)
            .await?
            .into_int("INCR")
    }

    pub async fn load(&self, key: impl Display) -> StoreResult<Option<i64>> {
        let dump = self
            .key_store
            .execute(Command::Get {
                key: self.key_store.full_key(key),
            })
            .await?
            .into_optional_bytes("GET")?;
        dump.map(|bytes| DisplayCodec.load(&String::from_utf8_lossy(&bytes)))
            .transpose()
    }

    pub async fn save(&self, key: impl Display, value: i64) -> StoreResult<bool> {
        self.key_store
            .execute(Command::Set {
                key: self.key_store.full_key(key),
                value: Codec::<i64>::dump(&DisplayCodec, &value)?.into_bytes(),
                ex: self.key_store.expiration(),
            })
            .await?
            .into_bool("SET")
    }
}

delegate_key_ops!(; KeyIntegerStore);

/// Presence flags.
#[derive(Clone)]
pub struct KeyFlagStore {
    key_store: KeyStore,
}

impl KeyFlagStore {
    pub fn new(name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
        Ok(Self {
            key_store: KeyStore::new("KeyFlagStore", name, prefix, redis)?,
        })
    }

    pub async fn set_flag(&self, key: impl Display) -> StoreResult<bool> {
        self.key_store
            .execute(Command::Set {
                key: self.key_store.full_key(key),
                value: b"1".to_vec(),
                ex: self.key_store.expiration(),
            })
            .await?
            .into_bool("SET")
    }

    pub async fn is_flag_set(&self, key: impl Display) -> StoreResult<bool> {
        self.key_store.exists(key).await
    }

    /// `true` if the flag was set.
    pub async fn unset_flag(&self, key: impl Display) -> StoreResult<bool> {
        self.key_store.drop(key).await
    }
}

delegate_key_ops!(; KeyFlagStore);
