//! # telebot-stores
//!
//! Persistence layer for bot components.
//!
//! ## Modules
//!
//! - [`redis_utils`] – [`RedisInterface`] command set, in-memory [`RedisEmulation`] and real [`RedisClient`]
//! - [`generic`] – prefixed typed stores (key-value, set, list, dict, flag, counter, versioned)
//! - [`codec`] – value (de)serialization for stores
//! - [`diff`] – JSON diff/patch used by versioned values
//! - [`clock`] – injectable time source
//! - [`times`] – common expiration durations

pub mod clock;
pub mod codec;
pub mod diff;
mod error;
pub mod generic;
pub mod redis_utils;
mod retry;
pub mod times;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, DisplayCodec, FnCodec, JsonCodec};
pub use error::{StoreError, StoreResult};
pub use generic::{
    allow_duplicate_stores, KeyDictStore, KeyFlagStore, KeyIntegerStore, KeyListStore, KeySetStore,
    KeyStore, KeyValueStore, KeyVersionedValueStore, PrefixedStore, SetStore, Version,
};
pub use redis_utils::{connect, Command, Pipeline, RedisClient, RedisEmulation, RedisInterface, Reply};
