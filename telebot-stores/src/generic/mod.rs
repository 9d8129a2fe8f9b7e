//! Generic prefixed stores over [`RedisInterface`](crate::RedisInterface).
//!
//! Every store owns a unique key prefix (see [`PrefixedStore`]); creating two live stores with
//! the same name and bot prefix fails with [`StoreError::DuplicatePrefix`](crate::StoreError).

mod collections;
mod key_store;
mod prefixed;
mod value;
mod versioned;

pub use collections::{KeyDictStore, KeyListStore, KeySetStore, SetStore};
pub use key_store::KeyStore;
pub use prefixed::{allow_duplicate_stores, PrefixedStore};
pub use value::{KeyFlagStore, KeyIntegerStore, KeyValueStore};
pub use versioned::{KeyVersionedValueStore, Version};
