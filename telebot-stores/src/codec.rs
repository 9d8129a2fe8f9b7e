//! Value encodings used by stores. Every store value is kept as a UTF-8 string.

use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

pub trait Codec<T>: Send + Sync {
    fn dump(&self, value: &T) -> StoreResult<String>;
    fn load(&self, dump: &str) -> StoreResult<T>;
}

/// JSON via serde; the default codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec {
    fn dump(&self, value: &T) -> StoreResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn load(&self, dump: &str) -> StoreResult<T> {
        Ok(serde_json::from_str(dump)?)
    }
}

/// `Display` / `FromStr` round trip, e.g. integers stored as `"42"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayCodec;

impl<T> Codec<T> for DisplayCodec
where
    T: Display + FromStr,
    T::Err: Display,
{
    fn dump(&self, value: &T) -> StoreResult<String> {
        Ok(value.to_string())
    }

    fn load(&self, dump: &str) -> StoreResult<T> {
        dump.parse()
            .map_err(|e: T::Err| StoreError::Codec(format!("can't parse {:?}: {}", dump, e)))
    }
}

type DumpFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;
type LoadFn<T> = Box<dyn Fn(&str) -> Result<T, String> + Send + Sync>;

/// Codec from a pair of closures.
pub struct FnCodec<T> {
    dump: DumpFn<T>,
    load: LoadFn<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FnCodec<T> {
    pub fn new(
        dump: impl Fn(&T) -> String + Send + Sync + 'static,
        load: impl Fn(&str) -> Result<T, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dump: Box::new(dump),
            load: Box::new(load),
            _marker: PhantomData,
        }
    }
}

impl<T> Codec<T> for FnCodec<T> {
    fn dump(&self, value: &T) -> StoreResult<String> {
        Ok((self.dump)(value))
    }

    fn load(&self, dump: &str) -> StoreResult<T> {
        (self.load)(dump).map_err(StoreError::Codec)
    }
}
