//! Values with full version history, stored as a list of snapshots and backward diffs.
//!
//! Only the latest version keeps a full snapshot once normalized; every older version holds the
//! diff that turns its successor back into it.

use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::diff::{diff, patch_in_place, DiffAction};
use crate::error::{StoreError, StoreResult};
use crate::generic::KeyListStore;
use crate::redis_utils::RedisInterface;

const REVERT_TEMP_TTL: Duration = Duration::from_secs(30 * 60);

/// One stored version. `backdiff` turns the next version's value into this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version<M> {
    pub snapshot: Option<Value>,
    pub backdiff: Option<Vec<DiffAction>>,
    pub meta: Option<M>,
}

pub struct KeyVersionedValueStore<T, M> {
    versions: KeyListStore<Version<M>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, M> Clone for KeyVersionedValueStore<T, M> {
    fn clone(&self) -> Self {
        Self {
            versions: self.versions.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, M> KeyVersionedValueStore<T, M>
where
    T: Serialize + DeserializeOwned,
    M: Serialize + DeserializeOwned + Clone + 'static,
{
    pub fn new(name: &str, prefix: &str, redis: Arc<dyn RedisInterface>) -> StoreResult<Self> {
        let versions = KeyListStore::new(&format!("{}/versions", name), prefix, redis)?.with_expiration(None);
        Ok(Self {
            versions,
            _marker: PhantomData,
        })
    }

    fn full_prefix(&self) -> &str {
        self.versions.key_store().full_prefix()
    }

    pub async fn drop(&self, key: impl Display) -> StoreResult<bool> {
        self.versions.drop(key).await
    }

    pub async fn exists(&self, key: impl Display) -> StoreResult<bool> {
        self.versions.exists(key).await
    }

    pub async fn list_keys(&self) -> StoreResult<Vec<String>> {
        self.versions.list_keys().await
    }

    pub async fn count_versions(&self, key: impl Display) -> StoreResult<i64> {
        self.versions.length(key).await
    }

    pub async fn load_raw_versions(&self, key: impl Display, start_version: i64) -> StoreResult<Vec<Version<M>>> {
        Ok(self.versions.tail(key, start_version).await?.unwrap_or_default())
    }

    /// Stores `value` as the newest version and converts older snapshots to backdiffs.
    /// Returns the number of versions.
    pub async fn save(&self, key: impl Display, value: &T, meta: Option<M>) -> StoreResult<i64> {
        let key = key.to_string();
        let version = Version {
            snapshot: Some(serde_json::to_value(value)?),
            backdiff: None,
            meta,
        };
        let length = self.versions.push(&key, &version, true).await?;
        if let Err(e) = self.normalize(&key).await {
            error!(store = %self.full_prefix(), key = %key, error = %e, "Error converting snapshots to diffs");
        }
        Ok(length)
    }

    async fn normalize(&self, key: &str) -> StoreResult<()> {
        let versions = self.versions.all(key).await?;
        debug!(key, count = versions.len(), "Normalizing versions");
        for (offset, (_, backdiff)) in self.walk_versions(&versions, key)?.into_iter().enumerate() {
            let Some(backdiff) = backdiff else { continue };
            let index = versions.len() - 1 - offset;
            let current = &versions[index];
            if current.backdiff.is_none() {
                debug!(key, offset, index, "Converting snapshot to backdiff");
                let normalized = Version {
                    snapshot: None,
                    backdiff: Some(backdiff),
                    meta: current.meta.clone(),
                };
                self.versions.set(key, index as i64, &normalized, true).await?;
            }
        }
        Ok(())
    }

    /// Values of `versions` from newest to oldest, each with the backdiff that produced it.
    pub fn walk_versions(
        &self,
        versions: &[Version<M>],
        key: &str,
    ) -> StoreResult<Vec<(Value, Option<Vec<DiffAction>>)>> {
        let Some(last) = versions.last() else {
            return Ok(Vec::new());
        };
        let mut current = last
            .snapshot
            .clone()
            .ok_or_else(|| self.corruption("The last version doesn't contain snapshot", key, 0))?;

        let mut walked = Vec::with_capacity(versions.len());
        walked.push((current.clone(), None));
        for (i, version) in versions[..versions.len() - 1].iter().rev().enumerate() {
            let offset = i + 1;
            match (&version.backdiff, &version.snapshot) {
                (Some(backdiff), _) => {
                    patch_in_place(&mut current, backdiff)
                        .map_err(|e| self.corruption(&format!("Backdiff does not apply: {}", e), key, offset))?;
                    walked.push((current.clone(), Some(backdiff.clone())));
                }
                (None, Some(snapshot)) => {
                    let backdiff = diff(&current, snapshot);
                    current = snapshot.clone();
                    walked.push((current.clone(), Some(backdiff)));
                }
                (None, None) => {
                    return Err(self.corruption("Version does not contain snapshot nor backdiff", key, offset));
                }
            }
        }
        Ok(walked)
    }

    fn corruption(&self, message: &str, key: &str, offset: usize) -> StoreError {
        StoreError::VersionCorruption {
            message: message.to_string(),
            store_prefix: self.full_prefix().to_string(),
            key: key.to_string(),
            offset,
        }
    }

    fn oldest_of(&self, versions: &[Version<M>], key: &str) -> StoreResult<Value> {
        let walked = self.walk_versions(versions, key)?;
        walked
            .into_iter()
            .last()
            .map(|(value, _)| value)
            .ok_or_else(|| self.corruption("No versions to walk", key, 0))
    }

    /// Value and meta of `version`; negative values count from the newest (-1).
    pub async fn load_version(&self, key: impl Display, version: i64) -> StoreResult<Option<(T, Option<M>)>> {
        let key = key.to_string();
        let Some(versions) = self.versions.tail(&key, version).await? else {
            return Ok(None);
        };
        let snapshot = self.oldest_of(&versions, &key)?;
        let meta = versions[0].meta.clone();
        Ok(Some((serde_json::from_value(snapshot)?, meta)))
    }

    pub async fn load(&self, key: impl Display) -> StoreResult<Option<T>> {
        Ok(self.load_version(key, -1).await?.map(|(value, _)| value))
    }

    /// Drops every version after `to_version`, making it the newest.
    pub async fn revert(&self, key: impl Display, to_version: i64) -> StoreResult<Option<(T, Option<M>)>> {
        let key = key.to_string();
        if !self.versions.exists(&key).await? {
            return Ok(None);
        }

        let temp_key = Uuid::new_v4().to_string();
        self.versions.copy(&key, &temp_key).await?;
        self.versions.manual_expire(&temp_key, REVERT_TEMP_TTL).await?;

        let Some(versions) = self.versions.tail(&temp_key, to_version).await? else {
            self.versions.drop(&temp_key).await?;
            return Ok(None);
        };
        let snapshot = self.oldest_of(&versions, &temp_key)?;
        let reverted = Version {
            snapshot: Some(snapshot.clone()),
            backdiff: None,
            meta: versions[0].meta.clone(),
        };

        self.versions.set(&temp_key, to_version, &reverted, false).await?;
        self.versions.trim(&temp_key, to_version).await?;
        self.versions.rename(&temp_key, &key).await?;
        // RENAME carries the temp key's TTL over
        self.versions.key_store().persist(&key).await?;
        Ok(Some((serde_json::from_value(snapshot)?, reverted.meta)))
    }
}
