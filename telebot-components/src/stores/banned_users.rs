//! Permanently banned users with an optional in-process cache.
//!
//! Bans are checked on every incoming message and issued rarely, so the cached mode loads the
//! whole set once and keeps it in memory.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use telebot_stores::{RedisInterface, SetStore};
use tracing::info;

use crate::error::ComponentResult;

pub struct BannedUsersStore {
    banned_user_ids: SetStore<i64>,
    cached: bool,
    cache: RwLock<Option<HashSet<i64>>>,
}

impl BannedUsersStore {
    pub fn new(redis: Arc<dyn RedisInterface>, bot_prefix: &str, cached: bool) -> ComponentResult<Self> {
        Ok(Self {
            banned_user_ids: SetStore::new("banned-user-ids", bot_prefix, redis)?.with_expiration(None),
            cached,
            cache: RwLock::new(None),
        })
    }

    async fn ensure_cache(&self) -> ComponentResult<()> {
        if self.cache.read().is_some() {
            return Ok(());
        }
        let all = self.banned_user_ids.all().await?;
        let mut cache = self.cache.write();
        if cache.is_none() {
            *cache = Some(all);
        }
        Ok(())
    }

    /// `false` if the user was already banned.
    pub async fn ban_user(&self, user_id: i64) -> ComponentResult<bool> {
        if !self.banned_user_ids.add(&user_id).await? {
            return Ok(false);
        }
        info!(user_id, "User banned");
        if self.cached {
            self.ensure_cache().await?;
            if let Some(cache) = self.cache.write().as_mut() {
                cache.insert(user_id);
            }
        }
        Ok(true)
    }

    pub async fn is_banned(&self, user_id: i64) -> ComponentResult<bool> {
        if !self.cached {
            return Ok(self.banned_user_ids.includes(&user_id).await?);
        }
        self.ensure_cache().await?;
        Ok(self
            .cache
            .read()
            .as_ref()
            .is_some_and(|cache| cache.contains(&user_id)))
    }
}
