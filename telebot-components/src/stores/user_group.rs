//! Named user groups (admins, testers, ...) with a pluggable user identity.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use telebot_core::{BotApi, SendOptions, User};
use telebot_stores::{DisplayCodec, RedisInterface, SetStore};
use tracing::{debug, error};

use crate::error::{ComponentError, ComponentResult};

/// Maps a user to the string a group stores, e.g. the id or the username.
#[async_trait]
pub trait UserIdentity: Send + Sync {
    async fn identify(&self, user: &User) -> ComponentResult<String>;
}

/// The numeric user id as a string.
pub struct UserIdIdentity;

#[async_trait]
impl UserIdentity for UserIdIdentity {
    async fn identify(&self, user: &User) -> ComponentResult<String> {
        Ok(user.id.to_string())
    }
}

/// The username without `@`; users without one can't be identified.
pub struct UsernameIdentity;

#[async_trait]
impl UserIdentity for UsernameIdentity {
    async fn identify(&self, user: &User) -> ComponentResult<String> {
        user.username
            .clone()
            .ok_or_else(|| ComponentError::Other(format!("user {} has no username", user.id)))
    }
}

pub struct UserGroupStore {
    name: String,
    user_identity: Arc<dyn UserIdentity>,
    store: SetStore<String>,
    cache: RwLock<Option<HashSet<String>>>,
}

impl UserGroupStore {
    pub fn new(
        redis: Arc<dyn RedisInterface>,
        prefix: &str,
        group_name: &str,
        user_identity: Arc<dyn UserIdentity>,
    ) -> ComponentResult<Self> {
        let store = SetStore::with_codec(&format!("user-group-{}", group_name), prefix, redis, DisplayCodec)?
            .with_expiration(None);
        Ok(Self {
            name: group_name.to_string(),
            user_identity,
            store,
            cache: RwLock::new(None),
        })
    }

    /// Group keyed by user id.
    pub fn by_user_id(redis: Arc<dyn RedisInterface>, prefix: &str, group_name: &str) -> ComponentResult<Self> {
        Self::new(redis, prefix, group_name, Arc::new(UserIdIdentity))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_cache_initialized(&self) -> ComponentResult<()> {
        if self.cache.read().is_some() {
            return Ok(());
        }
        let members = self.store.all().await?;
        let mut cache = self.cache.write();
        if cache.is_none() {
            *cache = Some(members);
        }
        Ok(())
    }

    pub async fn member_identities(&self) -> ComponentResult<HashSet<String>> {
        self.ensure_cache_initialized().await?;
        Ok(self.cache.read().clone().unwrap_or_default())
    }

    pub async fn is_member_by_identity(&self, identity: &str) -> ComponentResult<bool> {
        self.ensure_cache_initialized().await?;
        Ok(self
            .cache
            .read()
            .as_ref()
            .is_some_and(|members| members.contains(identity)))
    }

    /// `false` when the user can't be identified.
    pub async fn is_member(&self, user: &User) -> ComponentResult<bool> {
        match self.user_identity.identify(user).await {
            Ok(identity) => self.is_member_by_identity(&identity).await,
            Err(e) => {
                debug!(user_id = user.id, error = %e, "Can't identify user");
                Ok(false)
            }
        }
    }

    pub async fn add_identity(&self, identity: &str) -> ComponentResult<bool> {
        self.ensure_cache_initialized().await?;
        if !self.store.add(&identity.to_string()).await? {
            error!(group = %self.name, identity, "Identity is already in the group");
            return Ok(false);
        }
        if let Some(members) = self.cache.write().as_mut() {
            members.insert(identity.to_string());
        }
        Ok(true)
    }

    pub async fn remove_identity(&self, identity: &str) -> ComponentResult<bool> {
        self.ensure_cache_initialized().await?;
        if !self.store.remove(&identity.to_string()).await? {
            error!(group = %self.name, identity, "Identity is not in the group");
            return Ok(false);
        }
        if let Some(members) = self.cache.write().as_mut() {
            members.remove(identity);
        }
        Ok(true)
    }

    /// `false` if the user was already a member or can't be identified.
    pub async fn add(&self, user: &User) -> ComponentResult<bool> {
        match self.user_identity.identify(user).await {
            Ok(identity) => self.add_identity(&identity).await,
            Err(_) => Ok(false),
        }
    }

    pub async fn remove(&self, user: &User) -> ComponentResult<bool> {
        match self.user_identity.identify(user).await {
            Ok(identity) => self.remove_identity(&identity).await,
            Err(_) => Ok(false),
        }
    }

    /// Membership gate for handlers: replies with `reply_text` (when given) to non-members.
    pub async fn check_membership(
        &self,
        bot: &dyn BotApi,
        user: &User,
        reply_text: Option<&str>,
    ) -> ComponentResult<bool> {
        if self.is_member(user).await? {
            return Ok(true);
        }
        if let Some(text) = reply_text.filter(|t| !t.is_empty()) {
            bot.send_message(user.id, text, SendOptions::new()).await?;
        }
        Ok(false)
    }
}
