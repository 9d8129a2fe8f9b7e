//! Secrets (API tokens and the like) owned by the admin or by individual users.
//!
//! Secret values are for internal use only and must never be shown back to users.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fernet::Fernet;
use sha2::{Digest, Sha256};
use telebot_stores::{allow_duplicate_stores, DisplayCodec, KeyDictStore, RedisInterface};
use tracing::{error, warn};

use crate::error::{ComponentError, ComponentResult};

/// Owner of secrets shared by the whole bot.
pub const ADMIN_OWNER_ID: u64 = 0;

const SECRET_STORE_PREFIX: &str = "global";
const SECRET_STORE_NAME: &str = "secret";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveSecretResult {
    pub is_saved: bool,
    /// Short status for the admin, e.g. `✅` or a warning.
    pub message: String,
}

impl SaveSecretResult {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            is_saved: false,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// When false, every secret belongs to [`ADMIN_OWNER_ID`].
    fn per_user_secrets(&self) -> bool;

    fn to_env_specific(&self, owner_id: u64) -> u64 {
        if self.per_user_secrets() {
            owner_id
        } else {
            ADMIN_OWNER_ID
        }
    }

    /// Opaque owner id for a Telegram user: the first 8 bytes (little-endian) of SHA-256 over
    /// the decimal user id.
    fn user_to_owner_id(&self, user_id: i64) -> u64 {
        let digest = Sha256::digest(user_id.to_string().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        self.to_env_specific(u64::from_le_bytes(head))
    }

    async fn get_secret(&self, secret_name: &str, owner_id: u64) -> ComponentResult<Option<String>>;

    async fn get_required_secret(&self, secret_name: &str, owner_id: u64) -> ComponentResult<String> {
        self.get_secret(secret_name, owner_id).await?.ok_or_else(|| {
            ComponentError::Secret(format!(
                "required secret {:?} (owner id {}) not found",
                secret_name, owner_id
            ))
        })
    }

    async fn list_secrets(&self, owner_id: u64) -> ComponentResult<Vec<String>>;

    /// Sorted owner ids.
    async fn list_owners(&self) -> ComponentResult<Vec<u64>>;

    async fn save_secret(
        &self,
        secret_name: &str,
        secret_value: &str,
        owner_id: u64,
        allow_update: bool,
    ) -> ComponentResult<SaveSecretResult>;

    async fn remove_secret(&self, secret_name: &str, owner_id: u64) -> ComponentResult<bool>;
}

/// Fernet-encrypted secrets in Redis, shared by all bots on the same instance.
pub struct RedisSecretStore {
    store: KeyDictStore<String>,
    fernet: Fernet,
    secrets_per_user: usize,
    secret_max_len: usize,
    per_user_secrets: bool,
}

impl RedisSecretStore {
    /// `encryption_key` is a url-safe base64 Fernet key (see `Fernet::generate_key`).
    pub fn new(
        redis: Arc<dyn RedisInterface>,
        encryption_key: &str,
        secrets_per_user: usize,
        secret_max_len: usize,
        per_user_secrets: bool,
    ) -> ComponentResult<Self> {
        let fernet = Fernet::new(encryption_key)
            .ok_or_else(|| ComponentError::Secret("invalid Fernet encryption key".to_string()))?;
        allow_duplicate_stores(&format!("{}-{}-", SECRET_STORE_PREFIX, SECRET_STORE_NAME));
        let store = KeyDictStore::with_codec(SECRET_STORE_NAME, SECRET_STORE_PREFIX, redis, DisplayCodec)?
            .with_expiration(None);
        Ok(Self {
            store,
            fernet,
            secrets_per_user,
            secret_max_len,
            per_user_secrets,
        })
    }
}

#[async_trait]
impl SecretStore for RedisSecretStore {
    fn per_user_secrets(&self) -> bool {
        self.per_user_secrets
    }

    async fn get_secret(&self, secret_name: &str, owner_id: u64) -> ComponentResult<Option<String>> {
        let Some(token) = self
            .store
            .get_subkey(self.to_env_specific(owner_id), secret_name)
            .await?
        else {
            return Ok(None);
        };
        let decrypted = self
            .fernet
            .decrypt(&token)
            .map_err(|e| e.to_string())
            .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()));
        match decrypted {
            Ok(secret) => Ok(Some(secret)),
            Err(e) => {
                error!(secret_name, owner_id, error = %e, "Error decrypting secret");
                Ok(None)
            }
        }
    }

    async fn list_secrets(&self, owner_id: u64) -> ComponentResult<Vec<String>> {
        Ok(self.store.list_subkeys(self.to_env_specific(owner_id)).await?)
    }

    async fn list_owners(&self) -> ComponentResult<Vec<u64>> {
        let owners: BTreeSet<u64> = self
            .store
            .list_keys()
            .await?
            .iter()
            .filter_map(|key| key.parse::<u64>().ok())
            .map(|owner_id| self.to_env_specific(owner_id))
            .collect();
        Ok(owners.into_iter().collect())
    }

    async fn save_secret(
        &self,
        secret_name: &str,
        secret_value: &str,
        owner_id: u64,
        allow_update: bool,
    ) -> ComponentResult<SaveSecretResult> {
        let owner_id = self.to_env_specific(owner_id);
        if owner_id != ADMIN_OWNER_ID && self.list_secrets(owner_id).await?.len() >= self.secrets_per_user {
            return Ok(SaveSecretResult::rejected("⚠️ Secrets quota for the user is exhausted"));
        }
        if !allow_update && self.store.get_subkey(owner_id, secret_name).await?.is_some() {
            return Ok(SaveSecretResult::rejected("⚠️ Secret already exists"));
        }
        if secret_value.len() > self.secret_max_len {
            return Ok(SaveSecretResult::rejected(format!(
                "⚠️ Secret length exceeds max allowed secret length ({} bytes)",
                self.secret_max_len
            )));
        }
        let token = self.fernet.encrypt(secret_value.as_bytes());
        match self.store.set_subkey(owner_id, secret_name, &token, false).await {
            Ok(_) => Ok(SaveSecretResult {
                is_saved: true,
                message: "✅".to_string(),
            }),
            Err(e) => {
                error!(secret_name, owner_id, error = %e, "Error saving secret");
                Ok(SaveSecretResult::rejected("⚠️ Error saving the secret to database"))
            }
        }
    }

    async fn remove_secret(&self, secret_name: &str, owner_id: u64) -> ComponentResult<bool> {
        Ok(self
            .store
            .remove_subkey(self.to_env_specific(owner_id), secret_name)
            .await?)
    }
}

/// Read-only admin secrets from a flat TOML file (`name = "value"`), for local runs.
pub struct FileSecretStore {
    secrets: HashMap<String, String>,
}

impl FileSecretStore {
    /// A missing file gives an empty store; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> ComponentResult<Self> {
        let path = path.as_ref();
        let secrets = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| ComponentError::Secret(format!("can't parse {}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Secrets file not found, running without secrets");
                HashMap::new()
            }
            Err(e) => return Err(ComponentError::Secret(format!("can't read {}: {}", path.display(), e))),
        };
        Ok(Self { secrets })
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    fn per_user_secrets(&self) -> bool {
        false
    }

    async fn get_secret(&self, secret_name: &str, _owner_id: u64) -> ComponentResult<Option<String>> {
        Ok(self.secrets.get(secret_name).cloned())
    }

    async fn list_secrets(&self, _owner_id: u64) -> ComponentResult<Vec<String>> {
        let mut names: Vec<String> = self.secrets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_owners(&self) -> ComponentResult<Vec<u64>> {
        Ok(vec![ADMIN_OWNER_ID])
    }

    async fn save_secret(
        &self,
        _secret_name: &str,
        _secret_value: &str,
        _owner_id: u64,
        _allow_update: bool,
    ) -> ComponentResult<SaveSecretResult> {
        Err(ComponentError::Secret("this is a read-only secret store".to_string()))
    }

    async fn remove_secret(&self, _secret_name: &str, _owner_id: u64) -> ComponentResult<bool> {
        Err(ComponentError::Secret("this is a read-only secret store".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn test_file_secret_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_token = \"abc\"\nother = \"xyz\"").unwrap();
        let store = FileSecretStore::load(file.path()).unwrap();

        assert_eq!(store.get_secret("api_token", 123).await.unwrap().as_deref(), Some("abc"));
        assert_eq!(store.get_secret("missing", ADMIN_OWNER_ID).await.unwrap(), None);
        assert!(store.get_required_secret("missing", ADMIN_OWNER_ID).await.is_err());
        assert_eq!(store.list_secrets(ADMIN_OWNER_ID).await.unwrap(), vec!["api_token", "other"]);
        assert_eq!(store.list_owners().await.unwrap(), vec![ADMIN_OWNER_ID]);
        assert!(store.save_secret("new", "value", ADMIN_OWNER_ID, true).await.is_err());
        assert!(store.remove_secret("api_token", ADMIN_OWNER_ID).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_secrets_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::load(dir.path().join("secrets.toml")).unwrap();
        assert!(store.list_secrets(ADMIN_OWNER_ID).await.unwrap().is_empty());
    }

    #[test]
    fn test_owner_ids_collapse_without_per_user_secrets() {
        let store = FileSecretStore {
            secrets: HashMap::new(),
        };
        assert_eq!(store.user_to_owner_id(123456), ADMIN_OWNER_ID);
        assert_eq!(store.to_env_specific(42), ADMIN_OWNER_ID);
    }
}
