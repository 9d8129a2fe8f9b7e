//! Store prefixes and the process-wide registry that keeps them unique.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

static PREFIX_REGISTRY: LazyLock<Mutex<HashSet<String>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

/// Clears registry entries starting with `prefix`, so the same stores can be created again.
///
/// Meant for tests that rebuild a bot with the same prefix; never needed in a running bot.
pub fn allow_duplicate_stores(prefix: &str) {
    PREFIX_REGISTRY.lock().retain(|full| !full.starts_with(prefix));
}

/// Holds a registry entry while alive.
#[derive(Debug)]
struct Registration {
    full_prefix: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        PREFIX_REGISTRY.lock().remove(&self.full_prefix);
    }
}

/// Name and bot prefix of a store, turned into a unique key prefix.
///
/// The full prefix is `"{prefix}-{name}-{hash}-"`, where the hash (first 5 hex chars of
/// SHA-256 over `"{prefix}-{name}"`) keeps nested names like `a` and `ab` apart.
#[derive(Debug, Clone)]
pub struct PrefixedStore {
    name: String,
    prefix: String,
    registration: Arc<Registration>,
}

impl PrefixedStore {
    /// Registers the prefix; `kind` names the store type in the duplicate error.
    pub fn new(kind: &str, name: &str, prefix: &str) -> StoreResult<Self> {
        let full_prefix = full_prefix(name, prefix);
        let mut registry = PREFIX_REGISTRY.lock();
        if !registry.insert(full_prefix.clone()) {
            return Err(StoreError::DuplicatePrefix {
                kind: kind.to_string(),
                prefix: full_prefix,
            });
        }
        drop(registry);
        debug!(kind, full_prefix = %full_prefix, "Store registered");
        Ok(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            registration: Arc::new(Registration { full_prefix }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn full_prefix(&self) -> &str {
        &self.registration.full_prefix
    }

    pub fn full_key(&self, key: impl std::fmt::Display) -> String {
        format!("{}{}", self.full_prefix(), key)
    }
}

fn full_prefix(name: &str, prefix: &str) -> String {
    let plain = format!("{}-{}", prefix, name);
    let digest = Sha256::digest(plain.as_bytes());
    let hash: String = digest.iter().take(3).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}-", plain, &hash[..5])
}
