//! Background job helpers.

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::error;

const RESTART_DELAY: Duration = Duration::from_secs(1);
const PRUNE_EVERY: usize = 256;

/// Per-key async mutexes, e.g. to process updates from one chat sequentially.
///
/// The registry keeps weak references only: a lock disappears once nobody holds it.
pub struct LockRegistry<K: Eq + Hash = String> {
    locks: DashMap<K, Weak<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> LockRegistry<K> {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    pub fn get_lock(&self, key: K) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(&key).and_then(|weak| weak.upgrade()) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        self.locks.insert(key, Arc::downgrade(&lock));
        if self.locks.len() % PRUNE_EVERY == 0 {
            self.prune();
        }
        lock
    }

    /// Drops entries whose locks are no longer referenced.
    pub fn prune(&self) {
        self.locks.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for LockRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `job` until it succeeds, logging each error and restarting after a short delay.
///
/// Meant for background loops that should survive unexpected store or API failures.
pub async fn restart_on_errors<F, Fut, T, E>(name: &str, mut job: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    loop {
        match job().await {
            Ok(value) => return value,
            Err(e) => {
                error!(job = name, error = %e, "Unexpected error in background job, restarting");
                tokio::time::sleep(RESTART_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_lock_registry_shares_live_locks() {
        let registry: LockRegistry = LockRegistry::new();
        let a = registry.get_lock("chat-1".to_string());
        let b = registry.get_lock("chat-1".to_string());
        assert!(Arc::ptr_eq(&a, &b));

        drop(a);
        drop(b);
        registry.prune();
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_on_errors_retries_until_ok() {
        let attempts = AtomicUsize::new(0);
        let result = restart_on_errors("flaky", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(format!("attempt {} failed", n))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
