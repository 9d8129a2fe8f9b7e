//! Integration tests for the encrypted Redis secret store.
//!
//! All secret stores share one global prefix, so these tests run serially.

use fernet::Fernet;
use serial_test::serial;
use telebot_components::secrets::{RedisSecretStore, SecretStore, ADMIN_OWNER_ID};
use telebot_components::ComponentError;
use telebot_stores::testing::TestRedis;

fn secret_store(redis: &TestRedis, per_user_secrets: bool) -> RedisSecretStore {
    RedisSecretStore::new(redis.redis.clone(), &Fernet::generate_key(), 2, 16, per_user_secrets).unwrap()
}

/// **Test: Secrets are saved encrypted and read back per owner.**
///
/// **Setup:** Per-user secret store, two secrets per user, 16 bytes max.
/// **Action:** Save, read, list, update and remove secrets for two owners.
/// **Expected:** Owners are isolated; existing secrets need `allow_update`.
#[tokio::test]
#[serial]
async fn test_save_and_read_secrets() {
    let redis = TestRedis::emulated();
    let store = secret_store(&redis, true);
    let alice = store.user_to_owner_id(1);
    let bob = store.user_to_owner_id(2);
    assert_ne!(alice, bob);

    let result = store.save_secret("token", "abc", alice, false).await.unwrap();
    assert!(result.is_saved);
    assert_eq!(result.message, "✅");
    assert_eq!(store.get_secret("token", alice).await.unwrap().as_deref(), Some("abc"));
    assert_eq!(store.get_secret("token", bob).await.unwrap(), None);

    let result = store.save_secret("token", "xyz", alice, false).await.unwrap();
    assert!(!result.is_saved);
    assert_eq!(result.message, "⚠️ Secret already exists");
    assert!(store.save_secret("token", "xyz", alice, true).await.unwrap().is_saved);
    assert_eq!(store.get_required_secret("token", alice).await.unwrap(), "xyz");

    store.save_secret("other", "1", bob, false).await.unwrap();
    let mut expected_owners = vec![alice, bob];
    expected_owners.sort();
    assert_eq!(store.list_owners().await.unwrap(), expected_owners);
    assert_eq!(store.list_secrets(alice).await.unwrap(), vec!["token"]);

    assert!(store.remove_secret("token", alice).await.unwrap());
    assert!(!store.remove_secret("token", alice).await.unwrap());
    assert!(matches!(
        store.get_required_secret("token", alice).await,
        Err(ComponentError::Secret(_))
    ));
}

/// **Test: Quota and length limits reject secrets for regular owners.**
///
/// **Setup:** Two secrets per user, 16 bytes max.
/// **Action:** Save an overlong secret, then three secrets for one owner and for the admin.
/// **Expected:** The long one and the third are rejected; the admin has no quota.
#[tokio::test]
#[serial]
async fn test_secret_limits() {
    let redis = TestRedis::emulated();
    let store = secret_store(&redis, true);
    let owner = store.user_to_owner_id(10);

    let result = store
        .save_secret("long", "0123456789abcdef!", owner, false)
        .await
        .unwrap();
    assert!(!result.is_saved);
    assert!(result.message.contains("16 bytes"));

    assert!(store.save_secret("a", "1", owner, false).await.unwrap().is_saved);
    assert!(store.save_secret("b", "2", owner, false).await.unwrap().is_saved);
    let result = store.save_secret("c", "3", owner, false).await.unwrap();
    assert!(!result.is_saved);
    assert_eq!(result.message, "⚠️ Secrets quota for the user is exhausted");

    for name in ["a", "b", "c"] {
        assert!(store.save_secret(name, "v", ADMIN_OWNER_ID, false).await.unwrap().is_saved);
    }
}

/// **Test: Without per-user secrets every owner is the admin.**
///
/// **Setup:** Store with `per_user_secrets = false`.
/// **Action:** Save a secret for some user, read it as another.
/// **Expected:** Both map to [`ADMIN_OWNER_ID`] and see the same secret.
#[tokio::test]
#[serial]
async fn test_shared_secrets() {
    let redis = TestRedis::emulated();
    let store = secret_store(&redis, false);
    let owner = store.user_to_owner_id(123);
    assert_eq!(owner, ADMIN_OWNER_ID);

    store.save_secret("api-key", "k", owner, false).await.unwrap();
    assert_eq!(store.get_secret("api-key", 999).await.unwrap().as_deref(), Some("k"));
    assert_eq!(store.list_owners().await.unwrap(), vec![ADMIN_OWNER_ID]);
}

/// **Test: Secrets encrypted with another key are unreadable, not fatal.**
///
/// **Setup:** Two stores over the same Redis with different keys.
/// **Action:** Save with the first, read with the second.
/// **Expected:** `None` instead of an error.
#[tokio::test]
#[serial]
async fn test_wrong_key_reads_none() {
    let redis = TestRedis::emulated();
    let writer = secret_store(&redis, false);
    let reader = secret_store(&redis, false);

    writer.save_secret("token", "abc", ADMIN_OWNER_ID, false).await.unwrap();
    assert_eq!(reader.get_secret("token", ADMIN_OWNER_ID).await.unwrap(), None);
}

/// **Test: Invalid encryption keys are rejected.**
#[tokio::test]
#[serial]
async fn test_invalid_key() {
    let redis = TestRedis::emulated();
    assert!(matches!(
        RedisSecretStore::new(redis.redis.clone(), "not a key", 1, 1, false),
        Err(ComponentError::Secret(_))
    ));
}
