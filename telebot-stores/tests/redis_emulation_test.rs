//! Integration tests for [`telebot_stores::RedisEmulation`] through [`RedisInterface`].

use std::sync::Arc;
use std::time::Duration;

use telebot_stores::{Command, ManualClock, Pipeline, RedisEmulation, RedisInterface, Reply, StoreError};

fn emulation() -> (RedisEmulation, Arc<ManualClock>) {
    let clock = ManualClock::new();
    (RedisEmulation::with_clock(clock.clone()), clock)
}

/// **Test: SET with EX expires; plain SET clears an existing TTL.**
///
/// **Setup:** Emulation on a manual clock.
/// **Action:** SET with 10s EX, overwrite one key without EX, advance 11s.
/// **Expected:** The overwritten key survives, the other one is gone.
#[tokio::test]
async fn test_set_expiration() {
    let (redis, clock) = emulation();
    redis.set("a", b"1", Some(Duration::from_secs(10))).await.unwrap();
    redis.set("b", b"1", Some(Duration::from_secs(10))).await.unwrap();
    redis.set("b", b"2", None).await.unwrap();

    clock.advance(11.0);
    assert_eq!(redis.get("a").await.unwrap(), None);
    assert_eq!(redis.get("b").await.unwrap(), Some(b"2".to_vec()));
    assert_eq!(redis.exists(&["a", "b"]).await.unwrap(), 1);
}

/// **Test: Commands against the wrong type fail with WRONGTYPE.**
///
/// **Setup:** A string key.
/// **Action:** SADD, RPUSH and HGET on it.
/// **Expected:** `StoreError::WrongType` each time; the value is unchanged.
#[tokio::test]
async fn test_wrong_type() {
    let (redis, _clock) = emulation();
    redis.set("k", b"v", None).await.unwrap();
    assert!(matches!(redis.sadd("k", &[b"x".as_slice()]).await, Err(StoreError::WrongType)));
    assert!(matches!(redis.rpush("k", &[b"x".as_slice()]).await, Err(StoreError::WrongType)));
    assert!(matches!(redis.hget("k", "f").await, Err(StoreError::WrongType)));
    assert_eq!(redis.get("k").await.unwrap(), Some(b"v".to_vec()));
}

/// **Test: LRANGE and LTRIM follow Redis index rules.**
///
/// **Setup:** List 0..10.
/// **Action:** LRANGE with negative and out-of-range bounds; LTRIM to the middle.
/// **Expected:** Same slices Redis would return; trimming to an empty range deletes the key.
#[tokio::test]
async fn test_list_ranges() {
    let (redis, _clock) = emulation();
    let items: Vec<Vec<u8>> = (0..10).map(|i: i32| i.to_string().into_bytes()).collect();
    let refs: Vec<&[u8]> = items.iter().map(Vec::as_slice).collect();
    assert_eq!(redis.rpush("l", &refs).await.unwrap(), 10);

    assert_eq!(redis.lrange("l", -2, -1).await.unwrap(), vec![b"8".to_vec(), b"9".to_vec()]);
    assert_eq!(redis.lrange("l", 8, 100).await.unwrap(), vec![b"8".to_vec(), b"9".to_vec()]);
    assert!(redis.lrange("l", 5, 2).await.unwrap().is_empty());

    redis.ltrim("l", 2, 4).await.unwrap();
    assert_eq!(redis.llen("l").await.unwrap(), 3);
    redis.ltrim("l", 5, 1).await.unwrap();
    assert_eq!(redis.exists(&["l"]).await.unwrap(), 0);
}

/// **Test: KEYS matches Redis glob patterns.**
///
/// **Setup:** Keys `user:1`, `user:22`, `user:a`, `admin`.
/// **Action:** KEYS with `user:?`, `user:*`, `user:[0-9]*`.
/// **Expected:** Matching subsets.
#[tokio::test]
async fn test_keys_glob() {
    let (redis, _clock) = emulation();
    for key in ["user:1", "user:22", "user:a", "admin"] {
        redis.set(key, b"", None).await.unwrap();
    }
    let sorted = |mut keys: Vec<String>| {
        keys.sort();
        keys
    };
    assert_eq!(sorted(redis.keys("user:?").await.unwrap()), vec!["user:1", "user:a"]);
    assert_eq!(sorted(redis.keys("user:*").await.unwrap()).len(), 3);
    assert_eq!(sorted(redis.keys("user:[0-9]*").await.unwrap()), vec!["user:1", "user:22"]);
}

/// **Test: Pipelines return one reply per command.**
///
/// **Setup:** Empty emulation.
/// **Action:** Pipeline of RPUSH, EXPIRE, LLEN.
/// **Expected:** Replies `Int(1)`, `Int(1)`, `Int(1)`.
#[tokio::test]
async fn test_pipeline_replies() {
    let (redis, clock) = emulation();
    let pipeline = Pipeline::new()
        .add(Command::RPush {
            key: "l".to_string(),
            values: vec![b"x".to_vec()],
        })
        .expire_opt("l", Some(Duration::from_secs(5)))
        .add(Command::LLen { key: "l".to_string() });
    let replies = redis.run(pipeline).await.unwrap();
    assert_eq!(replies, vec![Reply::Int(1), Reply::Int(1), Reply::Int(1)]);

    clock.advance(5.0);
    assert_eq!(redis.llen("l").await.unwrap(), 0);
}

/// **Test: A failing command inside a pipeline does not stop the rest.**
///
/// **Setup:** Key `s` holds a string.
/// **Action:** Pipeline of SADD on `s` (wrong type) followed by SET `after`.
/// **Expected:** The pipeline reports `WrongType`, yet `after` was written.
#[tokio::test]
async fn test_pipeline_runs_commands_after_error() {
    let (redis, _clock) = emulation();
    redis.set("s", b"1", None).await.unwrap();
    let pipeline = Pipeline::new()
        .add(Command::SAdd {
            key: "s".to_string(),
            members: vec![b"x".to_vec()],
        })
        .add(Command::Set {
            key: "after".to_string(),
            value: b"2".to_vec(),
            ex: None,
        });
    assert!(matches!(redis.run(pipeline).await, Err(StoreError::WrongType)));
    assert_eq!(redis.get("after").await.unwrap(), Some(b"2".to_vec()));
    assert_eq!(redis.get("s").await.unwrap(), Some(b"1".to_vec()));
}

/// **Test: RENAME moves the value with its TTL; COPY respects `replace`.**
///
/// **Setup:** Key `a` with a TTL, key `b` without.
/// **Action:** COPY a→b without and with replace; RENAME a→c; RENAME a missing key.
/// **Expected:** Copy without replace fails; renamed key keeps the TTL; missing rename errors.
#[tokio::test]
async fn test_copy_and_rename() {
    let (redis, clock) = emulation();
    redis.set("a", b"1", Some(Duration::from_secs(10))).await.unwrap();
    redis.set("b", b"2", None).await.unwrap();

    assert!(!redis.copy("a", "b", false).await.unwrap());
    assert!(redis.copy("a", "b", true).await.unwrap());
    assert!(redis.rename("a", "c").await.unwrap());
    assert!(redis.rename("a", "d").await.is_err());

    clock.advance(11.0);
    assert_eq!(redis.get("c").await.unwrap(), None);
    assert_eq!(redis.get("b").await.unwrap(), None);
}

/// **Test: Hash replies keep field insertion order.**
///
/// **Setup:** HSET three fields, overwrite the first.
/// **Action:** HKEYS, HGETALL, HDEL.
/// **Expected:** Fields stay in insertion order; deleting every field removes the key.
#[tokio::test]
async fn test_hash_order() {
    let (redis, _clock) = emulation();
    for (field, value) in [("z", "1"), ("a", "2"), ("m", "3"), ("z", "4")] {
        redis.hset("h", field, value.as_bytes()).await.unwrap();
    }
    assert_eq!(
        redis.hkeys("h").await.unwrap(),
        vec![b"z".to_vec(), b"a".to_vec(), b"m".to_vec()]
    );
    assert_eq!(redis.hgetall("h").await.unwrap()[0], (b"z".to_vec(), b"4".to_vec()));
    assert_eq!(redis.hlen("h").await.unwrap(), 3);
    assert_eq!(redis.hdel("h", &["z", "a", "m", "nope"]).await.unwrap(), 3);
    assert_eq!(redis.exists(&["h"]).await.unwrap(), 0);
}
