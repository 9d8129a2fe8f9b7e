//! Test fixtures: a Redis backend per test and unique store prefixes.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::error::{StoreError, StoreResult};
use crate::redis_utils::{RedisClient, RedisEmulation, RedisInterface};

const REAL_REDIS_DBS: std::ops::RangeInclusive<i64> = 1..=10;

/// Redis for one test: a real DB when `REDIS_URL` is set, an emulation on a manual clock otherwise.
pub struct TestRedis {
    pub redis: Arc<dyn RedisInterface>,
    clock: Option<Arc<ManualClock>>,
}

impl TestRedis {
    pub fn emulated() -> Self {
        let clock = ManualClock::new();
        Self {
            redis: Arc::new(RedisEmulation::with_clock(clock.clone())),
            clock: Some(clock),
        }
    }

    pub fn is_real(&self) -> bool {
        self.clock.is_none()
    }

    pub fn clock(&self) -> Option<&Arc<ManualClock>> {
        self.clock.as_ref()
    }

    /// Lets `seconds` pass: instantly on the emulation, by sleeping on real Redis.
    pub async fn emulate_wait(&self, seconds: f64) {
        match &self.clock {
            Some(clock) => clock.advance(seconds),
            None => tokio::time::sleep(Duration::from_secs_f64(seconds)).await,
        }
    }

    /// Flushes the real DB so the next test finds it empty.
    pub async fn teardown(self) -> StoreResult<()> {
        if self.is_real() {
            self.redis.flushdb().await?;
        }
        Ok(())
    }
}

pub async fn test_redis() -> StoreResult<TestRedis> {
    let Ok(url) = std::env::var("REDIS_URL") else {
        return Ok(TestRedis::emulated());
    };
    for db in REAL_REDIS_DBS {
        let client = RedisClient::connect_db(&url, db).await?;
        if client.dbsize().await? == 0 {
            info!(db, "Using real Redis for tests");
            return Ok(TestRedis {
                redis: Arc::new(client),
                clock: None,
            });
        }
    }
    Err(StoreError::Command(format!(
        "no empty Redis DB in {:?} at REDIS_URL",
        REAL_REDIS_DBS
    )))
}

/// A bot prefix no other test uses.
pub fn random_prefix() -> String {
    format!("test-{}", Uuid::new_v4().simple())
}
