//! Retries transient Redis failures with randomized exponential backoff.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::error::StoreResult;

const MIN_WAIT: f64 = 0.5;
const MAX_WAIT: f64 = 30.0;
const GIVE_UP_AFTER: Duration = Duration::from_secs(60);

fn backoff(attempt: u32) -> Duration {
    let upper = 2f64.powi(attempt.min(16) as i32).min(MAX_WAIT);
    let wait = rand::thread_rng().gen_range(0.0..=upper).max(MIN_WAIT);
    Duration::from_secs_f64(wait)
}

/// Runs `op` until it succeeds, fails with a non-transient error, or 60 seconds pass.
pub(crate) async fn redis_retry<T, F, Fut>(store: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let started = Instant::now();
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && started.elapsed() < GIVE_UP_AFTER => {
                let wait = backoff(attempt);
                warn!(store = %store, attempt, wait_secs = wait.as_secs_f64(), error = %e, "Redis call failed, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
