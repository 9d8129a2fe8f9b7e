//! Topic subscriptions and scheduled broadcasts.
//!
//! Users subscribe to named topics. A broadcast is queued for a topic with a [`MessageSender`] and a
//! start time; once due (and once any previous broadcast on the topic has finished) the topic's
//! subscribers are copied into a pending set, which the sending loop drains in rate-limited batches.

mod message_senders;
mod subscriber;

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use telebot_core::{BotApi, BotError, User};
use telebot_stores::{Clock, KeyDictStore, KeySetStore, KeyValueStore, RedisInterface, SystemClock};
use tokio::time::Instant;
use tracing::{error, info};

pub use message_senders::MessageSender;
pub use subscriber::Subscriber;

use crate::error::ComponentResult;
use crate::utils::restart_on_errors;

const BATCH_SIZE: usize = 200;
const QUEUE_KEY: &str = "const";
const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const SEND_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Telegram allows about 30 msg/s for broadcasts; stay well below.
const MAX_MESSAGES_PER_WINDOW: usize = 20;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedBroadcast {
    pub sender: MessageSender,
    pub topic: String,
    /// Unix seconds.
    pub start_time: f64,
}

impl PartialEq for QueuedBroadcast {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender && self.topic == other.topic && self.start_time.to_bits() == other.start_time.to_bits()
    }
}

impl Eq for QueuedBroadcast {}

impl Hash for QueuedBroadcast {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sender.hash(state);
        self.topic.hash(state);
        self.start_time.to_bits().hash(state);
    }
}

/// Notified when a queued broadcast starts sending and when its last subscriber is done.
#[async_trait]
pub trait BroadcastHooks: Send + Sync {
    async fn on_broadcast_start(&self, _broadcast: &QueuedBroadcast) -> ComponentResult<()> {
        Ok(())
    }

    async fn on_broadcast_end(&self, _broadcast: &QueuedBroadcast) -> ComponentResult<()> {
        Ok(())
    }
}

pub struct NoBroadcastHooks;

impl BroadcastHooks for NoBroadcastHooks {}

/// Higher key = served first within a batch.
pub type TopicPriorityKey = Arc<dyn Fn(&str) -> f64 + Send + Sync>;

fn random_priority(_topic: &str) -> f64 {
    rand::thread_rng().gen()
}

pub struct BroadcastHandler {
    subscribers: KeyDictStore<Subscriber>,
    current_broadcasts: KeyValueStore<QueuedBroadcast>,
    pending_subscribers: KeySetStore<Subscriber>,
    queue: KeySetStore<QueuedBroadcast>,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn BroadcastHooks>,
    topic_priority_key: TopicPriorityKey,
    next_queue_processing_time: Mutex<f64>,
    is_broadcasting: AtomicBool,
}

impl BroadcastHandler {
    pub fn new(redis: Arc<dyn RedisInterface>, bot_prefix: &str) -> ComponentResult<Self> {
        Ok(Self {
            subscribers: KeyDictStore::new("subscribers-by-topic", bot_prefix, redis.clone())?.with_expiration(None),
            current_broadcasts: KeyValueStore::new("current-message-sender-by-topic", bot_prefix, redis.clone())?
                .with_expiration(None),
            pending_subscribers: KeySetStore::new("current-pending-subscribers-by-topic", bot_prefix, redis.clone())?
                .with_expiration(None),
            queue: KeySetStore::new("queued-broadcasts", bot_prefix, redis)?.with_expiration(None),
            clock: Arc::new(SystemClock),
            hooks: Arc::new(NoBroadcastHooks),
            topic_priority_key: Arc::new(random_priority),
            // process whatever survived a restart on the first pass
            next_queue_processing_time: Mutex::new(0.0),
            is_broadcasting: AtomicBool::new(true),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn BroadcastHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_topic_priority(mut self, key: TopicPriorityKey) -> Self {
        self.topic_priority_key = key;
        self
    }

    // subscriptions

    pub async fn topics(&self) -> ComponentResult<Vec<String>> {
        Ok(self.subscribers.list_keys().await?)
    }

    pub async fn currently_active_topics(&self) -> ComponentResult<Vec<String>> {
        Ok(self.current_broadcasts.list_keys().await?)
    }

    pub async fn subscribe_to_topic(&self, topic: &str, user: &User) -> ComponentResult<bool> {
        let subscriber = Subscriber::from_user(user, self.clock.now());
        Ok(self.subscribers.set_subkey(topic, user.id, &subscriber, false).await?)
    }

    /// Subscribes to every topic that has at least one subscriber; `true` if all were new.
    pub async fn subscribe_to_all_topics(&self, user: &User) -> ComponentResult<bool> {
        let mut all_new = true;
        for topic in self.topics().await? {
            all_new &= self.subscribe_to_topic(&topic, user).await?;
        }
        Ok(all_new)
    }

    pub async fn unsubscribe_from_topic(&self, topic: &str, user: &User) -> ComponentResult<bool> {
        Ok(self.subscribers.remove_subkey(topic, user.id).await?)
    }

    pub async fn unsubscribe_from_all_topics(&self, user: &User) -> ComponentResult<bool> {
        let mut all_removed = true;
        for topic in self.topics().await? {
            all_removed &= self.unsubscribe_from_topic(&topic, user).await?;
        }
        Ok(all_removed)
    }

    pub async fn topic_subscribers(&self, topic: &str) -> ComponentResult<Vec<Subscriber>> {
        Ok(self.subscribers.list_values(topic).await?)
    }

    pub async fn all_subscribers(&self) -> ComponentResult<HashMap<String, Vec<Subscriber>>> {
        let mut result = HashMap::new();
        for topic in self.topics().await? {
            let subscribers = self.topic_subscribers(&topic).await?;
            result.insert(topic, subscribers);
        }
        Ok(result)
    }

    // queue

    /// Queues a broadcast starting at `schedule_at` (unix seconds), or now. `false` if the same
    /// broadcast is already queued.
    pub async fn new_broadcast(
        &self,
        topic: &str,
        sender: MessageSender,
        schedule_at: Option<f64>,
    ) -> ComponentResult<bool> {
        let broadcast = QueuedBroadcast {
            sender,
            topic: topic.to_string(),
            start_time: schedule_at.unwrap_or_else(|| self.clock.now()),
        };
        if !self.queue.add(QUEUE_KEY, &broadcast, false).await? {
            return Ok(false);
        }
        let mut next = self.next_queue_processing_time.lock();
        *next = next.min(broadcast.start_time);
        Ok(true)
    }

    pub async fn queued_broadcasts(&self) -> ComponentResult<Vec<QueuedBroadcast>> {
        Ok(self.queue.all(QUEUE_KEY).await?.into_iter().collect())
    }

    /// Starts every due broadcast whose topic is idle. Returns how many were started.
    pub async fn process_queue(&self) -> ComponentResult<usize> {
        info!("Processing broadcast queue");
        let mut started = Vec::new();
        for broadcast in self.queue.all(QUEUE_KEY).await? {
            let now = self.clock.now();
            if broadcast.start_time > now {
                continue;
            }
            if self.current_broadcasts.load(&broadcast.topic).await?.is_some() {
                info!(
                    topic = %broadcast.topic,
                    overdue_sec = now - broadcast.start_time,
                    "Overdue broadcast is waiting for the previous one on this topic to finish"
                );
                continue;
            }
            info!(
                topic = %broadcast.topic,
                scheduled_sec_ago = now - broadcast.start_time,
                sender = ?broadcast.sender,
                "Starting broadcast"
            );
            self.current_broadcasts.save(&broadcast.topic, &broadcast).await?;
            let subscribers = self.topic_subscribers(&broadcast.topic).await?;
            if !subscribers.is_empty() {
                self.pending_subscribers
                    .add_multiple(&broadcast.topic, &subscribers, false)
                    .await?;
            }
            self.is_broadcasting.store(true, Ordering::SeqCst);
            self.queue.remove(QUEUE_KEY, &broadcast).await?;
            self.hooks.on_broadcast_start(&broadcast).await?;
            started.push(broadcast);
        }
        if !started.is_empty() {
            info!(count = started.len(), "Broadcasts popped from the queue");
        }

        let next = self
            .queue
            .all(QUEUE_KEY)
            .await?
            .iter()
            .map(|b| b.start_time)
            .fold(f64::INFINITY, f64::min);
        *self.next_queue_processing_time.lock() = next;
        if next.is_finite() {
            info!(in_sec = next - self.clock.now(), "Next broadcast queue processing scheduled");
        }
        Ok(started.len())
    }

    // sending

    /// Pops up to one batch of pending subscribers across active topics (highest priority first)
    /// and sends to them under the broadcast rate limit. Topics with nothing left are finished.
    /// Returns the number of messages delivered.
    pub async fn send_batch(&self, bot: &dyn BotApi) -> ComponentResult<usize> {
        let mut keyed: Vec<(f64, String)> = self
            .currently_active_topics()
            .await?
            .into_iter()
            .map(|topic| ((self.topic_priority_key)(&topic), topic))
            .collect();
        keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut batch: Vec<(QueuedBroadcast, Subscriber)> = Vec::new();
        for (_, topic) in keyed {
            let remaining = BATCH_SIZE.saturating_sub(batch.len());
            if remaining == 0 {
                break;
            }
            let subscribers = self.pending_subscribers.pop_multiple(&topic, remaining).await?;
            let broadcast = self.current_broadcasts.load(&topic).await?;
            let broadcast = match broadcast {
                Some(broadcast) if !subscribers.is_empty() => broadcast,
                broadcast => {
                    self.current_broadcasts.drop(&topic).await?;
                    self.pending_subscribers.drop(&topic).await?;
                    if let Some(broadcast) = broadcast {
                        info!(topic = %topic, "Broadcast completed");
                        self.hooks.on_broadcast_end(&broadcast).await?;
                    }
                    continue;
                }
            };
            info!(topic = %topic, count = subscribers.len(), "Subscribers loaded for batch");
            batch.extend(subscribers.into_iter().map(|s| (broadcast.clone(), s)));
        }

        if batch.is_empty() {
            info!("No pending subscribers, standing by");
            self.is_broadcasting.store(false, Ordering::SeqCst);
            return Ok(0);
        }

        info!(count = batch.len(), "Sending batch");
        let started_at = Instant::now();
        let mut limiter = SlidingWindow::new(MAX_MESSAGES_PER_WINDOW, RATE_LIMIT_WINDOW);
        let mut success_count = 0;
        for (broadcast, subscriber) in &batch {
            loop {
                limiter.acquire().await;
                match broadcast.sender.send(bot, subscriber).await {
                    Ok(()) => success_count += 1,
                    Err(BotError::RateLimited { retry_after }) => {
                        error!(retry_after, "Rate limited by Telegram during broadcast");
                        tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
                        continue;
                    }
                    Err(e) => {
                        info!(user_id = subscriber.user_id, error = %e, "Error sending broadcast message");
                    }
                }
                break;
            }
        }
        info!(
            "Batch sent: {} / {} messages are successful; took around {:.3} sec",
            success_count,
            batch.len(),
            started_at.elapsed().as_secs_f64()
        );
        Ok(success_count)
    }

    async fn process_queue_loop(&self) -> ComponentResult<()> {
        loop {
            let next = *self.next_queue_processing_time.lock();
            if self.clock.now() >= next {
                self.process_queue().await?;
            }
            tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
        }
    }

    async fn send_loop(&self, bot: &dyn BotApi) -> ComponentResult<()> {
        let active = !self.currently_active_topics().await?.is_empty();
        self.is_broadcasting.store(active, Ordering::SeqCst);
        loop {
            tokio::time::sleep(SEND_POLL_INTERVAL).await;
            if self.is_broadcasting.load(Ordering::SeqCst) {
                self.send_batch(bot).await?;
            }
        }
    }

    /// Runs queue processing and sending forever, restarting each on errors.
    pub async fn background_job(&self, bot: Arc<dyn BotApi>) {
        tokio::join!(
            restart_on_errors("broadcast queue", || self.process_queue_loop()),
            restart_on_errors("broadcast sender", || self.send_loop(bot.as_ref())),
        );
    }
}

/// At most `limit` acquisitions within any `window`.
struct SlidingWindow {
    limit: usize,
    window: Duration,
    times: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            times: VecDeque::with_capacity(limit),
        }
    }

    async fn acquire(&mut self) {
        let now = Instant::now();
        while self.times.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            self.times.pop_front();
        }
        if self.times.len() >= self.limit {
            if let Some(oldest) = self.times.pop_front() {
                tokio::time::sleep_until(oldest + self.window).await;
            }
        }
        self.times.push_back(Instant::now());
    }
}
