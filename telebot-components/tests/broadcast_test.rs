//! Integration tests for topic subscriptions and the broadcast queue.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use telebot_components::broadcast::{BroadcastHandler, BroadcastHooks, MessageSender, QueuedBroadcast};
use telebot_components::ComponentResult;
use telebot_core::testing::{BotCall, RecordingBot};
use telebot_core::{BotError, User};
use telebot_stores::testing::{random_prefix, TestRedis};
use telebot_stores::Clock;

#[derive(Default)]
struct RecordingHooks {
    started: tokio::sync::Mutex<Vec<String>>,
    ended: tokio::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl BroadcastHooks for RecordingHooks {
    async fn on_broadcast_start(&self, broadcast: &QueuedBroadcast) -> ComponentResult<()> {
        self.started.lock().await.push(broadcast.topic.clone());
        Ok(())
    }

    async fn on_broadcast_end(&self, broadcast: &QueuedBroadcast) -> ComponentResult<()> {
        self.ended.lock().await.push(broadcast.topic.clone());
        Ok(())
    }
}

fn broadcast_handler(redis: &TestRedis, hooks: Arc<RecordingHooks>) -> BroadcastHandler {
    let clock = redis.clock().expect("emulated redis").clone();
    BroadcastHandler::new(redis.redis.clone(), &random_prefix())
        .unwrap()
        .with_clock(clock)
        .with_hooks(hooks)
}

fn users(ids: impl IntoIterator<Item = i64>) -> Vec<User> {
    ids.into_iter().map(|id| User::new(id, format!("User {}", id))).collect()
}

/// **Test: Users subscribe and unsubscribe per topic or everywhere.**
///
/// **Setup:** Empty broadcast handler.
/// **Action:** Subscribe users to "news" and "sport", subscribe one to all topics, unsubscribe.
/// **Expected:** Topics and subscriber lists reflect every change.
#[tokio::test]
async fn test_subscriptions() {
    let redis = TestRedis::emulated();
    let handler = broadcast_handler(&redis, Arc::default());
    let [alice, bob, carol]: [User; 3] = users([1, 2, 3]).try_into().unwrap();

    assert!(handler.subscribe_to_topic("news", &alice).await.unwrap());
    assert!(handler.subscribe_to_topic("news", &bob).await.unwrap());
    assert!(handler.subscribe_to_topic("sport", &alice).await.unwrap());
    assert!(!handler.subscribe_to_topic("sport", &alice).await.unwrap());

    let mut topics = handler.topics().await.unwrap();
    topics.sort();
    assert_eq!(topics, vec!["news", "sport"]);

    assert!(handler.subscribe_to_all_topics(&carol).await.unwrap());
    let sport: HashSet<i64> = handler
        .topic_subscribers("sport")
        .await
        .unwrap()
        .iter()
        .map(|s| s.user_id)
        .collect();
    assert_eq!(sport, HashSet::from([1, 3]));

    assert!(handler.unsubscribe_from_topic("news", &alice).await.unwrap());
    assert!(!handler.unsubscribe_from_topic("news", &alice).await.unwrap());
    let all = handler.all_subscribers().await.unwrap();
    assert_eq!(all["news"].len(), 2);
    assert_eq!(all["sport"].len(), 2);

    assert!(handler.unsubscribe_from_all_topics(&carol).await.unwrap());
    assert_eq!(handler.topic_subscribers("news").await.unwrap().len(), 1);
}

/// **Test: A queued broadcast reaches every subscriber and then finishes.**
///
/// **Setup:** Three subscribers of "news".
/// **Action:** Queue a text broadcast, process the queue, send two batches.
/// **Expected:** The first batch sends the text to all three; the second finds nothing, drops
/// the topic and reports the end through the hook.
#[tokio::test]
async fn test_broadcast_sends_to_all_subscribers() {
    let redis = TestRedis::emulated();
    let hooks = Arc::new(RecordingHooks::default());
    let handler = broadcast_handler(&redis, hooks.clone());
    let bot = RecordingBot::new();
    for user in users([1, 2, 3]) {
        handler.subscribe_to_topic("news", &user).await.unwrap();
    }

    assert!(handler
        .new_broadcast("news", MessageSender::text("Hello"), None)
        .await
        .unwrap());
    assert_eq!(handler.process_queue().await.unwrap(), 1);
    assert_eq!(handler.currently_active_topics().await.unwrap(), vec!["news"]);
    assert_eq!(*hooks.started.lock().await, vec!["news"]);
    assert!(handler.queued_broadcasts().await.unwrap().is_empty());

    assert_eq!(handler.send_batch(bot.as_ref()).await.unwrap(), 3);
    let recipients: HashSet<i64> = bot
        .sent_texts()
        .await
        .into_iter()
        .map(|(chat_id, text)| {
            assert_eq!(text, "Hello");
            chat_id
        })
        .collect();
    assert_eq!(recipients, HashSet::from([1, 2, 3]));
    assert!(hooks.ended.lock().await.is_empty());

    assert_eq!(handler.send_batch(bot.as_ref()).await.unwrap(), 0);
    assert_eq!(*hooks.ended.lock().await, vec!["news"]);
    assert!(handler.currently_active_topics().await.unwrap().is_empty());
}

/// **Test: Scheduled broadcasts wait for their start time.**
///
/// **Setup:** One subscriber; a broadcast scheduled an hour ahead.
/// **Action:** Process the queue now and after the hour.
/// **Expected:** Nothing starts at first; the broadcast starts once due.
#[tokio::test]
async fn test_scheduled_broadcast() {
    let redis = TestRedis::emulated();
    let handler = broadcast_handler(&redis, Arc::default());
    handler.subscribe_to_topic("news", &User::new(1, "A")).await.unwrap();
    let now = redis.clock().unwrap().now();

    handler
        .new_broadcast("news", MessageSender::text("Later"), Some(now + 3600.0))
        .await
        .unwrap();
    assert_eq!(handler.process_queue().await.unwrap(), 0);
    assert_eq!(handler.queued_broadcasts().await.unwrap().len(), 1);

    redis.emulate_wait(3601.0).await;
    assert_eq!(handler.process_queue().await.unwrap(), 1);
    assert!(handler.queued_broadcasts().await.unwrap().is_empty());
}

/// **Test: Broadcasts on a busy topic wait for the current one to finish.**
///
/// **Setup:** One subscriber; two broadcasts queued for the same topic.
/// **Action:** Process the queue, drain the first broadcast, process again.
/// **Expected:** Only one starts at a time.
#[tokio::test]
async fn test_one_broadcast_per_topic_at_a_time() {
    let redis = TestRedis::emulated();
    let handler = broadcast_handler(&redis, Arc::default());
    let bot = RecordingBot::new();
    handler.subscribe_to_topic("news", &User::new(1, "A")).await.unwrap();

    handler.new_broadcast("news", MessageSender::text("first"), None).await.unwrap();
    redis.emulate_wait(1.0).await;
    handler.new_broadcast("news", MessageSender::text("second"), None).await.unwrap();

    assert_eq!(handler.process_queue().await.unwrap(), 1);
    assert_eq!(handler.queued_broadcasts().await.unwrap().len(), 1);
    assert_eq!(handler.process_queue().await.unwrap(), 0);

    assert_eq!(handler.send_batch(bot.as_ref()).await.unwrap(), 1);
    assert_eq!(handler.send_batch(bot.as_ref()).await.unwrap(), 0);
    assert_eq!(handler.process_queue().await.unwrap(), 1);
    assert_eq!(handler.send_batch(bot.as_ref()).await.unwrap(), 1);
    assert_eq!(bot.sent_texts().await.len(), 2);
}

/// **Test: Rate limiting is retried, other errors are skipped.**
///
/// **Setup:** Two subscribers; the first send is rate limited and its retry fails with an API
/// error.
/// **Action:** Broadcast a copied message.
/// **Expected:** The failed subscriber is skipped, the other one gets the copy; the batch reports
/// one success.
#[tokio::test(start_paused = true)]
async fn test_send_batch_retries_rate_limited() {
    let redis = TestRedis::emulated();
    let handler = broadcast_handler(&redis, Arc::default());
    let bot = RecordingBot::new();
    for user in users([1, 2]) {
        handler.subscribe_to_topic("news", &user).await.unwrap();
    }
    bot.fail_next("copy_message", BotError::RateLimited { retry_after: 1 }).await;
    bot.fail_next("copy_message", BotError::api("Forbidden: bot was blocked by the user"))
        .await;

    let sender = MessageSender::Copy {
        source_chat_id: -100,
        source_message_id: 5,
    };
    handler.new_broadcast("news", sender, None).await.unwrap();
    handler.process_queue().await.unwrap();

    assert_eq!(handler.send_batch(bot.as_ref()).await.unwrap(), 1);
    let copies: Vec<BotCall> = bot.calls().await;
    assert_eq!(copies.len(), 1);
    assert!(matches!(
        copies[0],
        BotCall::CopyMessage {
            from_chat_id: -100,
            message_id: 5,
            ..
        }
    ));
}
