//! Integration tests for the per-user stores and their callback handlers.

use std::sync::Arc;

use async_trait::async_trait;
use telebot_components::stores::{
    BannedUsersStore, Category, CategoryForumTopicStore, CategorySelectedContext, CategorySelectedHook,
    CategoryStore, ForumTopicIconColor, ForumTopicSpec, ForumTopicStore, ForumTopicStoreErrorMessages,
    LanguageChangeContext, LanguageChangeHook, LanguageSelectionMenuConfig, LanguageStore, LanguageStoreInterface,
    UserGroupStore, UsernameIdentity,
};
use telebot_components::{ComponentError, ComponentResult, Language};
use telebot_core::testing::{BotCall, RecordingBot};
use telebot_core::{
    CallbackQuery, Chat, Handler, HandlerResponse, KeyboardButton, Message, ReplyKeyboardMarkup, ReplyMarkup, Update,
    User,
};
use telebot_stores::testing::{random_prefix, TestRedis};
use telebot_stores::times::DAY;

const ADMIN_CHAT_ID: i64 = -1001;

fn button_press(user: &User, data: &str) -> Update {
    Update::CallbackQuery(CallbackQuery {
        id: "q".to_string(),
        from: user.clone(),
        data: Some(data.to_string()),
        message: Some(Message::text(50, Chat::private(user.id), None, "menu")),
    })
}

fn edited_markups(calls: &[BotCall]) -> Vec<Vec<Vec<String>>> {
    calls
        .iter()
        .filter_map(|c| match c {
            BotCall::EditMessageReplyMarkup { markup, .. } => markup.as_ref().map(|m| m.texts()),
            _ => None,
        })
        .collect()
}

/// **Test: The language selector stores the choice and updates its keyboard.**
///
/// **Setup:** English and Russian, English by default; the user's client is in Russian.
/// **Action:** Query the language, press the English button twice, press a corrupted one.
/// **Expected:** The client language is used until a choice is made; the first press marks
/// English, the second only answers the query; corrupted data gets an alert.
#[tokio::test]
async fn test_language_selection() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    let store = Arc::new(
        LanguageStore::new(
            redis.redis.clone(),
            &random_prefix(),
            [Language::En, Language::Ru],
            Language::En,
            LanguageSelectionMenuConfig::default(),
        )
        .unwrap(),
    );
    let user = User::new(1, "Ivan").with_language_code("ru");
    assert_eq!(store.get_user_language(&user).await.unwrap(), Language::Ru.as_data());
    assert_eq!(store.get_selected_user_language(&user).await.unwrap(), None);

    let handler = store.clone().setup(bot.clone(), None);
    let response = handler.handle(&button_press(&user, "lang:en")).await.unwrap();
    assert_eq!(response, HandlerResponse::Stop);
    assert_eq!(store.get_user_language(&user).await.unwrap(), Language::En.as_data());
    assert_eq!(
        edited_markups(&bot.calls().await),
        vec![vec![vec!["✅ 🇬🇧".to_string(), "🇷🇺".to_string()]]]
    );

    bot.clear().await;
    handler.handle(&button_press(&user, "lang:en")).await.unwrap();
    let calls = bot.calls().await;
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], BotCall::AnswerCallbackQuery { text: None, .. }));

    bot.clear().await;
    handler.handle(&button_press(&user, "lang:xx")).await.unwrap();
    assert!(matches!(
        bot.calls().await[..],
        [BotCall::AnswerCallbackQuery { show_alert: true, .. }]
    ));

    let response = handler.handle(&button_press(&user, "category:1")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);

    assert!(matches!(
        store.set_user_language(&user, Language::Pl).await,
        Err(ComponentError::UnsupportedLanguage(_))
    ));
}

#[derive(Default)]
struct RecordingLanguageHook {
    changes: tokio::sync::Mutex<Vec<(i64, &'static str, Option<i32>)>>,
}

#[async_trait]
impl LanguageChangeHook for RecordingLanguageHook {
    async fn on_language_change(&self, context: LanguageChangeContext) -> ComponentResult<()> {
        self.changes
            .lock()
            .await
            .push((context.user.id, context.language.code, context.message_id));
        Ok(())
    }
}

fn private_text(id: i32, user: &User, text: &str) -> Update {
    Update::Message(Message::text(id, Chat::private(user.id), Some(user.clone()), text))
}

/// **Test: The reply keyboard selector takes the pressed language once.**
///
/// **Setup:** English and Russian with a prompt; a recording language change hook.
/// **Action:** Send a language label before the selector, send the selector, press Russian,
/// then send the label again.
/// **Expected:** Labels are ignored until the selector is sent; the keyboard has one language
/// per row; the press switches the language and calls the hook; later labels are ignored.
#[tokio::test]
async fn test_reply_keyboard_language_selector() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    let config = LanguageSelectionMenuConfig {
        prompt: Some("Choose your language".into()),
        ..Default::default()
    };
    let store = Arc::new(
        LanguageStore::new(redis.redis.clone(), &random_prefix(), [Language::En, Language::Ru], Language::En, config)
            .unwrap(),
    );
    let hook = Arc::new(RecordingLanguageHook::default());
    let handler = store.clone().setup(bot.clone(), Some(hook.clone()));
    let user = User::new(1, "Ivan");

    let response = handler.handle(&private_text(10, &user, "🇷🇺")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);

    store.send_reply_keyboard_selector(bot.as_ref(), &user).await.unwrap();
    let expected_markup = ReplyMarkup::Keyboard(ReplyKeyboardMarkup {
        keyboard: vec![vec![KeyboardButton::new("🇬🇧")], vec![KeyboardButton::new("🇷🇺")]],
        resize_keyboard: true,
        one_time_keyboard: true,
    });
    match &bot.calls().await[..] {
        [BotCall::SendMessage { chat_id: 1, text, options, .. }] => {
            assert_eq!(text, "Choose your language");
            assert_eq!(options.reply_markup.as_ref(), Some(&expected_markup));
        }
        calls => panic!("unexpected calls: {:?}", calls),
    }

    let response = handler.handle(&private_text(11, &user, "hello")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);
    let response = handler.handle(&private_text(12, &user, " 🇷🇺 ")).await.unwrap();
    assert_eq!(response, HandlerResponse::Stop);
    assert_eq!(store.get_user_language(&user).await.unwrap(), Language::Ru.as_data());
    assert_eq!(*hook.changes.lock().await, vec![(1, "ru", Some(12))]);

    let response = handler.handle(&private_text(13, &user, "🇬🇧")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);
    assert_eq!(store.get_user_language(&user).await.unwrap(), Language::Ru.as_data());
}

/// **Test: The reply keyboard selector needs a prompt.**
///
/// **Setup:** A language store with the default menu config.
/// **Action:** Send the reply keyboard selector.
/// **Expected:** A config error and nothing sent.
#[tokio::test]
async fn test_reply_keyboard_selector_requires_prompt() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    let store = LanguageStore::new(
        redis.redis.clone(),
        &random_prefix(),
        [Language::En, Language::Ru],
        Language::En,
        LanguageSelectionMenuConfig::default(),
    )
    .unwrap();
    let result = store.send_reply_keyboard_selector(bot.as_ref(), &User::new(1, "Ivan")).await;
    assert!(matches!(result, Err(ComponentError::Config(_))));
    assert!(bot.calls().await.is_empty());
}

#[derive(Default)]
struct RecordingCategoryHook {
    selected: tokio::sync::Mutex<Vec<(i64, i64)>>,
}

#[async_trait]
impl CategorySelectedHook for RecordingCategoryHook {
    async fn on_category_selected(&self, context: CategorySelectedContext) -> ComponentResult<()> {
        self.selected.lock().await.push((context.user.id, context.category.id));
        Ok(())
    }
}

/// **Test: Category buttons save the choice and mark it.**
///
/// **Setup:** Two visible categories and a hidden one; a selection hook.
/// **Action:** Render the markup, press the second category, press an unknown one.
/// **Expected:** Hidden categories have no button; the pressed one is checked and the hook is
/// called; the unknown id gets an alert.
#[tokio::test]
async fn test_category_selection() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    let categories = vec![
        Category::new(1, "Questions", "❓ Questions"),
        Category::new(2, "Bugs", "🐞 Bugs").with_hashtag("bug"),
        Category::new(3, "Legacy", "Legacy").hidden(),
    ];
    let store = Arc::new(
        CategoryStore::new(&random_prefix(), redis.redis.clone(), categories, CategoryStore::DEFAULT_CATEGORY_TTL, None)
            .unwrap(),
    );
    let user = User::new(5, "Bob");
    assert_eq!(
        store.markup(&user).await.unwrap().texts(),
        vec![vec!["❓ Questions".to_string()], vec!["🐞 Bugs".to_string()]]
    );

    let hook = Arc::new(RecordingCategoryHook::default());
    let handler = store.clone().setup(bot.clone(), Some(hook.clone()));
    handler.handle(&button_press(&user, "category:2")).await.unwrap();
    assert_eq!(store.get_user_category(&user).await.unwrap().map(|c| c.id), Some(2));
    assert_eq!(
        edited_markups(&bot.calls().await),
        vec![vec![vec!["❓ Questions".to_string()], vec!["✅ 🐞 Bugs".to_string()]]]
    );
    assert_eq!(*hook.selected.lock().await, vec![(5, 2)]);

    bot.clear().await;
    handler.handle(&button_press(&user, "category:99")).await.unwrap();
    match &bot.calls().await[..] {
        [BotCall::AnswerCallbackQuery { text: Some(text), .. }] => {
            assert_eq!(text, "Server error: corrupted category id: 99 :(")
        }
        other => panic!("unexpected calls {:?}", other),
    }
}

/// **Test: Category choices expire.**
///
/// **Setup:** Category TTL of one day.
/// **Action:** Save a category, wait a day and a second.
/// **Expected:** The user has no category any more.
#[tokio::test]
async fn test_category_expires() {
    let redis = TestRedis::emulated();
    let category = Category::new(1, "Questions", "Questions");
    let store =
        CategoryStore::new(&random_prefix(), redis.redis.clone(), vec![category.clone()], DAY, None).unwrap();
    let user = User::new(5, "Bob");

    store.save_user_category(&user, &category).await.unwrap();
    assert_eq!(store.get_user_category(&user).await.unwrap(), Some(category));
    redis.emulate_wait(DAY.as_secs_f64() + 1.0).await;
    assert_eq!(store.get_user_category(&user).await.unwrap(), None);
}

/// **Test: Bans are permanent in both cached and uncached modes.**
///
/// **Setup:** Two stores over the same Redis, one cached.
/// **Action:** Ban through the cached store, ban again, check through both.
/// **Expected:** The second ban reports `false`; both stores see the ban.
#[tokio::test]
async fn test_banned_users() {
    let redis = TestRedis::emulated();
    let cached = BannedUsersStore::new(redis.redis.clone(), &random_prefix(), true).unwrap();
    let prefix = random_prefix();
    let writer = BannedUsersStore::new(redis.redis.clone(), &prefix, true).unwrap();

    assert!(!cached.is_banned(1).await.unwrap());
    assert!(cached.ban_user(1).await.unwrap());
    assert!(!cached.ban_user(1).await.unwrap());
    assert!(cached.is_banned(1).await.unwrap());
    assert!(!cached.is_banned(2).await.unwrap());

    assert!(writer.ban_user(7).await.unwrap());
    drop(writer);
    let reader = BannedUsersStore::new(redis.redis.clone(), &prefix, false).unwrap();
    assert!(reader.is_banned(7).await.unwrap());
    redis.emulate_wait(DAY.as_secs_f64() * 1000.0).await;
    assert!(reader.is_banned(7).await.unwrap());
}

/// **Test: User groups track members by id or username.**
///
/// **Setup:** An id-based "admins" group and a username-based "testers" group.
/// **Action:** Add, check and remove members; gate a non-member with a reply.
/// **Expected:** Membership follows the changes; users without a username can't join the
/// username group; the gate replies to non-members.
#[tokio::test]
async fn test_user_groups() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    let prefix = random_prefix();
    let admins = UserGroupStore::by_user_id(redis.redis.clone(), &prefix, "admins").unwrap();
    let testers = UserGroupStore::new(redis.redis.clone(), &prefix, "testers", Arc::new(UsernameIdentity)).unwrap();
    let alice = User::new(1, "Alice").with_username("alice");
    let bob = User::new(2, "Bob");

    assert!(admins.add(&alice).await.unwrap());
    assert!(!admins.add(&alice).await.unwrap());
    assert!(admins.is_member(&alice).await.unwrap());
    assert!(!admins.is_member(&bob).await.unwrap());
    assert!(admins.is_member_by_identity("1").await.unwrap());

    assert!(testers.add(&alice).await.unwrap());
    assert!(!testers.add(&bob).await.unwrap());
    assert!(testers.is_member_by_identity("alice").await.unwrap());
    assert_eq!(testers.member_identities().await.unwrap().len(), 1);

    assert!(!admins
        .check_membership(bot.as_ref(), &bob, Some("Admins only"))
        .await
        .unwrap());
    assert_eq!(bot.sent_texts().await, vec![(2, "Admins only".to_string())]);
    assert!(admins.check_membership(bot.as_ref(), &alice, Some("Admins only")).await.unwrap());

    assert!(admins.remove(&alice).await.unwrap());
    assert!(!admins.remove(&alice).await.unwrap());
    assert!(!admins.is_member(&alice).await.unwrap());
}

fn forum_topic_store(redis: &TestRedis, prefix: &str, retry: Option<std::time::Duration>) -> Arc<ForumTopicStore> {
    Arc::new(
        ForumTopicStore::new(
            redis.redis.clone(),
            prefix,
            ADMIN_CHAT_ID,
            vec![
                ForumTopicSpec::new("General"),
                ForumTopicSpec::new("Bugs").with_icon_color(ForumTopicIconColor::Red),
            ],
            ForumTopicStoreErrorMessages::default(),
            retry,
        )
        .unwrap(),
    )
}

/// **Test: Forum topics are created once and synced afterwards.**
///
/// **Setup:** The admin chat is a forum.
/// **Action:** Initialize the store; rebuild it over the same Redis and initialize again.
/// **Expected:** The first run creates both topics (default then explicit icon colors) and
/// serves their thread ids; the second run only edits the existing topics.
#[tokio::test(start_paused = true)]
async fn test_forum_topics_created_and_synced() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    bot.set_chat(Chat::supergroup(ADMIN_CHAT_ID, true)).await;
    let prefix = random_prefix();

    let store = forum_topic_store(&redis, &prefix, None);
    assert_eq!(store.get_message_thread_id("General").await.unwrap(), None);
    store.setup(bot.clone());
    store.background_job().await.unwrap();
    assert!(store.is_initialized());

    let created: Vec<(String, Option<u32>)> = bot
        .calls()
        .await
        .into_iter()
        .filter_map(|c| match c {
            BotCall::CreateForumTopic { name, icon_color, .. } => Some((name, icon_color)),
            _ => None,
        })
        .collect();
    assert_eq!(
        created,
        vec![
            ("General".to_string(), Some(ForumTopicIconColor::Blue.rgb())),
            ("Bugs".to_string(), Some(ForumTopicIconColor::Red.rgb())),
        ]
    );
    let general = store.get_message_thread_id("General").await.unwrap();
    let bugs = store.get_message_thread_id("Bugs").await.unwrap();
    assert!(general.is_some() && bugs.is_some() && general != bugs);
    assert!(matches!(
        store.get_message_thread_id("Other").await,
        Err(ComponentError::Other(_))
    ));

    drop(store);
    bot.clear().await;
    let store = forum_topic_store(&redis, &prefix, None);
    store.setup(bot.clone());
    store.background_job().await.unwrap();
    let calls = bot.calls().await;
    assert!(!calls.iter().any(|c| matches!(c, BotCall::CreateForumTopic { .. })));
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, BotCall::EditForumTopic { .. }))
            .count(),
        2
    );
    assert_eq!(store.get_message_thread_id("General").await.unwrap(), general);
}

/// **Test: Initialization gives up when the admin chat is not a forum.**
///
/// **Setup:** The admin chat is a regular supergroup; no retry interval.
/// **Action:** Run the background job.
/// **Expected:** No topics are created and the store stays uninitialized.
#[tokio::test]
async fn test_forum_topics_require_forum() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    bot.set_chat(Chat::supergroup(ADMIN_CHAT_ID, false)).await;
    let store = forum_topic_store(&redis, &random_prefix(), None);
    store.setup(bot.clone());

    store.background_job().await.unwrap();
    assert!(!store.is_initialized());
    assert!(!bot
        .calls()
        .await
        .iter()
        .any(|c| matches!(c, BotCall::CreateForumTopic { .. })));
}

/// **Test: Categories map to forum topics.**
///
/// **Setup:** Messages without a category go to "General", category 2 to "Bugs".
/// **Action:** Initialize and look up thread ids.
/// **Expected:** Mapped categories resolve to their topics, unmapped ones to `None`; mapping to
/// a topic outside the store is a configuration error.
#[tokio::test(start_paused = true)]
async fn test_category_forum_topics() {
    let redis = TestRedis::emulated();
    let bot = RecordingBot::new();
    bot.set_chat(Chat::supergroup(ADMIN_CHAT_ID, true)).await;
    let topics = forum_topic_store(&redis, &random_prefix(), None);
    let category_topics = CategoryForumTopicStore::new(
        topics.clone(),
        [
            (None, ForumTopicSpec::new("General")),
            (Some(2), ForumTopicSpec::new("Bugs").with_icon_color(ForumTopicIconColor::Red)),
        ],
    )
    .unwrap();
    category_topics.setup(bot.clone());
    category_topics.background_job().await.unwrap();

    let bugs = Category::new(2, "Bugs", "Bugs");
    let questions = Category::new(1, "Questions", "Questions");
    assert_eq!(
        category_topics.get_message_thread_id(None).await.unwrap(),
        topics.get_message_thread_id("General").await.unwrap()
    );
    assert_eq!(
        category_topics.get_message_thread_id(Some(&bugs)).await.unwrap(),
        topics.get_message_thread_id("Bugs").await.unwrap()
    );
    assert_eq!(category_topics.get_message_thread_id(Some(&questions)).await.unwrap(), None);

    assert!(matches!(
        CategoryForumTopicStore::new(topics, [(None, ForumTopicSpec::new("Elsewhere"))]),
        Err(ComponentError::Config(_))
    ));
}
