//! Integration tests for inline menus: navigation, termination and corrupted callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use telebot_components::menu::{Menu, MenuConfig, MenuHandler, MenuItem, TerminatorContext, TerminatorHook};
use telebot_components::ComponentResult;
use telebot_core::keyboard::ReplyMarkup;
use telebot_core::testing::{BotCall, RecordingBot};
use telebot_core::{CallbackQuery, Chat, Handler, HandlerResponse, Message, Update, User};
use tokio::sync::Mutex;

const USER_ID: i64 = 42;

#[derive(Default)]
struct RecordingHook {
    terminators: Mutex<Vec<(String, Option<i32>)>>,
}

#[async_trait]
impl TerminatorHook for RecordingHook {
    async fn on_terminator(&self, context: TerminatorContext) -> ComponentResult<()> {
        self.terminators
            .lock()
            .await
            .push((context.terminator, context.menu_message_id));
        Ok(())
    }
}

fn menu_tree() -> Menu {
    Menu::new(
        "Main menu",
        vec![
            MenuItem::submenu(
                "Help",
                Menu::new("Help topics", vec![MenuItem::terminator("Contact admin", "contact")]),
            ),
            MenuItem::terminator("Done", "done"),
        ],
    )
}

fn button_press(data: &str) -> Update {
    let user = User::new(USER_ID, "Alice");
    let menu_message = Message::text(77, Chat::private(USER_ID), None, "Main menu");
    Update::CallbackQuery(CallbackQuery {
        id: "q1".to_string(),
        from: user,
        data: Some(data.to_string()),
        message: Some(menu_message),
    })
}

fn last_edit(calls: &[BotCall]) -> (String, Vec<Vec<String>>) {
    calls
        .iter()
        .rev()
        .find_map(|c| match c {
            BotCall::EditMessageText { text, options, .. } => Some((
                text.clone(),
                options.reply_markup.as_ref().map(|m| m.texts()).unwrap_or_default(),
            )),
            _ => None,
        })
        .expect("no edit recorded")
}

/// **Test: Submenus open in place and terminators reach the hook.**
///
/// **Setup:** Main menu with a "Help" submenu (one terminator) and a "Done" terminator.
/// **Action:** Start the menu, open "Help", press "Contact admin".
/// **Expected:** The root keyboard is sent; "Help" edits the message to the submenu with a back
/// button; the terminator locks the keyboard with a check mark and calls the hook.
#[tokio::test]
async fn test_menu_navigation_and_termination() {
    let bot = RecordingBot::new();
    let hook = Arc::new(RecordingHook::default());
    let handler = MenuHandler::new(bot.clone(), &menu_tree(), MenuConfig::default(), Some(hook.clone())).unwrap();
    assert_eq!(handler.menu_count(), 2);

    handler.start_menu(&User::new(USER_ID, "Alice")).await.unwrap();
    match &bot.calls().await[0] {
        BotCall::SendMessage {
            chat_id, text, options, ..
        } => {
            assert_eq!(*chat_id, USER_ID);
            assert_eq!(text, "Main menu");
            let Some(ReplyMarkup::Inline(markup)) = &options.reply_markup else {
                panic!("inline keyboard expected");
            };
            assert_eq!(markup.texts(), vec![vec!["Help".to_string()], vec!["Done".to_string()]]);
        }
        other => panic!("unexpected call {:?}", other),
    }

    let response = handler.handle(&button_press("menu:1")).await.unwrap();
    assert_eq!(response, HandlerResponse::Stop);
    let (text, buttons) = last_edit(&bot.calls().await);
    assert_eq!(text, "Help topics");
    assert_eq!(buttons, vec![vec!["Contact admin".to_string()], vec!["back".to_string()]]);

    handler.handle(&button_press("menu:0")).await.unwrap();
    let (text, _) = last_edit(&bot.calls().await);
    assert_eq!(text, "Main menu");

    bot.clear().await;
    handler.handle(&button_press("terminator:2")).await.unwrap();
    let calls = bot.calls().await;
    assert!(matches!(&calls[0], BotCall::AnswerCallbackQuery { text: None, .. }));
    let (text, buttons) = last_edit(&calls);
    assert_eq!(text, "Help topics");
    assert_eq!(buttons, vec![vec!["✅ Contact admin".to_string()]]);
    assert_eq!(
        *hook.terminators.lock().await,
        vec![("contact".to_string(), Some(77))]
    );

    bot.clear().await;
    handler.handle(&button_press("inactive_button")).await.unwrap();
    assert_eq!(bot.calls().await.len(), 1);
    assert!(hook.terminators.lock().await.len() == 1);
}

/// **Test: Without locking, terminators leave the keyboard alone.**
///
/// **Setup:** `lock_after_termination = false`, no back buttons.
/// **Action:** Press "Done".
/// **Expected:** The query is answered, no edit happens, the hook sees `done`.
#[tokio::test]
async fn test_terminator_without_lock() {
    let bot = RecordingBot::new();
    let hook = Arc::new(RecordingHook::default());
    let config = MenuConfig {
        back_label: None,
        lock_after_termination: false,
    };
    let handler = MenuHandler::new(bot.clone(), &menu_tree(), config, Some(hook.clone())).unwrap();

    handler.handle(&button_press("terminator:1")).await.unwrap();
    let calls = bot.calls().await;
    assert_eq!(calls.len(), 1);
    assert!(matches!(&calls[0], BotCall::AnswerCallbackQuery { .. }));
    assert_eq!(hook.terminators.lock().await[0].0, "done");
}

/// **Test: Corrupted callback data produces an alert instead of an error.**
///
/// **Setup:** The two-level menu.
/// **Action:** Press buttons with out-of-range and non-numeric ids; press a foreign button.
/// **Expected:** Alerts with a server error text; the foreign button is ignored.
#[tokio::test]
async fn test_corrupted_callback_data() {
    let bot = RecordingBot::new();
    let handler = MenuHandler::new(bot.clone(), &menu_tree(), MenuConfig::default(), None).unwrap();

    for data in ["menu:99", "terminator:abc", "terminator:0"] {
        bot.clear().await;
        handler.handle(&button_press(data)).await.unwrap();
        match &bot.calls().await[..] {
            [BotCall::AnswerCallbackQuery {
                text: Some(text),
                show_alert: true,
                ..
            }] => assert!(text.starts_with("Server error"), "{}", text),
            other => panic!("unexpected calls for {}: {:?}", data, other),
        }
    }

    bot.clear().await;
    let response = handler.handle(&button_press("category:1")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);
    assert!(bot.calls().await.is_empty());
}
