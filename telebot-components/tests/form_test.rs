//! Integration tests for forms: question flow, skipping and cancelling, select and date fields.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use telebot_components::form::{
    FieldValue, Form, FormExitContext, FormExitHook, FormField, FormHandler, FormHandlerConfig, FormResult,
    SelectOption,
};
use telebot_components::language::{Language, MultilangText};
use telebot_components::{ComponentError, ComponentResult};
use telebot_core::testing::{BotCall, RecordingBot};
use telebot_core::{
    CallbackQuery, Chat, Handler, HandlerResponse, KeyboardButton, Message, ReplyKeyboardMarkup, ReplyMarkup, Update,
    User,
};
use telebot_stores::testing::{random_prefix, TestRedis};
use tokio::sync::Mutex;

const USER_ID: i64 = 1;

#[derive(Default)]
struct RecordingExitHook {
    results: Mutex<Vec<(FormResult, bool)>>,
}

#[async_trait]
impl FormExitHook for RecordingExitHook {
    async fn on_exit(&self, context: FormExitContext) -> ComponentResult<()> {
        assert_eq!(context.user.id, USER_ID);
        self.results
            .lock()
            .await
            .push((context.result, context.last_message.is_some()));
        Ok(())
    }
}

fn user() -> User {
    User::new(USER_ID, "Alice")
}

fn user_message(text: &str) -> Update {
    Update::Message(Message::text(1, Chat::private(USER_ID), Some(user()), text))
}

fn button_press(data: &str) -> Update {
    Update::CallbackQuery(CallbackQuery {
        id: "q1".to_string(),
        from: user(),
        data: Some(data.to_string()),
        message: Some(Message::text(1000, Chat::private(USER_ID), None, "question")),
    })
}

fn config() -> FormHandlerConfig {
    FormHandlerConfig {
        echo_filled_field: false,
        retry_field_msg: "retry".into(),
        unsupported_cmd_error_template: "unsupported ({})".into(),
        cancelling_because_of_error_template: "error: {}".into(),
        form_starting_template: "form start ({} - cancel)".into(),
        can_skip_field_template: "({} to skip)".into(),
        cant_skip_field_msg: "cant skip this".into(),
        ..Default::default()
    }
}

fn form_handler(
    bot: &Arc<RecordingBot>,
    redis: &TestRedis,
    name: &str,
    form: Form,
    config: FormHandlerConfig,
    hook: &Arc<RecordingExitHook>,
) -> FormHandler {
    FormHandler::new(
        bot.clone(),
        redis.redis.clone(),
        &random_prefix(),
        name,
        form,
        config,
        None,
        hook.clone(),
    )
    .unwrap()
}

fn sent_markup(calls: &[BotCall]) -> Option<ReplyMarkup> {
    calls.iter().rev().find_map(|c| match c {
        BotCall::SendMessage { options, .. } => options.reply_markup.clone(),
        _ => None,
    })
}

fn inline_texts(markup: Option<ReplyMarkup>) -> Vec<Vec<String>> {
    match markup {
        Some(ReplyMarkup::Inline(markup)) => markup.texts(),
        other => panic!("expected inline keyboard, got {:?}", other),
    }
}

/// **Test: Plain text form from start to completion.**
///
/// **Setup:** Three text fields, the last one optional.
/// **Action:** Start the form, answer, try a wrong command and skipping a required field, then
/// answer and skip the optional field.
/// **Expected:** Each answer is followed by the next question, the optional one with a skip hint.
/// Wrong commands and skips are explained. Skipping the last field completes the form silently
/// and the result renders as HTML.
#[tokio::test]
async fn test_form_handler() {
    let bot = RecordingBot::new();
    let redis = TestRedis::emulated();
    let hook = Arc::new(RecordingExitHook::default());
    let field = |name: &str| FormField::plain_text(name, format!("Question: {}", name), "empty").described(name, false);
    let form = Form::new(vec![
        field("your name"),
        field("your favourite food"),
        field("your pet's name").optional(),
    ])
    .unwrap();
    let handler = form_handler(&bot, &redis, "test-form", form, config(), &hook);

    let response = handler.handle(&user_message("hello")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);

    handler.start(&user(), None).await.unwrap();
    assert!(handler.is_filling(&user()).await.unwrap());
    assert_eq!(
        bot.sent_texts().await,
        vec![(USER_ID, "form start (/cancel - cancel)\n\nQuestion: your name".to_string())]
    );

    let steps = [
        ("test user", "Question: your favourite food"),
        ("/foo", "unsupported (/skip, /cancel)"),
        ("/skip", "cant skip this\n\nretry"),
        ("pizza (<b>)", "Question: your pet's name (/skip to skip)"),
    ];
    for (answer, question) in steps {
        bot.clear().await;
        let response = handler.handle(&user_message(answer)).await.unwrap();
        assert_eq!(response, HandlerResponse::Stop);
        assert_eq!(bot.sent_texts().await, vec![(USER_ID, question.to_string())]);
    }
    assert_eq!(sent_markup(&bot.calls().await), Some(ReplyMarkup::Remove));

    bot.clear().await;
    handler.handle(&user_message("/skip")).await.unwrap();
    assert!(bot.calls().await.is_empty());
    assert!(!handler.is_filling(&user()).await.unwrap());

    let results = hook.results.lock().await;
    assert_eq!(results.len(), 1);
    let (result, by_message) = &results[0];
    assert!(by_message);
    let expected: FormResult = [
        ("your name", Some(FieldValue::Text("test user".into()))),
        ("your favourite food", Some(FieldValue::Text("pizza (<b>)".into()))),
        ("your pet's name", None),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    assert_eq!(result, &expected);
    assert_eq!(
        handler.form().result_to_html(result, None).unwrap(),
        "<b>your name</b>: test user\n<b>your favourite food</b>: pizza (&lt;b&gt;)"
    );
}

/// **Test: Single select field with a reply keyboard.**
///
/// **Setup:** A name field followed by a number picked from three options.
/// **Action:** Answer the name, send a label that isn't an option, then a valid one.
/// **Expected:** The number question comes with a one-time reply keyboard of two buttons per
/// row; the wrong answer is refused; the valid one completes the form with the option id.
#[tokio::test]
async fn test_single_select_form() {
    let bot = RecordingBot::new();
    let redis = TestRedis::emulated();
    let hook = Arc::new(RecordingExitHook::default());
    let form = Form::new(vec![
        FormField::plain_text("name", "Your name.", "empty").described("Name", false),
        FormField::single_select(
            "number",
            "Select a number.",
            vec![
                SelectOption::new("one", "1"),
                SelectOption::new("three", "3"),
                SelectOption::new("big", "1564"),
            ],
            "nope",
        )
        .described("Number", false),
    ])
    .unwrap();
    let handler = form_handler(&bot, &redis, "numbers", form, config(), &hook);

    handler.start(&user(), None).await.unwrap();
    bot.clear().await;
    handler.handle(&user_message("Alice")).await.unwrap();
    assert_eq!(bot.sent_texts().await, vec![(USER_ID, "Select a number.".to_string())]);
    assert_eq!(
        sent_markup(&bot.calls().await),
        Some(ReplyMarkup::Keyboard(ReplyKeyboardMarkup {
            keyboard: vec![
                vec![KeyboardButton::new("1"), KeyboardButton::new("3")],
                vec![KeyboardButton::new("1564")],
            ],
            resize_keyboard: true,
            one_time_keyboard: true,
        }))
    );

    bot.clear().await;
    handler.handle(&user_message("bad answer")).await.unwrap();
    assert_eq!(bot.sent_texts().await, vec![(USER_ID, "nope\n\nretry".to_string())]);
    assert!(matches!(sent_markup(&bot.calls().await), Some(ReplyMarkup::Keyboard(_))));

    bot.clear().await;
    handler.handle(&user_message("1564")).await.unwrap();
    assert!(bot.calls().await.is_empty());
    let results = hook.results.lock().await;
    assert_eq!(results[0].0["number"], Some(FieldValue::Selected("big".to_string())));
    assert_eq!(
        handler.form().result_to_html(&results[0].0, None).unwrap(),
        "<b>Name</b>: Alice\n<b>Number</b>: 1564"
    );
}

/// **Test: Multiple select toggles and a date picked from the calendar.**
///
/// **Setup:** Toppings chosen with inline toggles, then a delivery date.
/// **Action:** Finish without a selection, type an answer, toggle two options, finish, then
/// press a calendar day.
/// **Expected:** An empty selection is refused with an alert and typed answers point to the
/// buttons. Toggles re-render the keyboard with checkmarks. Finishing removes the keyboard
/// and shows the calendar. The day press completes the form.
#[tokio::test]
async fn test_multiple_select_and_date_fields() {
    let bot = RecordingBot::new();
    let redis = TestRedis::emulated();
    let hook = Arc::new(RecordingExitHook::default());
    let form = Form::new(vec![
        FormField::multiple_select(
            "toppings",
            "Toppings?",
            vec![
                SelectOption::new("c", "Cheese"),
                SelectOption::new("h", "Ham"),
                SelectOption::new("o", "Olives"),
            ],
            "Done",
            "Use the buttons",
            "Pick something",
        ),
        FormField::date("delivery", "When?", "bad date"),
    ])
    .unwrap();
    let handler = form_handler(&bot, &redis, "pizza", form, config(), &hook);

    handler.start(&user(), None).await.unwrap();
    assert_eq!(
        inline_texts(sent_markup(&bot.calls().await)),
        vec![vec!["Cheese"], vec!["Ham"], vec!["Olives"], vec!["Done"]]
    );

    bot.clear().await;
    handler.handle(&button_press("form-pizza:finish:-")).await.unwrap();
    assert_eq!(
        bot.calls().await,
        vec![BotCall::AnswerCallbackQuery {
            callback_query_id: "q1".to_string(),
            text: Some("Pick something".to_string()),
            show_alert: true,
        }]
    );

    bot.clear().await;
    handler.handle(&user_message("ham")).await.unwrap();
    assert_eq!(bot.sent_texts().await, vec![(USER_ID, "Use the buttons\n\nretry".to_string())]);

    bot.clear().await;
    handler.handle(&button_press("form-pizza:toggle:o")).await.unwrap();
    handler.handle(&button_press("form-pizza:toggle:c")).await.unwrap();
    let last_markup = bot.calls().await.into_iter().rev().find_map(|c| match c {
        BotCall::EditMessageReplyMarkup { message_id, markup, .. } => {
            assert_eq!(message_id, 1000);
            markup
        }
        _ => None,
    });
    assert_eq!(
        last_markup.unwrap().texts(),
        vec![vec!["✅ Cheese"], vec!["Ham"], vec!["✅ Olives"], vec!["Done"]]
    );

    bot.clear().await;
    handler.handle(&button_press("form-pizza:finish:-")).await.unwrap();
    let calls = bot.calls().await;
    assert!(calls.contains(&BotCall::EditMessageReplyMarkup {
        chat_id: USER_ID,
        message_id: 1000,
        markup: None,
    }));
    assert_eq!(bot.sent_texts().await, vec![(USER_ID, "When?".to_string())]);
    let calendar = match sent_markup(&calls) {
        Some(ReplyMarkup::Inline(markup)) => markup,
        other => panic!("expected calendar, got {:?}", other),
    };
    let next_month = calendar.inline_keyboard.last().unwrap()[1].callback_data.clone().unwrap();
    assert!(next_month.starts_with("form-pizza:calendar:update_"));

    bot.clear().await;
    handler.handle(&button_press(&next_month)).await.unwrap();
    assert!(matches!(
        bot.calls().await.last(),
        Some(BotCall::EditMessageReplyMarkup { markup: Some(_), .. })
    ));

    handler
        .handle(&button_press("form-pizza:calendar:select_y2099_m1_d2"))
        .await
        .unwrap();
    let results = hook.results.lock().await;
    assert_eq!(results.len(), 1);
    let (result, by_message) = &results[0];
    assert!(!by_message);
    assert_eq!(
        result["toppings"],
        Some(FieldValue::SelectedMany(vec!["c".to_string(), "o".to_string()]))
    );
    assert_eq!(
        result["delivery"],
        Some(FieldValue::Date(NaiveDate::from_ymd_opt(2099, 1, 2).unwrap()))
    );
    drop(results);

    // buttons of the finished form
    bot.clear().await;
    let response = handler.handle(&button_press("form-pizza:toggle:c")).await.unwrap();
    assert_eq!(response, HandlerResponse::Stop);
    assert!(matches!(
        bot.calls().await.as_slice(),
        [BotCall::AnswerCallbackQuery { text: None, .. }]
    ));
}

/// **Test: Cancelling a form.**
///
/// **Setup:** A date field and a cancel hook; the form starts with a prefilled value.
/// **Action:** Type an impossible date, then cancel.
/// **Expected:** The date is refused; cancelling sends nothing, runs the cancel hook with the
/// result so far and releases the user.
#[tokio::test]
async fn test_form_cancelled() {
    let bot = RecordingBot::new();
    let redis = TestRedis::emulated();
    let completed = Arc::new(RecordingExitHook::default());
    let cancelled = Arc::new(RecordingExitHook::default());
    let form = Form::new(vec![FormField::date("delivery", "When?", "bad date")]).unwrap();
    let handler = form_handler(&bot, &redis, "dates", form, config(), &completed).on_cancelled(cancelled.clone());

    let mut prefilled = FormResult::new();
    prefilled.insert("source".to_string(), Some(FieldValue::Text("ad".to_string())));
    handler.start(&user(), Some(prefilled.clone())).await.unwrap();

    bot.clear().await;
    handler.handle(&user_message("31.2.2099")).await.unwrap();
    assert_eq!(bot.sent_texts().await, vec![(USER_ID, "bad date\n\nretry".to_string())]);

    bot.clear().await;
    handler.handle(&user_message("/cancel")).await.unwrap();
    assert!(bot.calls().await.is_empty());
    assert_eq!(*cancelled.results.lock().await, vec![(prefilled, true)]);
    assert!(completed.results.lock().await.is_empty());

    let response = handler.handle(&user_message("2.1.2099")).await.unwrap();
    assert_eq!(response, HandlerResponse::Ignore);
}

/// **Test: Form handler configuration is validated.**
///
/// **Setup:** A one-field form.
/// **Action:** Build handlers with a name containing the payload separator and with a
/// localised text but no language store.
/// **Expected:** Both are configuration errors.
#[tokio::test]
async fn test_form_handler_validation() {
    let bot = RecordingBot::new();
    let redis = TestRedis::emulated();
    let hook = Arc::new(RecordingExitHook::default());
    let build = |name: &str, field: FormField| {
        FormHandler::new(
            bot.clone(),
            redis.redis.clone(),
            &random_prefix(),
            name,
            Form::new(vec![field]).unwrap(),
            config(),
            None,
            hook.clone(),
        )
    };
    assert!(matches!(
        build("a:b", FormField::plain_text("x", "?", "empty")),
        Err(ComponentError::Config(_))
    ));
    let localised = MultilangText::new().with(Language::En, "?").with(Language::Uk, "?");
    assert!(matches!(
        build("ok", FormField::plain_text("x", localised, "empty")),
        Err(ComponentError::Config(_))
    ));
}
