use telebot_core::{BotApi, CallbackQuery};
use tracing::error;

/// Logs `details` and shows them to the user as an alert on the pressed button.
pub async fn callback_query_processing_error(bot: &dyn BotApi, call: &CallbackQuery, details: &str) {
    error!(user_id = call.from.id, data = ?call.data, "{}", details);
    let text = format!("Server error: {} :(", details);
    if let Err(e) = bot.answer_callback_query(&call.id, Some(&text), true).await {
        error!(error = %e, "Failed to answer callback query");
    }
}
