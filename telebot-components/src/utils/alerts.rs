//! Error alerts for the bot operator.
//!
//! [`TelegramAlertsLayer`] is a `tracing_subscriber` layer that forwards every `ERROR` event to
//! a Telegram channel, the way a crash reporter would. Install it next to the fmt layer from
//! [`telebot_core::init_tracing`] or on its own registry.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use telebot_core::{BotApi, SendOptions};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::utils::html_escape;

const FAILED_TO_SEND: &str = "⚠️ Failed to send alert, see application logs";

/// Sends `ERROR` events to `channel_id`, one message per event, as `<pre>target: message</pre>`
/// with the event's fields and source location. Events are queued and sent from a background task,
/// so the layer never blocks the code that logs.
pub struct TelegramAlertsLayer {
    sender: mpsc::UnboundedSender<String>,
}

impl TelegramAlertsLayer {
    /// Spawns the sending task, so this must run inside a tokio runtime. `app_name` heads every
    /// alert when several bots share the channel.
    pub fn new(bot: Arc<dyn BotApi>, channel_id: i64, app_name: Option<&str>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<String>();
        let prefix = app_name.map(|name| format!("{}\n", name)).unwrap_or_default();
        tokio::spawn(async move {
            while let Some(alert) = receiver.recv().await {
                send_alert(bot.as_ref(), channel_id, &prefix, &alert).await;
            }
        });
        Self { sender }
    }
}

async fn send_alert(bot: &dyn BotApi, channel_id: i64, prefix: &str, alert: &str) {
    let text = format!("{}\n<pre>{}</pre>", prefix, html_escape(alert));
    let Err(e) = bot.send_message(channel_id, &text, SendOptions::html()).await else {
        return;
    };
    // logged from this module, so the layer won't pick it up again
    warn!(error = %e, "Error sending alert to Telegram channel");
    let fallback = format!("{}{}", prefix, FAILED_TO_SEND);
    if let Err(e) = bot.send_message(channel_id, &fallback, SendOptions::new()).await {
        warn!(error = %e, "Error sending alert fallback to Telegram channel");
    }
}

#[derive(Default)]
struct AlertVisitor {
    message: String,
    fields: String,
}

impl Visit for AlertVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, "\n{} = {}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, "\n{} = {:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramAlertsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR || metadata.target() == module_path!() {
            return;
        }
        let mut visitor = AlertVisitor::default();
        event.record(&mut visitor);
        let mut alert = format!("{}: {}{}", metadata.target(), visitor.message, visitor.fields);
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            let _ = write!(alert, "\n{}:{}", file, line);
        }
        // the receiver only goes away with the runtime
        let _ = self.sender.send(alert);
    }
}
