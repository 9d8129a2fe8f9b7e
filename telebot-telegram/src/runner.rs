//! Dispatcher runner: converts teloxide messages and callback queries to core updates and passes
//! them to the HandlerChain.

use telebot_core::{HandlerChain, ToCoreCallbackQuery, ToCoreMessage, Update};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use tracing::{error, info, instrument};

use crate::adapters::{TelegramCallbackQueryWrapper, TelegramMessageWrapper};

/// Runs the update through the chain in its own task so the dispatcher returns immediately.
fn spawn_chain(chain: HandlerChain, update: Update) {
    tokio::spawn(async move {
        let user_id = update.user_id();
        if let Err(e) = chain.handle(&update).await {
            error!(error = %e, user_id, "Handler chain failed");
        }
    });
}

async fn on_message(msg: teloxide::types::Message, chain: HandlerChain) -> ResponseResult<()> {
    let core_msg = TelegramMessageWrapper(&msg).to_core();
    info!(
        user_id = ?core_msg.user_id(),
        chat_id = core_msg.chat.id,
        content_type = %core_msg.content_type,
        "Received message"
    );
    spawn_chain(chain, Update::Message(core_msg));
    Ok(())
}

async fn on_callback_query(query: teloxide::types::CallbackQuery, chain: HandlerChain) -> ResponseResult<()> {
    let core_query = TelegramCallbackQueryWrapper(&query).to_core();
    info!(
        user_id = core_query.from.id,
        data = ?core_query.data,
        "Received callback query"
    );
    spawn_chain(chain, Update::CallbackQuery(core_query));
    Ok(())
}

/// Starts long polling with message and callback query branches. Calls get_me() first to log the
/// bot username; returns on Ctrl-C.
#[instrument(skip(bot, handler_chain))]
pub async fn run_dispatcher(bot: teloxide::Bot, handler_chain: HandlerChain) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(username = ?me.user.username, "Bot started"),
        Err(e) => error!(error = %e, "get_me failed, continuing"),
    }

    let handler = dptree::entry()
        .branch(teloxide::types::Update::filter_message().endpoint(on_message))
        .branch(teloxide::types::Update::filter_callback_query().endpoint(on_callback_query));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![handler_chain])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped");
    Ok(())
}
