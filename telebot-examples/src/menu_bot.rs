//! Menu bot: a two-level inline menu opened with /start; terminators answer with a text.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use telebot_components::menu::{Menu, MenuConfig, MenuHandler, MenuItem, TerminatorContext, TerminatorHook};
use telebot_components::ComponentResult;
use telebot_core::{init_tracing, BotApi, Handler, HandlerChain, HandlerResponse, SendOptions, Update};
use telebot_telegram::{run_dispatcher, TelegramBotAdapter, TelegramConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "menu-bot")]
#[command(about = "Inline menu demo", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (config from env; token can override BOT_TOKEN).
    Run {
        #[arg(short, long)]
        token: Option<String>,
    },
}

fn menu_tree() -> Menu {
    Menu::new(
        "What are you interested in?",
        vec![
            MenuItem::submenu(
                "Pizza",
                Menu::new(
                    "Pick a pizza",
                    vec![
                        MenuItem::terminator("Margherita", "margherita"),
                        MenuItem::terminator("Pepperoni", "pepperoni"),
                    ],
                ),
            ),
            MenuItem::submenu(
                "Drinks",
                Menu::new(
                    "Pick a drink",
                    vec![
                        MenuItem::terminator("Lemonade", "lemonade"),
                        MenuItem::terminator("Water", "water"),
                    ],
                ),
            ),
            MenuItem::terminator("Nothing, thanks", "nothing"),
        ],
    )
}

struct OrderHook;

#[async_trait]
impl TerminatorHook for OrderHook {
    async fn on_terminator(&self, context: TerminatorContext) -> ComponentResult<()> {
        info!(user_id = context.user.id, choice = %context.terminator, "Menu finished");
        let text = match context.terminator.as_str() {
            "nothing" => "Maybe next time!".to_string(),
            choice => format!("Good choice: {}", choice),
        };
        context.bot.send_message(context.user.id, &text, SendOptions::new()).await?;
        Ok(())
    }
}

/// Opens the menu on /start.
struct StartHandler {
    menu: Arc<MenuHandler>,
}

#[async_trait]
impl Handler for StartHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        match update.as_message() {
            Some(message) if message.is_command("start") => {
                if let Some(user) = &message.from {
                    self.menu.start_menu(user).await?;
                }
                Ok(HandlerResponse::Stop)
            }
            _ => Ok(HandlerResponse::Continue),
        }
    }
}

async fn run(token: Option<String>) -> Result<()> {
    let config = match token {
        Some(token) => TelegramConfig {
            bot_token: token,
            ..TelegramConfig::from_env().unwrap_or_else(|_| TelegramConfig::with_token(""))
        },
        None => TelegramConfig::from_env()?,
    };
    init_tracing(config.log_file_path())?;

    let teloxide_bot = config.build_bot()?;
    let bot: Arc<dyn BotApi> = Arc::new(TelegramBotAdapter::new(teloxide_bot.clone()));
    let menu = Arc::new(MenuHandler::new(
        bot,
        &menu_tree(),
        MenuConfig::default(),
        Some(Arc::new(OrderHook)),
    )?);

    let chain = HandlerChain::new()
        .add_handler(Arc::new(StartHandler { menu: menu.clone() }))
        .add_handler(menu);

    info!("Starting menu bot");
    run_dispatcher(teloxide_bot, chain).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { token } => run(token).await,
    }
}
