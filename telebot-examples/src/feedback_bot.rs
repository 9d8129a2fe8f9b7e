//! Feedback bot: users pick a category and language, write to the bot, admins answer from the
//! admin chat. Config from env (BOT_TOKEN, ADMIN_CHAT_ID, REDIS_URL) and optional CLI args.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use telebot_components::feedback::{
    AntiSpam, AntiSpamConfig, AuxFeedbackIntegration, FeedbackComponents, FeedbackConfig, FeedbackHandler,
    FeedbackIntegration, ServiceMessages, UserAnonymization,
};
use telebot_components::stores::{
    BannedUsersStore, Category, CategoryStore, LanguageSelectionMenuConfig, LanguageStore, LanguageStoreInterface,
};
use telebot_components::utils::restart_on_errors;
use telebot_components::{Language, MultilangText};
use telebot_core::{init_tracing, BotApi, Handler, HandlerChain, HandlerResponse, SendOptions, Update};
use telebot_telegram::{run_dispatcher, TelegramBotAdapter, TelegramConfig};
use tracing::info;

const BOT_PREFIX: &str = "feedback-bot";

#[derive(Parser)]
#[command(name = "feedback-bot")]
#[command(about = "Relays user messages to an admin chat and admin replies back", long_about = None)]
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
        #[arg(long, env = "ADMIN_CHAT_ID", allow_hyphen_values = true)]
        admin_chat_id: i64,
        /// Second admin chat that mirrors the first one.
        #[arg(long, env = "AUX_ADMIN_CHAT_ID", allow_hyphen_values = true)]
        aux_admin_chat_id: Option<i64>,
    },
}

fn ml(en: &str, ru: &str) -> MultilangText {
    MultilangText::new().with(Language::En, en).with(Language::Ru, ru)
}

/// Greets users on /start with the category keyboard and opens the language selector on /language.
struct StartHandler {
    bot: Arc<dyn BotApi>,
    language_store: Arc<LanguageStore>,
    category_store: Arc<CategoryStore>,
}

#[async_trait]
impl Handler for StartHandler {
    async fn handle(&self, update: &Update) -> telebot_core::Result<HandlerResponse> {
        let Some(message) = update.as_message() else {
            return Ok(HandlerResponse::Ignore);
        };
        let Some(user) = &message.from else {
            return Ok(HandlerResponse::Ignore);
        };
        match message.command() {
            Some("start") => {
                let language = self.language_store.get_user_language(user).await?;
                let greeting = ml(
                    "Hi! Pick a topic and write your message.",
                    "Привет! Выберите тему и напишите сообщение.",
                )
                .get(&language)
                .unwrap_or_default()
                .to_string();
                let markup = self.category_store.markup(user).await?;
                self.bot
                    .send_message(message.chat.id, &greeting, SendOptions::new().reply_markup(markup))
                    .await?;
                Ok(HandlerResponse::Stop)
            }
            Some("language") => {
                self.language_store.send_inline_selector(self.bot.as_ref(), user).await?;
                Ok(HandlerResponse::Stop)
            }
            _ => Ok(HandlerResponse::Continue),
        }
    }
}

async fn run(token: Option<String>, admin_chat_id: i64, aux_admin_chat_id: Option<i64>) -> Result<()> {
    let config = match token {
        Some(token) => TelegramConfig {
            bot_token: token,
            ..TelegramConfig::from_env().unwrap_or_else(|_| TelegramConfig::with_token(""))
        },
        None => TelegramConfig::from_env()?,
    };
    init_tracing(config.log_file_path())?;

    let redis = telebot_stores::connect(config.redis_url.as_deref()).await?;
    let teloxide_bot = config.build_bot()?;
    let bot: Arc<dyn BotApi> = Arc::new(TelegramBotAdapter::new(teloxide_bot.clone()));

    let language_store = Arc::new(LanguageStore::new(
        redis.clone(),
        BOT_PREFIX,
        [Language::En, Language::Ru],
        Language::En,
        LanguageSelectionMenuConfig {
            prompt: Some(ml("Choose your language", "Выберите язык").into()),
            ..LanguageSelectionMenuConfig::default()
        },
    )?);
    let language: Arc<dyn LanguageStoreInterface> = language_store.clone();
    let category_store = Arc::new(CategoryStore::new(
        BOT_PREFIX,
        redis.clone(),
        vec![
            Category::new(1, "question", ml("❓ Question", "❓ Вопрос")).with_hashtag("question"),
            Category::new(2, "bug", ml("🐞 Bug report", "🐞 Ошибка")).with_hashtag("bug"),
        ],
        CategoryStore::DEFAULT_CATEGORY_TTL,
        Some(language.clone()),
    )?);

    let aux = match aux_admin_chat_id {
        Some(aux_admin_chat_id) => {
            let handler = FeedbackHandler::new(
                bot.clone(),
                redis.clone(),
                BOT_PREFIX,
                aux_admin_chat_id,
                FeedbackConfig {
                    name: "aux".to_string(),
                    user_anonymization: UserAnonymization::Full,
                    ..FeedbackConfig::default()
                },
                ServiceMessages {
                    copied_to_user_ok: Some("Sent".to_string()),
                    ..ServiceMessages::default()
                },
                FeedbackComponents::default(),
            )?;
            Some(Arc::new(AuxFeedbackIntegration::new(handler, redis.clone(), BOT_PREFIX)?))
        }
        None => None,
    };
    let integrations: Vec<Arc<dyn FeedbackIntegration>> = aux
        .iter()
        .map(|aux| aux.clone() as Arc<dyn FeedbackIntegration>)
        .collect();

    let feedback = FeedbackHandler::new(
        bot.clone(),
        redis.clone(),
        BOT_PREFIX,
        admin_chat_id,
        FeedbackConfig {
            force_category_selection: true,
            hashtags_in_admin_chat: true,
            unanswered_hashtag: Some("new".to_string()),
            hashtag_message_rarer_than: Some(Duration::from_secs(15 * 60)),
            confirm_forwarded_to_admin_rarer_than: Some(Duration::from_secs(60 * 60)),
            ..FeedbackConfig::default()
        },
        ServiceMessages {
            forwarded_to_admin_ok: Some(ml("Sent to the team!", "Отправлено команде!").into()),
            you_must_select_category: Some(ml("Please pick a topic first", "Сначала выберите тему").into()),
            throttling_template: Some(ml("Slow down: {} per {}", "Не так быстро: {} за {}").into()),
            something_went_wrong: Some(ml("Something went wrong", "Что-то пошло не так").into()),
            copied_to_user_ok: Some("Sent".to_string()),
            can_not_delete_message: Some("Can not delete".to_string()),
            deleted_message_ok: Some("Deleted".to_string()),
        },
        FeedbackComponents {
            anti_spam: Some(Arc::new(AntiSpam::new(
                redis.clone(),
                BOT_PREFIX,
                AntiSpamConfig {
                    throttle_after_messages: 10,
                    throttle_duration: Duration::from_secs(60),
                    soft_ban_after_throttle_violations: 5,
                    soft_ban_duration: Duration::from_secs(24 * 3600),
                },
            )?)),
            banned_users: Some(Arc::new(BannedUsersStore::new(redis.clone(), BOT_PREFIX, true)?)),
            language: Some(language),
            category: Some(category_store.clone()),
            integrations,
            ..FeedbackComponents::default()
        },
    )?
    .into_shared();

    let mut chain = HandlerChain::new()
        .add_handler(Arc::new(StartHandler {
            bot: bot.clone(),
            language_store: language_store.clone(),
            category_store: category_store.clone(),
        }))
        .add_handler(Arc::new(language_store.clone().setup(bot.clone(), None)))
        .add_handler(Arc::new(category_store.clone().setup(bot.clone(), None)))
        .add_handler(feedback.clone());
    if let Some(aux) = &aux {
        chain = chain.add_handler(aux.handler());
    }

    let background = feedback.clone();
    tokio::spawn(async move {
        restart_on_errors("feedback background job", || background.background_job()).await;
    });

    info!(admin_chat_id, "Starting feedback bot");
    run_dispatcher(teloxide_bot, chain).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            token,
            admin_chat_id,
            aux_admin_chat_id,
        } => run(token, admin_chat_id, aux_admin_chat_id).await,
    }
}
