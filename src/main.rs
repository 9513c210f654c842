mod agent;
mod api;
mod config;
mod llm;
mod telegram;
mod telegram_log;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use teloxide::prelude::*;
use teloxide::types::User;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use agent::agents::register_builtin;
use agent::sweeper::{parse_schedule, spawn_sweeper};
use agent::{AgentCatalog, AgentService, ConversationId, SessionRegistry};
use config::Config;
use telegram::{TelegramClient, format_status, parse_agent_selection};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "say hello")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "pick an agent")]
    Agents,
    #[command(description = "show the current agent session")]
    Status,
    #[command(description = "end the current agent session")]
    Reset,
}

struct BotState {
    config: Config,
    service: Arc<AgentService>,
    telegram: TelegramClient,
    denied: Mutex<HashSet<UserId>>,
}

impl BotState {
    /// Check the allow-list. Denied users hear "Access denied." once.
    async fn admit(&self, user: Option<&User>, chat_id: ChatId) -> bool {
        let Some(user) = user else {
            return false;
        };
        if self.config.is_allowed(user.id) {
            return true;
        }

        let mut denied = self.denied.lock().await;
        if denied.insert(user.id) {
            let username = user.username.as_deref().unwrap_or(&user.first_name);
            info!("Message from non-allowed user {} ({}) - denial", username, user.id);
            self.telegram.send_text(chat_id, "Access denied.").await.ok();
        }
        false
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "botify.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "botify.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting botify...");
    info!("Loaded config from {config_path}");
    info!("LLM: {} via {}", config.llm_model, config.llm_base_url);
    if config.allowed_users.is_empty() {
        warn!("No allowed_users configured, the bot answers everyone");
    }

    let llm = Arc::new(llm::Client::new(
        config.llm_api_key.clone(),
        config.llm_base_url.clone(),
        config.llm_model.clone(),
    ));
    let mut catalog = AgentCatalog::new();
    register_builtin(&mut catalog, llm);
    let registry = Arc::new(SessionRegistry::new(Arc::new(catalog)));
    let service = Arc::new(AgentService::new(registry, config.agent_timeout));

    match parse_schedule(&config.sweep_schedule) {
        Ok(schedule) => {
            spawn_sweeper(service.clone(), schedule, config.session_max_age);
        }
        Err(e) => error!("Session sweeper disabled: {e}"),
    }

    if let Some(api_config) = config.http_api.clone() {
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(api_config, service).await {
                error!("HTTP API stopped: {e}");
            }
        });
    }

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {e}");
    }

    let state = Arc::new(BotState {
        config,
        service,
        telegram: TelegramClient::new(bot.clone()),
        denied: Mutex::new(HashSet::new()),
    });

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_command(msg: Message, cmd: Command, state: Arc<BotState>) -> ResponseResult<()> {
    if !state.admit(msg.from.as_ref(), msg.chat.id).await {
        return Ok(());
    }

    let chat_id = msg.chat.id;
    let conversation = ConversationId::telegram(chat_id.0);

    match cmd {
        Command::Start => {
            let name = msg.from.as_ref().map(|u| u.first_name.as_str()).unwrap_or("there");
            let text = format!("Hi {name}! Pick an agent with /agents, then just send your messages.");
            state.telegram.send_text(chat_id, &text).await.ok();
        }
        Command::Help => {
            state
                .telegram
                .send_text(chat_id, &Command::descriptions().to_string())
                .await
                .ok();
        }
        Command::Agents => {
            let status = state.service.status(&conversation).await;
            let current = status.session.as_ref().map(|s| s.agent_type.as_str());
            state
                .telegram
                .send_agent_menu(chat_id, current, &state.service.agent_types())
                .await
                .ok();
        }
        Command::Status => {
            let status = state.service.status(&conversation).await;
            let text = format_status(&status, Instant::now());
            state.telegram.send_text(chat_id, &text).await.ok();
        }
        Command::Reset => {
            let text = if state.service.reset(&conversation).await {
                "Session ended. Use /agents to start a new one."
            } else {
                "Nothing to reset."
            };
            state.telegram.send_text(chat_id, text).await.ok();
        }
    }

    Ok(())
}

async fn handle_callback(query: CallbackQuery, state: Arc<BotState>) -> ResponseResult<()> {
    state.telegram.answer_callback(&query).await;

    let Some(message) = query.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    if !state.admit(Some(&query.from), chat_id).await {
        return Ok(());
    }

    let Some(agent_type) = query.data.as_deref().and_then(parse_agent_selection) else {
        warn!("Ignoring unknown callback data: {:?}", query.data);
        return Ok(());
    };

    info!("🤖 {} selected agent {}", query.from.id, agent_type);
    let text = state
        .service
        .select_and_describe(&ConversationId::telegram(chat_id.0), agent_type)
        .await;
    state.telegram.edit_text(chat_id, message.id(), &text).await.ok();

    Ok(())
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !state.admit(msg.from.as_ref(), msg.chat.id).await {
        return Ok(());
    }

    if text.starts_with('/') {
        state
            .telegram
            .send_text(msg.chat.id, "Unknown command. See /help.")
            .await
            .ok();
        return Ok(());
    }

    let username = msg
        .from
        .as_ref()
        .map(|u| u.username.as_deref().unwrap_or(&u.first_name))
        .unwrap_or("unknown");
    let text_preview: String = text.chars().take(100).collect();
    info!("📨 {} ({}): \"{}\"", username, msg.chat.id, text_preview);

    state.telegram.send_typing(msg.chat.id).await;
    let reply = state
        .service
        .respond(&ConversationId::telegram(msg.chat.id.0), text)
        .await;
    state.telegram.send_text(msg.chat.id, &reply).await.ok();

    Ok(())
}
