mod aliexpress;
mod announce;
mod bot;
mod config;
mod delivery;
mod logging;
mod poster;
mod ranking;
mod scheduler;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::prelude::*;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::aliexpress::AliExpressClient;
use crate::bot::AppState;
use crate::config::Config;
use crate::delivery::{ConflictGuard, InstanceLock};
use crate::poster::Poster;
use crate::ranking::Ranker;
use crate::scheduler::posting::PostingScheduler;
use crate::scheduler::Scheduler;
use crate::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(&config.logging.file);
    if let Some(notice) = Config::missing_file_notice(&config_path) {
        warn!("{}", notice);
    }

    info!("Bot started - promobot v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", config_path.display());
    info!("  Channel: {}", config.telegram.channel_id);
    info!("  Delivery mode: {}", config.delivery.mode);
    info!(
        "  Posts/hour: {}-{}, {} - {} ({})",
        config.posting.min_per_hour,
        config.posting.max_per_hour,
        config.posting.start_time,
        config.posting.end_time,
        config.posting.timezone
    );

    let _lock = InstanceLock::acquire(&InstanceLock::path_for(&config.memory.database_path))?;

    let store = Store::open(&config.memory.database_path)?;
    let client = Arc::new(AliExpressClient::new(config.aliexpress.clone())?);
    let ranker = Arc::new(Ranker::new(store.clone()));

    let bot = Bot::new(&config.telegram.bot_token);
    let click_base = config
        .server
        .public_url
        .clone()
        .filter(|_| config.server_enabled());
    let poster = Arc::new(Poster::new(
        bot.clone(),
        &config.telegram.channel_id,
        store.clone(),
        ranker.clone(),
        config.aliexpress.currency_symbol.clone(),
        click_base,
    ));

    let posting = Arc::new(RwLock::new(config.posting.clone()));
    let scheduler = Scheduler::new().await?;
    let posting_scheduler = Arc::new(PostingScheduler::new(
        scheduler.clone(),
        client.clone(),
        ranker,
        poster.clone(),
        posting.clone(),
    ));
    crate::scheduler::tasks::register_builtin_tasks(
        &scheduler,
        posting_scheduler.clone(),
        store.clone(),
        config.posting.tz()?,
    )
    .await?;

    let guard = Arc::new(ConflictGuard::new(
        config.delivery.conflict_threshold,
        Duration::from_secs(config.delivery.conflict_cooldown_secs),
    ));
    let state = Arc::new(AppState::new(
        config.clone(),
        posting,
        client,
        store.clone(),
        poster,
        posting_scheduler.clone(),
    ));
    let dispatcher = bot::dispatcher(bot.clone(), state, guard.clone());

    let on_ready = {
        let scheduler = scheduler.clone();
        let bot = bot.clone();
        let admin = ChatId(config.telegram.admin_user_id as i64);
        async move {
            if let Err(e) = scheduler.start().await {
                error!("Scheduler failed to start: {:#}", e);
            }
            tokio::spawn(async move {
                if let Err(e) = posting_scheduler.start().await {
                    error!("Initial hour planning failed: {:#}", e);
                }
            });
            if let Err(e) = bot
                .send_message(admin, "🤖 Bot started!\n\nSend /status for the control panel.")
                .await
            {
                warn!("Could not send startup message to admin: {}", e);
            }
        }
    };

    delivery::run(
        bot,
        dispatcher,
        guard,
        &config,
        server::router(store),
        on_ready,
    )
    .await?;

    scheduler.shutdown().await?;
    info!("Bot stopped");
    Ok(())
}
