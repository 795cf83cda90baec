use std::sync::Arc;

use chrono::Utc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use super::views::{self, Period};
use super::AppState;
use crate::aliexpress::ProductSource;
use crate::announce;
use crate::logging::{self, MESSAGE_CHUNK};
use crate::poster::PublishOutcome;

/// Lines of the log file shown by `/logs`.
const LOG_LINES: usize = 30;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Admin commands:")]
pub enum Command {
    #[command(description = "open the control panel")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "current status and hourly progress")]
    Status,
    #[command(description = "pause automatic posting")]
    Pause,
    #[command(description = "resume automatic posting")]
    Resume,
    #[command(description = "posts per hour: /frequency <min> <max>")]
    Frequency(String),
    #[command(description = "posting hours: /hours <start> <end>")]
    Hours(String),
    #[command(description = "/category enable|disable <name>, list, or api")]
    Category(String),
    #[command(description = "statistics: /stats [today|week|month|all]")]
    Stats(String),
    #[command(description = "recent log lines")]
    Logs,
    #[command(description = "test the AliExpress API connection")]
    Testapi,
    #[command(description = "post one product now: /forcepost <link>")]
    Forcepost(String),
    #[command(description = "search products: /search <terms>")]
    Search(String),
    #[command(description = "cancel every pending post this hour")]
    Stop,
}

pub fn help_text() -> String {
    format!(
        "{}\n\n\
         Examples:\n\
         /frequency 15 20 - 15 to 20 posts per hour\n\
         /hours 08:00 22:00 - post between 8am and 10pm\n\
         /category enable electronics\n\
         /stats week\n\n\
         Send an AliExpress product link to prepare an announcement.",
        Command::descriptions()
    )
}

pub async fn handle(bot: Bot, msg: Message, cmd: Command, state: Arc<AppState>) -> ResponseResult<()> {
    info!("Admin command: {:?}", cmd);
    let chat = msg.chat.id;

    match cmd {
        Command::Start => {
            bot.send_message(
                chat,
                format!(
                    "🤖 AliExpress deals bot - control panel\n\n{}",
                    Command::descriptions()
                ),
            )
            .reply_markup(views::control_keyboard(state.poster.is_active()))
            .await?;
        }
        Command::Help => {
            bot.send_message(chat, help_text()).await?;
        }
        Command::Status => send_status(&bot, chat, &state).await?,
        Command::Pause => {
            state.poster.set_active(false);
            info!("Posting paused by admin");
            bot.send_message(chat, "⏸️ Bot paused. Automatic posts are stopped.")
                .await?;
        }
        Command::Resume => {
            state.poster.set_active(true);
            info!("Posting resumed by admin");
            bot.send_message(chat, "▶️ Bot resumed. Automatic posts are back on.")
                .await?;
        }
        Command::Frequency(args) => {
            let reply = match views::parse_frequency(&args) {
                Ok((min, max)) => match state.posting.write().await.set_frequency(min, max) {
                    Ok(()) => {
                        info!("Frequency changed to {}-{} posts/hour", min, max);
                        format!(
                            "✅ Frequency changed\n\nPosts per hour: {}-{}\nApplies from the next hour.",
                            min, max
                        )
                    }
                    Err(e) => format!("❌ {}", e),
                },
                Err(e) => format!("❌ {:#}", e),
            };
            bot.send_message(chat, reply).await?;
        }
        Command::Hours(args) => {
            let reply = match views::parse_hours(&args) {
                Ok((start, end)) => match state.posting.write().await.set_window(&start, &end) {
                    Ok(()) => {
                        info!("Posting hours changed to {}-{}", start, end);
                        format!("✅ Posting hours changed: {} - {}", start, end)
                    }
                    Err(e) => format!("❌ {:#}", e),
                },
                Err(e) => format!("❌ {:#}", e),
            };
            bot.send_message(chat, reply).await?;
        }
        Command::Category(args) => {
            let reply = category(&state, &args).await;
            bot.send_message(chat, reply).await?;
        }
        Command::Stats(args) => send_stats(&bot, chat, &state, Period::parse(&args)).await?,
        Command::Logs => send_logs(&bot, chat, &state).await?,
        Command::Testapi => {
            bot.send_message(chat, "🔄 Testing the AliExpress API connection...")
                .await?;
            let reply = if state.client.test_connection().await {
                let products = state.client.hot_products(5).await;
                views::api_test_text(&products, state.client.tracking_id())
            } else {
                "❌ API connection failed\n\nCheck the credentials and the network. \
                 Automatic posts use sample products until the API answers."
                    .to_string()
            };
            bot.send_message(chat, reply).await?;
        }
        Command::Forcepost(args) => {
            let reply = force_post(&state, args.trim()).await;
            bot.send_message(chat, reply).await?;
        }
        Command::Search(args) => search(&bot, chat, &state, args.trim()).await?,
        Command::Stop => {
            let cancelled = state.scheduler.emergency_stop().await;
            bot.send_message(
                chat,
                format!("🛑 Emergency stop: {} pending posts cancelled.", cancelled),
            )
            .await?;
        }
    }
    Ok(())
}

pub async fn send_status(bot: &Bot, chat: ChatId, state: &AppState) -> ResponseResult<()> {
    let status = state.scheduler.status().await;
    let text = match state.store.statistics(None).await {
        Ok(stats) => views::status_text(&status, &stats, &state.config.telegram.channel_id, Utc::now()),
        Err(e) => {
            error!("Status statistics failed: {:#}", e);
            format!("❌ Could not load statistics: {}", e)
        }
    };
    bot.send_message(chat, text)
        .reply_markup(views::control_keyboard(status.active))
        .await?;
    Ok(())
}

pub async fn send_stats(bot: &Bot, chat: ChatId, state: &AppState, period: Period) -> ResponseResult<()> {
    let tz = state.posting.read().await.tz().unwrap_or(chrono_tz::Tz::UTC);
    let since = period.since(Utc::now(), tz);
    let text = match state.store.statistics(since).await {
        Ok(stats) => views::stats_text(period, &stats),
        Err(e) => {
            error!("Statistics failed: {:#}", e);
            format!("❌ Could not load statistics: {}", e)
        }
    };
    bot.send_message(chat, text).await?;
    Ok(())
}

pub async fn send_logs(bot: &Bot, chat: ChatId, state: &AppState) -> ResponseResult<()> {
    let path = &state.config.logging.file;
    match logging::tail(path, LOG_LINES, MESSAGE_CHUNK) {
        Ok(text) if text.trim().is_empty() => {
            bot.send_message(chat, "📋 The log is empty").await?;
        }
        Ok(text) => {
            bot.send_message(chat, "📋 Recent logs:").await?;
            for chunk in logging::split_message(&text, MESSAGE_CHUNK) {
                bot.send_message(chat, chunk).await?;
            }
        }
        Err(e) => {
            warn!("Log tail failed: {:#}", e);
            bot.send_message(chat, "📋 No log file found").await?;
        }
    }
    Ok(())
}

async fn category(state: &AppState, args: &str) -> String {
    let mut words = args.split_whitespace();
    let action = words.next().unwrap_or("list").to_lowercase();
    let name = words.collect::<Vec<_>>().join(" ");

    match action.as_str() {
        "enable" | "disable" if name.is_empty() => {
            format!("❌ Usage: /category {} <name>", action)
        }
        "enable" => {
            if state.posting.write().await.enable_category(&name) {
                info!("Category enabled: {}", name);
                format!("✅ Category enabled: {}", name)
            } else {
                format!("ℹ️ Category already enabled: {}", name)
            }
        }
        "disable" => {
            if state.posting.write().await.disable_category(&name) {
                info!("Category disabled: {}", name);
                format!("✅ Category disabled: {}", name)
            } else {
                format!("❌ Unknown category: {}", name)
            }
        }
        "list" => {
            let posting = state.posting.read().await;
            format!(
                "📂 Enabled categories ({}):\n{}",
                posting.categories.len(),
                posting.categories.join(", ")
            )
        }
        "api" => match state.client.categories().await {
            Ok(categories) if !categories.is_empty() => {
                let names: Vec<String> = categories
                    .iter()
                    .take(20)
                    .map(|c| format!("• {} ({})", c.category_name, c.category_id))
                    .collect();
                format!(
                    "📂 AliExpress categories ({} total):\n{}",
                    categories.len(),
                    names.join("\n")
                )
            }
            Ok(_) => "📂 The API returned no categories".to_string(),
            Err(e) => format!("❌ Could not load categories: {:#}", e),
        },
        _ => "❌ Usage: /category enable|disable <name>, /category list or /category api".to_string(),
    }
}

async fn force_post(state: &AppState, link: &str) -> String {
    if link.is_empty() {
        return "❌ Usage: /forcepost <product link>".to_string();
    }
    let Some(product_id) = announce::extract_product_id(link) else {
        return "❌ Invalid link. Use an AliExpress product link.".to_string();
    };

    let product = match state.client.product_details(&product_id).await {
        Ok(Some(product)) => product,
        Ok(None) => return "❌ Product not found. Check the link.".to_string(),
        Err(e) => {
            error!("Product lookup failed for {}: {:#}", product_id, e);
            return format!("❌ Product lookup failed: {}", e);
        }
    };

    match state.scheduler.force_post(&product).await {
        Ok(PublishOutcome::Posted) => "✅ Product posted".to_string(),
        Ok(PublishOutcome::Paused) => "⏸️ Bot is paused, nothing posted".to_string(),
        Err(e) => {
            error!("Forced post failed: {:#}", e);
            format!("❌ Posting failed: {}", e)
        }
    }
}

async fn search(bot: &Bot, chat: ChatId, state: &AppState, term: &str) -> ResponseResult<()> {
    if term.is_empty() {
        bot.send_message(chat, "❌ Usage: /search <terms>").await?;
        return Ok(());
    }
    bot.send_message(chat, format!("🔍 Searching for '{}'...", term))
        .await?;

    let products = state.client.search_products(term, 0.0, 10).await;

    let Some(first) = products.first() else {
        bot.send_message(chat, format!("❌ No products found for '{}'", term))
            .await?;
        return Ok(());
    };

    let text = views::search_text(term, &products, &state.config.aliexpress.currency_symbol);
    let keyboard = views::post_first_keyboard(&first.product_id);
    state.remember_results(&products).await;
    bot.send_message(chat, text).reply_markup(keyboard).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_parse() {
        assert_eq!(Command::parse("/status", "bot").unwrap(), Command::Status);
        assert_eq!(
            Command::parse("/frequency 10 20", "bot").unwrap(),
            Command::Frequency("10 20".to_string())
        );
        assert_eq!(
            Command::parse("/stats", "bot").unwrap(),
            Command::Stats(String::new())
        );
        assert_eq!(
            Command::parse("/search usb cable", "bot").unwrap(),
            Command::Search("usb cable".to_string())
        );
        assert!(Command::parse("/unknown", "bot").is_err());
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for cmd in ["/status", "/frequency", "/hours", "/category", "/forcepost", "/stop"] {
            assert!(help.contains(cmd), "help misses {}", cmd);
        }
    }
}
