use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::MessageId;
use tracing::{error, info, warn};

use super::commands::{send_logs, send_stats};
use super::views::{self, Period};
use super::AppState;
use crate::aliexpress::ProductSource;
use crate::announce;
use crate::poster::PublishOutcome;

/// What a callback button asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ToggleStatus,
    ShowStats,
    ShowConfig,
    ShowLogs,
    PostFirst(String),
    AnnouncePost,
    AnnounceCancel,
}

impl Action {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            views::TOGGLE_STATUS => Some(Action::ToggleStatus),
            views::SHOW_STATS => Some(Action::ShowStats),
            views::SHOW_CONFIG => Some(Action::ShowConfig),
            views::SHOW_LOGS => Some(Action::ShowLogs),
            views::ANNOUNCE_POST => Some(Action::AnnouncePost),
            views::ANNOUNCE_CANCEL => Some(Action::AnnounceCancel),
            _ => data
                .strip_prefix(views::POST_FIRST)
                .filter(|id| !id.is_empty())
                .map(|id| Action::PostFirst(id.to_string())),
        }
    }
}

pub async fn handle(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    if !state.is_admin(q.from.id.0) {
        warn!("Callback from non-admin user {}", q.from.id);
        bot.answer_callback_query(q.id.clone())
            .text("Access denied")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let Some(action) = q.data.as_deref().and_then(Action::parse) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    info!("Admin callback: {:?}", action);

    let message = q.regular_message();
    let chat = message
        .map(|m| m.chat.id)
        .unwrap_or_else(|| ChatId(state.config.telegram.admin_user_id as i64));
    let message_id = message.map(|m| m.id);
    let message_text = message.and_then(|m| m.text()).unwrap_or_default().to_string();

    match action {
        Action::ToggleStatus => {
            let active = state.poster.toggle_active();
            let label = if active { "▶️ Active" } else { "⏸️ Paused" };
            info!("Posting toggled to {}", label);
            bot.answer_callback_query(q.id.clone())
                .text(format!("Status changed to: {}", label))
                .await?;
            if let Some(id) = message_id {
                bot.edit_message_text(
                    chat,
                    id,
                    format!("{}\n\n🔄 Status changed to: {}", message_text, label),
                )
                .reply_markup(views::control_keyboard(active))
                .await?;
            }
        }
        Action::ShowStats => {
            bot.answer_callback_query(q.id.clone())
                .text("Loading statistics...")
                .await?;
            send_stats(&bot, chat, &state, Period::All).await?;
        }
        Action::ShowConfig => {
            bot.answer_callback_query(q.id.clone())
                .text("Loading settings...")
                .await?;
            let text = views::config_text(
                &*state.posting.read().await,
                state.client.tracking_id(),
                &state.config.telegram.channel_id,
            );
            bot.send_message(chat, text).await?;
        }
        Action::ShowLogs => {
            bot.answer_callback_query(q.id.clone())
                .text("Loading logs...")
                .await?;
            send_logs(&bot, chat, &state).await?;
        }
        Action::PostFirst(product_id) => {
            bot.answer_callback_query(q.id.clone())
                .text("Posting product...")
                .await?;
            let reply = post_first(&state, &product_id).await;
            bot.send_message(chat, reply).await?;
        }
        Action::AnnouncePost => {
            let announcement = announce::strip_preview(&message_text).to_string();
            if announcement.trim().is_empty() {
                bot.answer_callback_query(q.id.clone())
                    .text("Preview no longer available")
                    .show_alert(true)
                    .await?;
                return Ok(());
            }
            match state.poster.send_text(announcement).await {
                Ok(()) => {
                    info!("Announcement posted to the channel");
                    bot.answer_callback_query(q.id.clone())
                        .text("✅ Posted to the channel")
                        .await?;
                    replace_text(&bot, chat, message_id, "✅ Announcement posted to the channel").await?;
                }
                Err(e) => {
                    error!("Announcement post failed: {:#}", e);
                    bot.answer_callback_query(q.id.clone())
                        .text(format!("❌ Posting failed: {}", e))
                        .show_alert(true)
                        .await?;
                }
            }
        }
        Action::AnnounceCancel => {
            bot.answer_callback_query(q.id.clone())
                .text("❌ Cancelled")
                .await?;
            replace_text(&bot, chat, message_id, "❌ Cancelled").await?;
        }
    }

    Ok(())
}

async fn replace_text(
    bot: &Bot,
    chat: ChatId,
    message_id: Option<MessageId>,
    text: &str,
) -> ResponseResult<()> {
    if let Some(id) = message_id {
        bot.edit_message_text(chat, id, text).await?;
    }
    Ok(())
}

async fn post_first(state: &AppState, product_id: &str) -> String {
    let product = match state.remembered(product_id).await {
        Some(product) => product,
        None => match state.client.product_details(product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => return "❌ Could not load the product details".to_string(),
            Err(e) => {
                error!("Product lookup failed for {}: {:#}", product_id, e);
                return format!("❌ Error: {}", e);
            }
        },
    };

    match state.scheduler.force_post(&product).await {
        Ok(PublishOutcome::Posted) => "✅ Product posted".to_string(),
        Ok(PublishOutcome::Paused) => "⏸️ Bot is paused, nothing posted".to_string(),
        Err(e) => {
            error!("Posting {} failed: {:#}", product_id, e);
            format!("❌ Error: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing() {
        assert_eq!(Action::parse("toggle_status"), Some(Action::ToggleStatus));
        assert_eq!(Action::parse("show_logs"), Some(Action::ShowLogs));
        assert_eq!(Action::parse("announce_cancel"), Some(Action::AnnounceCancel));
        assert_eq!(
            Action::parse("post_first:1005001234567890"),
            Some(Action::PostFirst("1005001234567890".to_string()))
        );
        assert_eq!(Action::parse("post_first:"), None);
        assert_eq!(Action::parse("nonsense"), None);
    }
}
