pub mod callbacks;
pub mod commands;
pub mod views;

use std::collections::HashMap;
use std::sync::Arc;

use teloxide::dispatching::{DefaultKey, UpdateHandler};
use teloxide::prelude::*;
use teloxide::RequestError;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::aliexpress::{AliExpressClient, Product, ProductSource};
use crate::announce::{self, ProductInfo, PREVIEW_PREFIX};
use crate::config::{Config, PostingConfig};
use crate::delivery::ConflictGuard;
use crate::poster::Poster;
use crate::scheduler::posting::PostingScheduler;
use crate::store::Store;
use commands::Command;

/// Shared application state
pub struct AppState {
    pub config: Config,
    /// Live posting settings, edited by admin commands.
    pub posting: Arc<RwLock<PostingConfig>>,
    pub client: Arc<AliExpressClient>,
    pub store: Store,
    pub poster: Arc<Poster>,
    pub scheduler: Arc<PostingScheduler>,
    /// Last `/search` results, for the "post first" button.
    search_results: Mutex<HashMap<String, Product>>,
}

impl AppState {
    pub fn new(
        config: Config,
        posting: Arc<RwLock<PostingConfig>>,
        client: Arc<AliExpressClient>,
        store: Store,
        poster: Arc<Poster>,
        scheduler: Arc<PostingScheduler>,
    ) -> Self {
        Self {
            config,
            posting,
            client,
            store,
            poster,
            scheduler,
            search_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        user_id == self.config.telegram.admin_user_id
    }

    pub async fn remember_results(&self, products: &[Product]) {
        let mut results = self.search_results.lock().await;
        results.clear();
        results.extend(products.iter().map(|p| (p.product_id.clone(), p.clone())));
    }

    pub async fn remembered(&self, product_id: &str) -> Option<Product> {
        self.search_results.lock().await.get(product_id).cloned()
    }
}

/// Update routing: admin commands, admin links, refusals, button presses.
pub fn schema() -> UpdateHandler<RequestError> {
    let admin_messages = Update::filter_message()
        .filter(|msg: Message, state: Arc<AppState>| {
            msg.from.as_ref().is_some_and(|u| state.is_admin(u.id.0))
        })
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(commands::handle),
        )
        .branch(dptree::endpoint(handle_text));

    let other_messages = Update::filter_message().endpoint(deny);
    let callbacks = Update::filter_callback_query().endpoint(callbacks::handle);

    dptree::entry()
        // Any update means getUpdates is ours again
        .inspect(|guard: Arc<ConflictGuard>| guard.reset())
        .branch(admin_messages)
        .branch(other_messages)
        .branch(callbacks)
}

pub fn dispatcher(
    bot: Bot,
    state: Arc<AppState>,
    guard: Arc<ConflictGuard>,
) -> Dispatcher<Bot, RequestError, DefaultKey> {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![state, guard])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Error in update handler"))
        .enable_ctrlc_handler()
        .build()
}

async fn deny(bot: Bot, msg: Message) -> ResponseResult<()> {
    if let Some(user) = msg.from.as_ref() {
        warn!("Refused message from non-admin user {}", user.id);
    }
    if msg.chat.is_private() {
        bot.send_message(msg.chat.id, "❌ Access denied. Admins only.")
            .await?;
    }
    Ok(())
}

/// Non-command admin text: an AliExpress link becomes an announcement
/// preview.
async fn handle_text(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if !announce::is_aliexpress_link(text) {
        bot.send_message(
            msg.chat.id,
            "❌ Not an AliExpress product link\n\n\
             Example: https://pt.aliexpress.com/item/1005001234567890.html\n\
             Use /help for the command list.",
        )
        .await?;
        return Ok(());
    }

    let link = text.trim();
    let info = match announce::extract_product_id(link) {
        Some(id) => match state.client.product_details(&id).await {
            Ok(Some(product)) => ProductInfo::from_product(&product),
            Ok(None) => ProductInfo::synthetic(&id),
            Err(e) => {
                warn!("Product details unavailable for {}, using generated info: {:#}", id, e);
                ProductInfo::synthetic(&id)
            }
        },
        None => announce::product_info_for_link(link),
    };
    info!("Announcement prepared for product {}", info.product_id);

    let announcement =
        announce::announcement(&info, link, &state.config.aliexpress.currency_symbol);
    bot.send_message(msg.chat.id, format!("{}{}", PREVIEW_PREFIX, announcement))
        .reply_markup(views::announce_keyboard())
        .await?;
    Ok(())
}
