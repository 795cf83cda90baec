use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::{InputFile, Recipient};
use tracing::{info, warn};

use crate::aliexpress::Product;
use crate::ranking::{self, Ranker};
use crate::store::Store;

/// Telegram rejects photo captions above this many characters.
const CAPTION_LIMIT: usize = 1024;
const TITLE_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Posted,
    Paused,
}

/// `@name` channels and numeric chat ids are both accepted.
pub fn channel_recipient(channel_id: &str) -> Recipient {
    match channel_id.trim().parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(channel_id.trim().to_string()),
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let kept: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", kept)
}

pub fn highlights(product: &Product) -> String {
    let mut tags = Vec::new();
    if product.discount > 50.0 {
        tags.push("🔥 Super discount");
    }
    if product.rating >= 4.5 {
        tags.push("⭐ Top rated");
    }
    if product.volume > 1000 {
        tags.push("📈 Best seller");
    }
    if product.discount > 70.0 {
        tags.push("⚡ Flash deal");
    }
    if tags.is_empty() {
        "Special offer".to_string()
    } else {
        tags.join(" | ")
    }
}

/// Channel post body. Sent as plain text: no parse mode, nothing to escape.
pub fn format_post(product: &Product, link: &str, currency: &str) -> String {
    let shop = if product.shop_title.is_empty() {
        "AliExpress"
    } else {
        &product.shop_title
    };
    format!(
        "{title} | {highlights}\n\
         \n\
         💵 From {cur} {original:.2} ➜ {cur} {sale:.2}\n\
         🎯 Discount: {discount:.0}% | Cashback available\n\
         🚚 Free shipping | Fast delivery\n\
         ⭐ Rating: {rating:.1} | {volume} sold\n\
         \n\
         🔗 Discount link (affiliate):\n\
         {link}\n\
         \n\
         🏪 Shop: {shop}\n\
         \n\
         #AliExpress #Deals #Discount",
        title = truncate_chars(&product.title, TITLE_LIMIT),
        highlights = highlights(product),
        cur = currency,
        original = product.original_price,
        sale = product.sale_price,
        discount = product.discount,
        rating = product.rating,
        volume = product.volume,
        link = link,
        shop = shop,
    )
}

/// Link printed in a post: the click-tracking redirect when a public URL is
/// configured, the affiliate URL otherwise.
pub fn post_link(product: &Product, click_base: Option<&str>) -> String {
    match click_base {
        Some(base) => format!("{}/go/{}", base.trim_end_matches('/'), product.product_id),
        None if !product.affiliate_url.is_empty() => product.affiliate_url.clone(),
        None => product.product_url.clone(),
    }
}

/// Channel side of the posting pipeline.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn is_active(&self) -> bool;

    async fn publish(&self, product: &Product, score: Option<f64>) -> Result<PublishOutcome>;
}

/// Publishes products to the channel and records them.
pub struct Poster {
    bot: Bot,
    channel: Recipient,
    store: Store,
    ranker: Arc<Ranker>,
    currency: String,
    click_base: Option<String>,
    active: AtomicBool,
}

impl Poster {
    pub fn new(
        bot: Bot,
        channel_id: &str,
        store: Store,
        ranker: Arc<Ranker>,
        currency: String,
        click_base: Option<String>,
    ) -> Self {
        Self {
            bot,
            channel: channel_recipient(channel_id),
            store,
            ranker,
            currency,
            click_base,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Flip the pause flag, returning the new state.
    pub fn toggle_active(&self) -> bool {
        !self.active.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn render(&self, product: &Product) -> String {
        let link = post_link(product, self.click_base.as_deref());
        format_post(product, &link, &self.currency)
    }

    /// Post `product` to the channel unless paused. `score` is computed when
    /// the caller has none.
    pub async fn publish(&self, product: &Product, score: Option<f64>) -> Result<PublishOutcome> {
        if !self.is_active() {
            info!("Bot paused - product not posted");
            return Ok(PublishOutcome::Paused);
        }

        let text = self.render(product);
        self.send(product, text).await?;

        let now = Utc::now();
        let score = match score {
            Some(score) => score,
            None => self.ranker.score(product, now).await.unwrap_or(0.0),
        };
        self.store
            .record_post(product, score, ranking::category_of(&product.title), now)
            .await?;

        info!("Product posted: {}", truncate_chars(&product.title, 50));
        Ok(PublishOutcome::Posted)
    }

    async fn send(&self, product: &Product, text: String) -> Result<()> {
        if !product.image_url.is_empty() && text.chars().count() <= CAPTION_LIMIT {
            match reqwest::Url::parse(&product.image_url) {
                Ok(url) => {
                    match self
                        .bot
                        .send_photo(self.channel.clone(), InputFile::url(url))
                        .caption(text.clone())
                        .await
                    {
                        Ok(_) => return Ok(()),
                        Err(e) => warn!(
                            "Photo post failed for {}, sending text only: {}",
                            product.product_id, e
                        ),
                    }
                }
                Err(e) => warn!("Bad image URL for {}: {}", product.product_id, e),
            }
        }

        self.bot
            .send_message(self.channel.clone(), text)
            .await
            .with_context(|| format!("Failed to post {} to channel", product.product_id))?;
        Ok(())
    }

    /// Send arbitrary text (e.g. an approved announcement) to the channel.
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.bot
            .send_message(self.channel.clone(), text)
            .await
            .context("Failed to post to channel")?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for Poster {
    fn is_active(&self) -> bool {
        Poster::is_active(self)
    }

    async fn publish(&self, product: &Product, score: Option<f64>) -> Result<PublishOutcome> {
        Poster::publish(self, product, score).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliexpress::fallback::sample_products;

    #[test]
    fn test_channel_recipient() {
        assert_eq!(
            channel_recipient("-1001234"),
            Recipient::Id(ChatId(-1001234))
        );
        assert_eq!(
            channel_recipient("@deals"),
            Recipient::ChannelUsername("@deals".to_string())
        );
    }

    #[test]
    fn test_truncate_is_char_aware() {
        let long = "é".repeat(120);
        let cut = truncate_chars(&long, 100);
        assert_eq!(cut.chars().count(), 100);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_highlights() {
        let mut p = sample_products("T", 1).remove(0);
        p.discount = 75.0;
        p.rating = 4.9;
        p.volume = 5000;
        assert_eq!(
            highlights(&p),
            "🔥 Super discount | ⭐ Top rated | 📈 Best seller | ⚡ Flash deal"
        );
        p.discount = 10.0;
        p.rating = 3.0;
        p.volume = 10;
        assert_eq!(highlights(&p), "Special offer");
    }

    #[test]
    fn test_format_post_is_plain_text() {
        let p = sample_products("T", 2).remove(1);
        let text = format_post(&p, "https://x.test/go/1", "R$");
        assert!(text.starts_with("Bluetooth TWS 5.0 Earbuds"));
        assert!(text.contains("From R$ 299.99 ➜ R$ 149.99"));
        assert!(text.contains("Discount: 50%"));
        assert!(text.contains("https://x.test/go/1"));
        assert!(text.contains("Shop: AudioMax"));
        assert!(!text.contains("**"));
    }

    #[test]
    fn test_post_link_prefers_click_redirect() {
        let p = sample_products("T", 1).remove(0);
        assert_eq!(
            post_link(&p, Some("https://bot.example.com/")),
            "https://bot.example.com/go/1005001234567890"
        );
        assert_eq!(post_link(&p, None), p.affiliate_url);
    }

    #[tokio::test]
    async fn test_paused_poster_does_not_send() {
        let store = Store::open_in_memory().unwrap();
        let ranker = Arc::new(Ranker::new(store.clone()));
        let poster = Poster::new(
            Bot::new("0:test"),
            "@deals",
            store.clone(),
            ranker,
            "R$".to_string(),
            None,
        );

        assert!(!poster.toggle_active());
        let p = sample_products("T", 1).remove(0);
        let outcome = poster.publish(&p, Some(10.0)).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Paused);
        assert!(store.posted_record(&p.product_id).await.unwrap().is_none());
        assert!(poster.toggle_active());
    }
}
