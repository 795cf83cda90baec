//! Hybrid product scoring and anti-repetition rules.
//!
//! Static attributes (discount, rating, volume, commission) are scored from
//! tier tables; dynamic ones (trend, past performance, freshness) come from
//! the store. The weighted sum plus a premium boost is clamped to 0..=100.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::aliexpress::Product;
use crate::store::{PostedRecord, Store};

const W_DISCOUNT: f64 = 0.25;
const W_RATING: f64 = 0.20;
const W_VOLUME: f64 = 0.15;
const W_COMMISSION: f64 = 0.15;
const W_TRENDING: f64 = 0.10;
const W_HISTORICAL: f64 = 0.10;
const W_FRESHNESS: f64 = 0.05;

/// Minimum gap between two posts of the same product.
const REPOST_AFTER_HOURS: i64 = 48;
/// Gap for products that performed poorly last time.
const LOW_PERFORMER_REPOST_AFTER_HOURS: i64 = 72;

/// Return the score of the first tier whose threshold `value` reaches.
fn tier(value: f64, tiers: &[(f64, f64)]) -> f64 {
    tiers
        .iter()
        .find(|(threshold, _)| value >= *threshold)
        .map(|(_, score)| *score)
        .unwrap_or(0.0)
}

pub fn discount_score(product: &Product) -> f64 {
    tier(
        product.discount,
        &[(70.0, 100.0), (50.0, 80.0), (30.0, 60.0), (20.0, 40.0), (10.0, 20.0)],
    )
}

pub fn rating_score(product: &Product) -> f64 {
    let base = tier(
        product.rating,
        &[(4.8, 100.0), (4.5, 80.0), (4.0, 60.0), (3.5, 40.0), (3.0, 20.0)],
    );
    let boost = tier(
        product.review_count as f64,
        &[(1000.0, 20.0), (500.0, 15.0), (100.0, 10.0), (50.0, 5.0)],
    );
    (base + boost).min(100.0)
}

pub fn volume_score(product: &Product) -> f64 {
    tier(
        product.volume as f64,
        &[(10000.0, 100.0), (5000.0, 80.0), (1000.0, 60.0), (500.0, 40.0), (100.0, 20.0)],
    )
}

pub fn commission_score(product: &Product) -> f64 {
    tier(
        product.commission_rate,
        &[(10.0, 100.0), (8.0, 80.0), (6.0, 60.0), (4.0, 40.0), (2.0, 20.0)],
    )
}

pub fn premium_boost(product: &Product) -> f64 {
    let (rating, volume, discount) = (product.rating, product.volume, product.discount);
    if rating >= 4.5 && volume >= 1000 && discount >= 30.0 {
        15.0
    } else if rating >= 4.0 && volume >= 500 && discount >= 20.0 {
        10.0
    } else if rating >= 3.5 && volume >= 100 {
        5.0
    } else {
        0.0
    }
}

pub fn historical_score(record: Option<&PostedRecord>) -> f64 {
    let Some(record) = record else {
        return 0.0;
    };
    let mut score = (record.conversion_score + record.engagement_score) / 2.0;
    score += match record.clicks {
        c if c > 100 => 20.0,
        c if c > 50 => 10.0,
        c if c > 10 => 5.0,
        _ => 0.0,
    };
    score.min(100.0)
}

/// Never-posted products get the highest freshness; the score recovers as
/// the last post ages.
pub fn freshness_score(record: Option<&PostedRecord>, now: DateTime<Utc>) -> f64 {
    let Some(record) = record else {
        return 50.0;
    };
    match (now - record.posted_at).num_days() {
        d if d <= 0 => 0.0,
        1 => 10.0,
        d if d <= 7 => 20.0,
        d if d <= 30 => 30.0,
        _ => 40.0,
    }
}

/// Decide whether a product may be posted again.
pub fn repost_allowed(record: Option<&PostedRecord>, now: DateTime<Utc>, force: bool) -> bool {
    let Some(record) = record else {
        return true;
    };
    let age = now - record.posted_at;

    if age < Duration::hours(REPOST_AFTER_HOURS) {
        // High performers may come back early
        return force || (record.conversion_score > 80.0 && record.clicks > 50);
    }
    if record.conversion_score < 30.0 && age < Duration::hours(LOW_PERFORMER_REPOST_AFTER_HOURS) {
        return false;
    }
    true
}

/// Coarse category from title keywords.
pub fn category_of(title: &str) -> &'static str {
    let title = title.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| title.contains(w));
    if has(&["phone", "celular", "smartphone"]) {
        "electronics"
    } else if has(&["clothes", "roupa", "camiseta", "shirt", "dress"]) {
        "clothing"
    } else if has(&["home", "casa", "decoration", "kitchen"]) {
        "home"
    } else if has(&["beauty", "cosmetic", "makeup"]) {
        "beauty"
    } else {
        "general"
    }
}

pub struct Ranker {
    store: Store,
}

impl Ranker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn trending_score(&self, product_id: &str, now: DateTime<Utc>) -> Result<f64> {
        if let Some((trend, velocity)) = self.store.trending(product_id).await? {
            return Ok((trend + velocity).min(100.0));
        }
        let clicks = self
            .store
            .clicks_since(product_id, now - Duration::hours(24))
            .await?;
        Ok((clicks as f64 * 10.0).min(100.0))
    }

    /// Hybrid score in 0..=100.
    pub async fn score(&self, product: &Product, now: DateTime<Utc>) -> Result<f64> {
        let record = self.store.posted_record(&product.product_id).await?;
        let trending = self.trending_score(&product.product_id, now).await?;

        let weighted = discount_score(product) * W_DISCOUNT
            + rating_score(product) * W_RATING
            + volume_score(product) * W_VOLUME
            + commission_score(product) * W_COMMISSION
            + trending * W_TRENDING
            + historical_score(record.as_ref()) * W_HISTORICAL
            + freshness_score(record.as_ref(), now) * W_FRESHNESS;

        let score = (weighted + premium_boost(product)).clamp(0.0, 100.0);
        debug!("Score for {}: {:.2}", product.product_id, score);
        Ok(score)
    }

    pub async fn can_post(&self, product_id: &str, now: DateTime<Utc>, force: bool) -> bool {
        match self.store.posted_record(product_id).await {
            Ok(record) => {
                let allowed = repost_allowed(record.as_ref(), now, force);
                let recent = record
                    .as_ref()
                    .is_some_and(|r| now - r.posted_at < Duration::hours(REPOST_AFTER_HOURS));
                if allowed && recent {
                    info!("Reposting high-performing product: {}", product_id);
                }
                allowed
            }
            Err(e) => {
                // A broken history lookup should not stall posting
                warn!("Anti-repetition check failed for {}: {:#}", product_id, e);
                true
            }
        }
    }

    /// Best `limit` products that may be posted, highest score first.
    pub async fn top_products(
        &self,
        products: Vec<Product>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<(Product, f64)> {
        let available = products.len();
        let mut scored = Vec::new();
        for product in products {
            if !self.can_post(&product.product_id, now, false).await {
                continue;
            }
            let score = match self.score(&product, now).await {
                Ok(score) => score,
                Err(e) => {
                    warn!("Scoring failed for {}: {:#}", product.product_id, e);
                    0.0
                }
            };
            scored.push((product, score));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        info!("Selected {} products out of {} available", scored.len(), available);
        scored
    }
}
