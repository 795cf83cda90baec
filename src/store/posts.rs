use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::OptionalExtension;

use super::{format_ts, parse_ts, Store};
use crate::aliexpress::Product;

/// What the anti-repetition and history scores need about a past post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedRecord {
    pub product_id: String,
    pub title: String,
    pub affiliate_url: String,
    pub posted_at: DateTime<Utc>,
    pub clicks: u32,
    pub conversion_score: f64,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub total_posts: u32,
    pub total_clicks: u32,
    pub avg_score: f64,
    /// (title, clicks), most clicked first
    pub top_products: Vec<(String, u32)>,
}

impl Statistics {
    pub fn clicks_per_post(&self) -> f64 {
        self.total_clicks as f64 / self.total_posts.max(1) as f64
    }
}

impl Store {
    /// Record a post. Reposts refresh the row but keep its click count.
    pub async fn record_post(
        &self,
        product: &Product,
        score: f64,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ts = format_ts(now);
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO posted_products
             (product_id, title, affiliate_url, posted_at, conversion_score,
              category, discount, rating, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(product_id) DO UPDATE SET
                title = excluded.title,
                affiliate_url = excluded.affiliate_url,
                posted_at = excluded.posted_at,
                conversion_score = excluded.conversion_score,
                category = excluded.category,
                discount = excluded.discount,
                rating = excluded.rating,
                volume = excluded.volume",
            rusqlite::params![
                product.product_id,
                product.title,
                product.affiliate_url,
                ts,
                score,
                category,
                product.discount,
                product.rating,
                product.volume as i64,
            ],
        )
        .context("Failed to record post")?;

        conn.execute(
            "INSERT INTO product_history (product_id, action, timestamp, score_impact)
             VALUES (?1, 'post', ?2, ?3)",
            rusqlite::params![product.product_id, ts, score],
        )
        .context("Failed to record post history")?;

        Ok(())
    }

    /// Count a click and refresh the product's trend. Returns false for
    /// products that were never posted.
    pub async fn record_click(&self, product_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let ts = format_ts(now);
        let conn = self.conn.lock().await;

        let updated = conn
            .execute(
                "UPDATE posted_products SET clicks = clicks + 1, last_click_at = ?1
                 WHERE product_id = ?2",
                rusqlite::params![ts, product_id],
            )
            .context("Failed to update click count")?;
        if updated == 0 {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO product_history (product_id, action, timestamp) VALUES (?1, 'click', ?2)",
            rusqlite::params![product_id, ts],
        )
        .context("Failed to record click history")?;

        // Velocity is clicks over the last hour
        let hour_ago = format_ts(now - Duration::hours(1));
        let velocity: i64 = conn.query_row(
            "SELECT COUNT(*) FROM product_history
             WHERE product_id = ?1 AND action = 'click' AND timestamp > ?2",
            rusqlite::params![product_id, hour_ago],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO trending_products
             (product_id, trend_score, first_seen, last_seen, click_velocity)
             VALUES (?1, ?2, ?3, ?3, ?4)
             ON CONFLICT(product_id) DO UPDATE SET
                trend_score = excluded.trend_score,
                last_seen = excluded.last_seen,
                click_velocity = excluded.click_velocity",
            rusqlite::params![
                product_id,
                (velocity as f64 * 10.0).min(100.0),
                ts,
                velocity as f64
            ],
        )
        .context("Failed to update trending score")?;

        Ok(true)
    }

    pub async fn posted_record(&self, product_id: &str) -> Result<Option<PostedRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT product_id, title, affiliate_url, posted_at, clicks,
                        conversion_score, engagement_score
                 FROM posted_products WHERE product_id = ?1",
                rusqlite::params![product_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load posted product")?;

        let Some((product_id, title, affiliate_url, posted_at, clicks, conversion, engagement)) =
            row
        else {
            return Ok(None);
        };

        let posted_at = parse_ts(&posted_at)
            .with_context(|| format!("Corrupt posted_at for {}: {}", product_id, posted_at))?;

        Ok(Some(PostedRecord {
            product_id,
            title,
            affiliate_url,
            posted_at,
            clicks,
            conversion_score: conversion,
            engagement_score: engagement,
        }))
    }

    /// (trend_score, click_velocity) if the product has been trending.
    pub async fn trending(&self, product_id: &str) -> Result<Option<(f64, f64)>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT trend_score, click_velocity FROM trending_products WHERE product_id = ?1",
            rusqlite::params![product_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("Failed to load trending data")
    }

    pub async fn clicks_since(&self, product_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM product_history
             WHERE product_id = ?1 AND action = 'click' AND timestamp > ?2",
            rusqlite::params![product_id, format_ts(since)],
            |row| row.get(0),
        )
        .context("Failed to count recent clicks")
    }

    /// Aggregate posting statistics. `since = None` covers all time.
    pub async fn statistics(&self, since: Option<DateTime<Utc>>) -> Result<Statistics> {
        let since = since.map(format_ts).unwrap_or_default();
        let conn = self.conn.lock().await;

        let (total_posts, avg_score): (u32, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), AVG(score_impact) FROM product_history
             WHERE action = 'post' AND timestamp >= ?1",
            rusqlite::params![since],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let total_clicks: u32 = conn.query_row(
            "SELECT COUNT(*) FROM product_history WHERE action = 'click' AND timestamp >= ?1",
            rusqlite::params![since],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT p.title, COUNT(h.id) AS clicks
             FROM product_history h
             JOIN posted_products p ON p.product_id = h.product_id
             WHERE h.action = 'click' AND h.timestamp >= ?1
             GROUP BY h.product_id
             ORDER BY clicks DESC, p.title ASC
             LIMIT 5",
        )?;
        let top_products = stmt
            .query_map(rusqlite::params![since], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, u32)>>>()
            .context("Failed to load top products")?;

        Ok(Statistics {
            total_posts,
            total_clicks,
            avg_score: avg_score.unwrap_or(0.0),
            top_products,
        })
    }

    /// Drop trends unseen for 7 days and history older than 30 days.
    /// Returns (trending rows, history rows) removed.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let conn = self.conn.lock().await;
        let trending = conn
            .execute(
                "DELETE FROM trending_products WHERE last_seen < ?1",
                rusqlite::params![format_ts(now - Duration::days(7))],
            )
            .context("Failed to prune trending products")?;
        let history = conn
            .execute(
                "DELETE FROM product_history WHERE timestamp < ?1",
                rusqlite::params![format_ts(now - Duration::days(30))],
            )
            .context("Failed to prune product history")?;
        Ok((trending, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliexpress::fallback::sample_products;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_post_and_load() {
        let store = Store::open_in_memory().unwrap();
        let product = &sample_products("T", 1)[0];

        store
            .record_post(product, 72.5, "electronics", now())
            .await
            .unwrap();

        let record = store
            .posted_record(&product.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.posted_at, now());
        assert_eq!(record.clicks, 0);
        assert_eq!(record.conversion_score, 72.5);
        assert_eq!(record.title, product.title);

        assert!(store.posted_record("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repost_keeps_clicks() {
        let store = Store::open_in_memory().unwrap();
        let product = &sample_products("T", 1)[0];

        store.record_post(product, 50.0, "general", now()).await.unwrap();
        assert!(store.record_click(&product.product_id, now()).await.unwrap());
        store
            .record_post(product, 60.0, "general", now() + Duration::days(3))
            .await
            .unwrap();

        let record = store
            .posted_record(&product.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.clicks, 1);
        assert_eq!(record.conversion_score, 60.0);
    }

    #[tokio::test]
    async fn test_click_on_unknown_product_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.record_click("nope", now()).await.unwrap());
        assert_eq!(store.statistics(None).await.unwrap().total_clicks, 0);
    }

    #[tokio::test]
    async fn test_clicks_drive_trending_velocity() {
        let store = Store::open_in_memory().unwrap();
        let product = &sample_products("T", 1)[0];
        store.record_post(product, 50.0, "general", now()).await.unwrap();

        // One click two hours ago falls outside the velocity window
        store
            .record_click(&product.product_id, now() - Duration::hours(2))
            .await
            .unwrap();
        store.record_click(&product.product_id, now()).await.unwrap();
        store
            .record_click(&product.product_id, now() + Duration::minutes(1))
            .await
            .unwrap();

        let (score, velocity) = store
            .trending(&product.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(velocity, 2.0);
        assert_eq!(score, 20.0);
        assert_eq!(
            store
                .clicks_since(&product.product_id, now() - Duration::hours(24))
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_statistics_window() {
        let store = Store::open_in_memory().unwrap();
        let products = sample_products("T", 3);

        store
            .record_post(&products[0], 40.0, "general", now() - Duration::days(10))
            .await
            .unwrap();
        store.record_post(&products[1], 80.0, "general", now()).await.unwrap();
        store.record_post(&products[2], 60.0, "general", now()).await.unwrap();
        for _ in 0..3 {
            store.record_click(&products[2].product_id, now()).await.unwrap();
        }
        store.record_click(&products[1].product_id, now()).await.unwrap();

        let all = store.statistics(None).await.unwrap();
        assert_eq!(all.total_posts, 3);
        assert_eq!(all.total_clicks, 4);
        assert!((all.avg_score - 60.0).abs() < 1e-9);
        assert_eq!(all.top_products[0], (products[2].title.clone(), 3));

        let recent = store
            .statistics(Some(now() - Duration::days(1)))
            .await
            .unwrap();
        assert_eq!(recent.total_posts, 2);
        assert!((recent.avg_score - 70.0).abs() < 1e-9);
        assert!((recent.clicks_per_post() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_statistics() {
        let store = Store::open_in_memory().unwrap();
        let stats = store.statistics(None).await.unwrap();
        assert_eq!(stats, Statistics::default());
        assert_eq!(stats.clicks_per_post(), 0.0);
    }

    #[tokio::test]
    async fn test_cleanup_prunes_old_rows() {
        let store = Store::open_in_memory().unwrap();
        let product = &sample_products("T", 1)[0];

        store
            .record_post(product, 50.0, "general", now() - Duration::days(40))
            .await
            .unwrap();
        store
            .record_click(&product.product_id, now() - Duration::days(8))
            .await
            .unwrap();
        store.record_post(product, 50.0, "general", now()).await.unwrap();

        let (trending, history) = store.cleanup(now()).await.unwrap();
        assert_eq!(trending, 1);
        assert_eq!(history, 1);
        assert!(store.trending(&product.product_id).await.unwrap().is_none());
        assert_eq!(store.statistics(None).await.unwrap().total_posts, 1);
    }
}
