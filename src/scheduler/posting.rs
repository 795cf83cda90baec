use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Timelike, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aliexpress::{Product, ProductSource};
use crate::config::PostingConfig;
use crate::poster::{truncate_chars, PublishOutcome, Publisher};
use crate::ranking::Ranker;
use crate::scheduler::planner::{dedup_products, hourly_target, pick_categories, post_delays};
use crate::scheduler::Scheduler;

const HOT_LIMIT: usize = 30;
const SEARCH_LIMIT: usize = 20;

struct PendingPost {
    job: Uuid,
    at: DateTime<Utc>,
    product_id: String,
}

#[derive(Default)]
struct HourState {
    label: Option<String>,
    target: u32,
    posted: u32,
    posted_ids: HashSet<String>,
    pending: Vec<PendingPost>,
}

/// Snapshot of the current posting hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyStats {
    pub hour: Option<String>,
    pub target: u32,
    pub posted: u32,
    pub pending: usize,
}

impl HourlyStats {
    pub fn progress_percent(&self) -> f64 {
        if self.target == 0 {
            0.0
        } else {
            self.posted as f64 / self.target as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostingStatus {
    pub active: bool,
    pub posting: PostingConfig,
    pub hourly: HourlyStats,
    pub next_post: Option<DateTime<Utc>>,
}

/// Plans each hour's posts and fires them as one-shot jobs.
pub struct PostingScheduler {
    scheduler: Scheduler,
    source: Arc<dyn ProductSource>,
    ranker: Arc<Ranker>,
    publisher: Arc<dyn Publisher>,
    posting: Arc<RwLock<PostingConfig>>,
    state: Mutex<HourState>,
    /// Held for a whole plan so overlapping plans cannot lose each other's jobs.
    planning: Mutex<()>,
}

impl PostingScheduler {
    pub fn new(
        scheduler: Scheduler,
        source: Arc<dyn ProductSource>,
        ranker: Arc<Ranker>,
        publisher: Arc<dyn Publisher>,
        posting: Arc<RwLock<PostingConfig>>,
    ) -> Self {
        Self {
            scheduler,
            source,
            ranker,
            publisher,
            posting,
            state: Mutex::new(HourState::default()),
            planning: Mutex::new(()),
        }
    }

    /// Plan the hour that is already running.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let planned = self.plan_hour().await?;
        info!("Posting scheduler started ({} posts planned)", planned);
        Ok(())
    }

    pub async fn plan_hour(self: &Arc<Self>) -> Result<usize> {
        self.plan_hour_at(Utc::now()).await
    }

    /// Replace the current plan with one for the hour containing `now`.
    pub async fn plan_hour_at(self: &Arc<Self>, now: DateTime<Utc>) -> Result<usize> {
        let _planning = self.planning.lock().await;
        let posting = self.posting.read().await.clone();
        let tz = posting.tz()?;
        let local = now.with_timezone(&tz);
        let hour = local.hour();

        let leftover = self.cancel_pending().await;
        if leftover > 0 {
            debug!("Dropped {} unsent posts from the previous hour", leftover);
        }
        {
            let mut state = self.state.lock().await;
            *state = HourState {
                label: Some(format!("{:02}:00", hour)),
                ..HourState::default()
            };
        }

        if !posting.in_window(hour)? {
            info!(
                "Outside posting window ({} - {}), nothing planned for {:02}:00",
                posting.start_time, posting.end_time, hour
            );
            return Ok(0);
        }
        if !self.publisher.is_active() {
            info!("Posting paused, nothing planned for {:02}:00", hour);
            return Ok(0);
        }

        let (target, categories) = {
            let mut rng = rand::thread_rng();
            (
                hourly_target(&mut rng, &posting, hour),
                pick_categories(&mut rng, &posting.categories),
            )
        };
        info!(
            "Planning {} posts for {:02}:00 (categories: {})",
            target,
            hour,
            categories.join(", ")
        );

        let products = self.collect_products(&categories, posting.min_discount).await;
        let ranked = self.ranker.top_products(products, target as usize, now).await;
        if ranked.is_empty() {
            warn!("No products available for {:02}:00", hour);
            return Ok(0);
        }

        let elapsed = local.minute() * 60 + local.second();
        let remaining = 3600u64.saturating_sub(elapsed as u64);
        let delays = {
            let mut rng = rand::thread_rng();
            post_delays(&mut rng, ranked.len(), remaining)
        };

        let mut pending = Vec::with_capacity(ranked.len());
        for ((product, score), delay) in ranked.into_iter().zip(delays) {
            let at = now + chrono::Duration::from_std(delay).context("Post delay out of range")?;
            let product_id = product.product_id.clone();
            let title = truncate_chars(&product.title, 50);
            let this = Arc::clone(self);
            let job = self
                .scheduler
                .add_one_shot(delay, "post", move || {
                    Box::pin(async move {
                        this.execute_post(product, score).await;
                    })
                })
                .await?;
            info!(
                "Post scheduled for {}: {}",
                at.with_timezone(&tz).format("%H:%M:%S"),
                title
            );
            pending.push(PendingPost {
                job,
                at,
                product_id,
            });
        }

        let count = pending.len();
        let mut state = self.state.lock().await;
        state.target = count as u32;
        state.pending = pending;
        Ok(count)
    }

    async fn collect_products(&self, categories: &[String], min_discount: f64) -> Vec<Product> {
        let searches = categories
            .iter()
            .map(|category| self.source.search_products(category, min_discount, SEARCH_LIMIT));
        let (mut products, found) = futures::join!(
            self.source.hot_products(HOT_LIMIT),
            futures::future::join_all(searches)
        );

        for (category, list) in categories.iter().zip(found) {
            debug!("Category '{}': {} products", category, list.len());
            products.extend(list);
        }
        dedup_products(products)
    }

    /// Body of a one-shot post job.
    pub async fn execute_post(&self, product: Product, score: f64) {
        {
            let mut state = self.state.lock().await;
            state.pending.retain(|p| p.product_id != product.product_id);
            if state.posted_ids.contains(&product.product_id) {
                debug!("Already posted this hour: {}", product.product_id);
                return;
            }
        }
        if !self.publisher.is_active() {
            info!("Posting paused, skipping {}", product.product_id);
            return;
        }

        match self.publisher.publish(&product, Some(score)).await {
            Ok(PublishOutcome::Posted) => {
                let mut state = self.state.lock().await;
                state.posted += 1;
                state.posted_ids.insert(product.product_id.clone());
                info!(
                    "Post executed ({}/{}): {}",
                    state.posted, state.target, product.product_id
                );
            }
            Ok(PublishOutcome::Paused) => {
                info!("Posting paused, skipping {}", product.product_id)
            }
            Err(e) => error!("Post failed for {}: {:#}", product.product_id, e),
        }
    }

    /// Publish right away, outside the hourly plan.
    pub async fn force_post(&self, product: &Product) -> Result<PublishOutcome> {
        let score = self.ranker.score(product, Utc::now()).await.ok();
        let outcome = self.publisher.publish(product, score).await?;
        if outcome == PublishOutcome::Posted {
            let mut state = self.state.lock().await;
            state.posted_ids.insert(product.product_id.clone());
            info!("Forced post executed: {}", product.product_id);
        }
        Ok(outcome)
    }

    async fn cancel_pending(&self) -> usize {
        let pending = std::mem::take(&mut self.state.lock().await.pending);
        let count = pending.len();
        for post in pending {
            if let Err(e) = self.scheduler.remove(&post.job).await {
                warn!("Could not cancel post of {}: {:#}", post.product_id, e);
            }
        }
        count
    }

    /// Cancel every pending post of the current hour.
    pub async fn emergency_stop(&self) -> usize {
        let cancelled = self.cancel_pending().await;
        warn!("Emergency stop: {} pending posts cancelled", cancelled);
        cancelled
    }

    pub async fn hourly_stats(&self) -> HourlyStats {
        let state = self.state.lock().await;
        HourlyStats {
            hour: state.label.clone(),
            target: state.target,
            posted: state.posted,
            pending: state.pending.len(),
        }
    }

    pub async fn status(&self) -> PostingStatus {
        let next_post = {
            let state = self.state.lock().await;
            state.pending.iter().map(|p| p.at).min()
        };
        PostingStatus {
            active: self.publisher.is_active(),
            posting: self.posting.read().await.clone(),
            hourly: self.hourly_stats().await,
            next_post,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliexpress::fallback::sample_products;
    use crate::store::Store;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeSource {
        latency: Duration,
    }

    #[async_trait]
    impl ProductSource for FakeSource {
        async fn hot_products(&self, limit: usize) -> Vec<Product> {
            tokio::time::sleep(self.latency).await;
            sample_products("T", limit)
        }

        async fn search_products(&self, keywords: &str, _: f64, _: usize) -> Vec<Product> {
            if keywords == "broken" {
                return Vec::new();
            }
            sample_products("T", 2)
        }

        async fn product_details(&self, _: &str) -> Result<Option<Product>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        paused: AtomicBool,
        sent: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        fn is_active(&self) -> bool {
            !self.paused.load(Ordering::SeqCst)
        }

        async fn publish(&self, product: &Product, _: Option<f64>) -> Result<PublishOutcome> {
            self.sent.lock().unwrap().push(product.product_id.clone());
            Ok(PublishOutcome::Posted)
        }
    }

    async fn setup(posting: PostingConfig) -> (Arc<PostingScheduler>, Arc<FakePublisher>) {
        let (posting, publisher, _) = setup_with(posting, Duration::ZERO).await;
        (posting, publisher)
    }

    async fn setup_with(
        posting: PostingConfig,
        latency: Duration,
    ) -> (Arc<PostingScheduler>, Arc<FakePublisher>, Scheduler) {
        let store = Store::open_in_memory().unwrap();
        let publisher = Arc::new(FakePublisher::default());
        let jobs = Scheduler::new().await.unwrap();
        let scheduler = PostingScheduler::new(
            jobs.clone(),
            Arc::new(FakeSource { latency }),
            Arc::new(Ranker::new(store)),
            publisher.clone(),
            Arc::new(RwLock::new(posting)),
        );
        (Arc::new(scheduler), publisher, jobs)
    }

    fn utc_posting() -> PostingConfig {
        PostingConfig {
            timezone: "UTC".to_string(),
            categories: vec!["phone".to_string(), "broken".to_string(), "watch".to_string()],
            ..PostingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_plan_outside_window_is_empty() {
        let (posting, _) = setup(utc_posting()).await;
        let night = Utc.with_ymd_and_hms(2026, 5, 10, 3, 0, 0).unwrap();
        assert_eq!(posting.plan_hour_at(night).await.unwrap(), 0);
        assert_eq!(posting.hourly_stats().await.hour.as_deref(), Some("03:00"));
    }

    #[tokio::test]
    async fn test_plan_schedules_unique_products() {
        let (posting, _) = setup(utc_posting()).await;
        let afternoon = Utc.with_ymd_and_hms(2026, 5, 10, 15, 30, 0).unwrap();

        // Only five distinct sample products exist, below any hourly target
        let planned = posting.plan_hour_at(afternoon).await.unwrap();
        assert_eq!(planned, 5);

        let status = posting.status().await;
        assert_eq!(status.hourly.target, 5);
        assert_eq!(status.hourly.pending, 5);
        let next = status.next_post.unwrap();
        assert!(next >= afternoon && next < afternoon + chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn test_emergency_stop_cancels_pending() {
        let (posting, _) = setup(utc_posting()).await;
        let afternoon = Utc.with_ymd_and_hms(2026, 5, 10, 15, 0, 0).unwrap();
        posting.plan_hour_at(afternoon).await.unwrap();

        assert_eq!(posting.emergency_stop().await, 5);
        assert_eq!(posting.hourly_stats().await.pending, 0);
        assert!(posting.status().await.next_post.is_none());
    }

    #[tokio::test]
    async fn test_execute_post_counts_once_per_product() {
        let (posting, publisher) = setup(utc_posting()).await;
        let afternoon = Utc.with_ymd_and_hms(2026, 5, 10, 15, 0, 0).unwrap();
        posting.plan_hour_at(afternoon).await.unwrap();

        let product = sample_products("T", 1).remove(0);
        posting.execute_post(product.clone(), 50.0).await;
        posting.execute_post(product, 50.0).await;

        let stats = posting.hourly_stats().await;
        assert_eq!(stats.posted, 1);
        assert_eq!(stats.pending, 4);
        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
        assert!((stats.progress_percent() - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_paused_publisher_skips_posts() {
        let (posting, publisher) = setup(utc_posting()).await;
        publisher.paused.store(true, Ordering::SeqCst);

        let afternoon = Utc.with_ymd_and_hms(2026, 5, 10, 15, 0, 0).unwrap();
        assert_eq!(posting.plan_hour_at(afternoon).await.unwrap(), 0);

        posting
            .execute_post(sample_products("T", 1).remove(0), 10.0)
            .await;
        assert!(publisher.sent.lock().unwrap().is_empty());
        assert_eq!(posting.hourly_stats().await.posted, 0);
    }

    #[tokio::test]
    async fn test_overlapping_plans_leave_nothing_after_stop() {
        let (posting, publisher, jobs) =
            setup_with(utc_posting(), Duration::from_millis(200)).await;
        // Three seconds left in the hour, so every post is due within 2s
        let late = Utc.with_ymd_and_hms(2026, 5, 10, 15, 59, 57).unwrap();

        let (a, b) = tokio::join!(posting.plan_hour_at(late), posting.plan_hour_at(late));
        assert_eq!(a.unwrap(), 5);
        assert_eq!(b.unwrap(), 5);
        assert_eq!(posting.hourly_stats().await.pending, 5);

        assert_eq!(posting.emergency_stop().await, 5);
        jobs.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        jobs.shutdown().await.unwrap();

        assert!(publisher.sent.lock().unwrap().is_empty());
        assert_eq!(posting.hourly_stats().await.posted, 0);
    }
}
