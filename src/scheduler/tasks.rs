use std::sync::Arc;

use chrono::{Duration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

use crate::scheduler::posting::PostingScheduler;
use crate::scheduler::Scheduler;
use crate::store::Store;

/// Local hour at which the daily report is logged.
const REPORT_HOUR: u32 = 2;

/// Register the recurring jobs: hourly planning, store cleanup and the
/// daily report.
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    posting: Arc<PostingScheduler>,
    store: Store,
    tz: Tz,
) -> anyhow::Result<()> {
    scheduler
        .add_cron_job("0 0 * * * *", "hourly_planning", move || {
            let posting = Arc::clone(&posting);
            Box::pin(async move {
                if let Err(e) = posting.plan_hour().await {
                    error!("Hourly planning failed: {:#}", e);
                }
            })
        })
        .await?;

    let cleanup_store = store.clone();
    scheduler
        .add_cron_job("0 0 */6 * * *", "cleanup", move || {
            let store = cleanup_store.clone();
            Box::pin(async move {
                match store.cleanup(Utc::now()).await {
                    Ok((trending, history)) => info!(
                        "Cleanup removed {} trending and {} history rows",
                        trending, history
                    ),
                    Err(e) => error!("Cleanup failed: {:#}", e),
                }
            })
        })
        .await?;

    // Cron runs in UTC; the hour check pins the report to local 02:00.
    scheduler
        .add_cron_job("0 0 * * * *", "daily_report", move || {
            let store = store.clone();
            Box::pin(async move {
                let now = Utc::now();
                if now.with_timezone(&tz).hour() != REPORT_HOUR {
                    return;
                }
                match store.statistics(Some(now - Duration::days(1))).await {
                    Ok(stats) => info!(
                        "Daily report: {} posts, {} clicks, avg score {:.1}, {:.2} clicks/post",
                        stats.total_posts,
                        stats.total_clicks,
                        stats.avg_score,
                        stats.clicks_per_post()
                    ),
                    Err(e) => error!("Daily report failed: {:#}", e),
                }
            })
        })
        .await?;

    Ok(())
}
