pub mod planner;
pub mod posting;
pub mod tasks;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Wrapper around tokio-cron-scheduler for background tasks
#[derive(Clone)]
pub struct Scheduler {
    inner: JobScheduler,
}

impl Scheduler {
    /// Create a new scheduler
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self { inner })
    }

    /// Add a recurring cron job
    pub async fn add_cron_job<F>(&self, cron_expr: &str, name: &str, task: F) -> Result<Uuid>
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        let job_name = name.to_string();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let name = job_name.clone();
            let fut = task();
            Box::pin(async move {
                info!("Running scheduled task: {}", name);
                fut.await;
            })
        })
        .with_context(|| format!("Failed to create cron job: {}", name))?;

        let id = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;

        info!("Scheduled task '{}' with cron: {}", name, cron_expr);
        Ok(id)
    }

    /// Run `task` once after `delay`.
    pub async fn add_one_shot<F>(&self, delay: Duration, name: &str, task: F) -> Result<Uuid>
    where
        F: FnOnce() -> TaskFuture + Send + Sync + 'static,
    {
        // new_one_shot_async wants a FnMut; the Option makes the task single-use.
        let mut task = Some(task);
        let job = Job::new_one_shot_async(delay, move |_uuid, _lock| match task.take() {
            Some(task) => task(),
            None => Box::pin(async {}),
        })
        .with_context(|| format!("Failed to create one-shot job: {}", name))?;

        let id = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;
        debug!("One-shot job '{}' in {:?}", name, delay);
        Ok(id)
    }

    /// Cancel a job. Removing a job that already ran is not an error.
    pub async fn remove(&self, id: &Uuid) -> Result<()> {
        self.inner
            .remove(id)
            .await
            .with_context(|| format!("Failed to remove job {}", id))
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.clone();
        inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
