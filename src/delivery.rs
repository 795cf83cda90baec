//! Ownership of the update stream.
//!
//! Telegram lets exactly one consumer read a bot's updates. In polling mode
//! a second process polling with the same token makes both receive
//! `Conflict: terminated by other getUpdates request`. This module keeps the
//! startup sequence explicit (delete webhook, start polling, confirm
//! identity), backs off when conflicts keep coming, and holds a host-local
//! lock file so the same machine never runs two pollers.

use std::fs::OpenOptions;
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use teloxide::dispatching::DefaultKey;
use teloxide::error_handlers::{ErrorHandler, LoggingErrorHandler};
use teloxide::prelude::*;
use teloxide::update_listeners::{webhooks, Polling};
use teloxide::{ApiError, RequestError};
use tracing::{error, info, warn};

use crate::config::{Config, DeliveryMode};

/// Conflicts further apart than this are not counted as consecutive.
const CONFLICT_WINDOW: Duration = Duration::from_secs(120);
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

pub fn is_conflict(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Retry,
    CoolDown(Duration),
}

#[derive(Debug, Default)]
struct ConflictState {
    consecutive: u32,
    last: Option<Instant>,
}

/// Counts polling conflicts and decides when to stop hammering getUpdates.
#[derive(Debug)]
pub struct ConflictGuard {
    threshold: u32,
    cooldown: Duration,
    state: std::sync::Mutex<ConflictState>,
}

impl ConflictGuard {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: std::sync::Mutex::new(ConflictState::default()),
        }
    }

    pub fn record_conflict(&self, now: Instant) -> ConflictAction {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state
            .last
            .is_some_and(|last| now.duration_since(last) > CONFLICT_WINDOW)
        {
            state.consecutive = 0;
        }
        state.consecutive += 1;
        state.last = Some(now);

        if state.consecutive >= self.threshold {
            state.consecutive = 0;
            ConflictAction::CoolDown(self.cooldown)
        } else {
            ConflictAction::Retry
        }
    }

    /// Updates are flowing again.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = ConflictState::default();
        }
    }
}

impl ErrorHandler<RequestError> for ConflictGuard {
    fn handle_error(self: Arc<Self>, error: RequestError) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !is_conflict(&error) {
                error!("Polling error: {}", error);
                return;
            }
            error!("Conflict: terminated by other getUpdates request");
            if let ConflictAction::CoolDown(wait) = self.record_conflict(Instant::now()) {
                warn!(
                    "Another instance is polling with this token; pausing polling for {}s. \
                     Stop the other instance or switch delivery.mode to \"webhook\".",
                    wait.as_secs()
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        info!("Resuming polling after conflict cooldown")
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Conflict cooldown interrupted by shutdown")
                    }
                }
            }
        })
    }
}

/// Lock file holding the PID of the process that owns the update stream.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

fn pid_alive(pid: u32) -> bool {
    let proc = Path::new("/proc");
    // Without procfs liveness cannot be checked; assume the holder is alive.
    if !proc.exists() {
        return true;
    }
    proc.join(pid.to_string()).exists()
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

impl InstanceLock {
    pub fn path_for(database: &Path) -> PathBuf {
        let mut name = database.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Create the lock file atomically. An existing lock of a dead process
    /// is removed and creation retried once.
    pub fn acquire(path: &Path) -> Result<Self> {
        let own = std::process::id();
        for attempt in 0..2 {
            match Self::create(path, own) {
                Ok(()) => {
                    info!("Instance lock acquired: {}", path.display());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt == 0 => {
                    Self::clear_stale(path, own)?;
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create lock file {}", path.display()))
                }
            }
        }
        bail!("Lock file {} was recreated by another process", path.display())
    }

    fn create(path: &Path, pid: u32) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(pid.to_string().as_bytes())?;
        file.sync_all()
    }

    fn clear_stale(path: &Path, own: u32) -> Result<()> {
        let holder = read_pid(path);
        match holder {
            Some(pid) if pid != own && pid_alive(pid) => bail!(
                "Another instance (PID {}) is already running (lock file {})",
                pid,
                path.display()
            ),
            Some(pid) if pid != own => {
                warn!("Replacing stale lock file {} (PID {})", path.display(), pid)
            }
            Some(_) => {}
            None => warn!("Replacing unreadable lock file {}", path.display()),
        }

        // Another starter may have replaced it in the meantime
        if read_pid(path) != holder {
            bail!("Lock file {} changed while being inspected", path.display());
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove stale lock file {}", path.display())),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if read_pid(&self.path) != Some(std::process::id()) {
            warn!("Lock file {} no longer ours, leaving it", self.path.display());
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Could not remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Identity check against the Bot API.
async fn confirm_identity(bot: &Bot) -> Result<()> {
    let me = bot.get_me().await.context("getMe failed")?;
    info!(
        "Bot identity confirmed: @{} (id {})",
        me.user.username.as_deref().unwrap_or("unknown"),
        me.user.id
    );
    Ok(())
}

/// Own the update stream until shutdown.
///
/// `on_ready` runs once the bot identity is confirmed, before the first
/// update is handled. `app` is extra HTTP routes served next to the webhook
/// (or on their own in polling mode when the server is enabled).
pub async fn run<F>(
    bot: Bot,
    mut dispatcher: Dispatcher<Bot, RequestError, DefaultKey>,
    guard: Arc<ConflictGuard>,
    config: &Config,
    app: axum::Router,
    on_ready: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid server bind address '{}'", config.server.bind))?;

    match config.delivery.mode {
        DeliveryMode::Polling => {
            match bot.delete_webhook().drop_pending_updates(true).await {
                Ok(_) => info!("Webhook deleted"),
                Err(e) => warn!("Failed to delete webhook (may not exist): {}", e),
            }

            let listener = Polling::builder(bot.clone()).timeout(POLL_TIMEOUT).build();
            info!("Polling started");
            confirm_identity(&bot).await?;
            on_ready.await;

            if config.server_enabled() {
                let tcp = tokio::net::TcpListener::bind(bind)
                    .await
                    .with_context(|| format!("Failed to bind {}", bind))?;
                info!("HTTP server listening on {}", bind);
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(tcp, app).await {
                        error!("HTTP server stopped: {}", e);
                    }
                });
            }

            dispatcher
                .try_dispatch_with_listener(listener, guard)
                .await
                .context("Failed to start polling dispatcher")?;
        }
        DeliveryMode::Webhook => {
            let url = config
                .webhook_url()
                .context("Webhook mode needs delivery.webhook_url or server.public_url")?;
            let url = reqwest::Url::parse(&url)
                .with_context(|| format!("Invalid webhook URL '{}'", url))?;

            let mut options = webhooks::Options::new(bind, url.clone()).drop_pending_updates();
            if let Some(secret) = &config.delivery.secret_token {
                options = options.secret_token(secret.clone());
            }

            let (listener, stop_flag, router) = webhooks::axum_to_router(bot.clone(), options)
                .await
                .context("Failed to register webhook")?;
            info!("Webhook registered at {}", url);
            confirm_identity(&bot).await?;
            on_ready.await;

            let tcp = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("Failed to bind {}", bind))?;
            info!("HTTP server listening on {}", bind);
            let app = app.merge(router);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(tcp, app)
                    .with_graceful_shutdown(stop_flag)
                    .await
                {
                    error!("HTTP server stopped: {}", e);
                }
            });

            dispatcher
                .try_dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("Webhook listener error"),
                )
                .await
                .context("Failed to start webhook dispatcher")?;
        }
    }

    info!("Update delivery stopped");
    Ok(())
}
