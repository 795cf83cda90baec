use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound accepted by `/frequency`, mirrored by config validation.
pub const MAX_POSTS_PER_HOUR: u32 = 50;

/// Paths served by the HTTP router that a webhook must not shadow.
const RESERVED_PATHS: [&str; 2] = ["/", "/health"];
const CLICK_PREFIX: &str = "/go/";

/// Accepted range for the polling conflict cooldown.
pub const MIN_CONFLICT_COOLDOWN_SECS: u64 = 300;
pub const MAX_CONFLICT_COOLDOWN_SECS: u64 = 600;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Polling,
    Webhook,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Polling => write!(f, "polling"),
            DeliveryMode::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub aliexpress: AliExpressConfig,
    #[serde(default)]
    pub posting: PostingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_memory_config")]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Only this user may drive the admin commands.
    #[serde(default)]
    pub admin_user_id: u64,
    /// Target channel, either `@name` or a numeric chat id.
    #[serde(default)]
    pub channel_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AliExpressConfig {
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_tracking_id")]
    pub tracking_id: String,
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
    #[serde(default = "default_min_commission_rate")]
    pub min_commission_rate: u32,
}

impl Default for AliExpressConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            app_secret: String::new(),
            tracking_id: default_tracking_id(),
            base_url: default_api_base_url(),
            country: default_country(),
            currency_symbol: default_currency_symbol(),
            min_commission_rate: default_min_commission_rate(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostingConfig {
    #[serde(default = "default_min_per_hour")]
    pub min_per_hour: u32,
    #[serde(default = "default_max_per_hour")]
    pub max_per_hour: u32,
    /// Local time (`HH:MM`) at which hourly planning starts.
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// Local time (`HH:MM`) after which no new hour is planned.
    #[serde(default = "default_end_time")]
    pub end_time: String,
    /// IANA timezone name, e.g. "America/Sao_Paulo".
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_peak_hours")]
    pub peak_hours: Vec<u32>,
    /// Search keywords sampled each hour.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Minimum discount (percent) for keyword search results.
    #[serde(default = "default_min_discount")]
    pub min_discount: f64,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            min_per_hour: default_min_per_hour(),
            max_per_hour: default_max_per_hour(),
            start_time: default_start_time(),
            end_time: default_end_time(),
            timezone: default_timezone(),
            peak_hours: default_peak_hours(),
            categories: default_categories(),
            min_discount: default_min_discount(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    /// Consecutive polling conflicts tolerated before backing off.
    #[serde(default = "default_conflict_threshold")]
    pub conflict_threshold: u32,
    /// How long polling is suspended once the threshold is hit.
    #[serde(default = "default_conflict_cooldown_secs")]
    pub conflict_cooldown_secs: u64,
    /// Defaults to `<server.public_url>/webhook` when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub secret_token: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::default(),
            conflict_threshold: default_conflict_threshold(),
            conflict_cooldown_secs: default_conflict_cooldown_secs(),
            webhook_url: None,
            secret_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Run the HTTP server even in polling mode.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL; enables click-tracking links.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_bind(),
            public_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        default_memory_config()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

fn default_tracking_id() -> String {
    "BOT_TELEGRAM".to_string()
}

fn default_api_base_url() -> String {
    "https://api-sg.aliexpress.com".to_string()
}

fn default_country() -> String {
    "BR".to_string()
}

fn default_currency_symbol() -> String {
    "R$".to_string()
}

fn default_min_commission_rate() -> u32 {
    5
}

fn default_min_per_hour() -> u32 {
    20
}

fn default_max_per_hour() -> u32 {
    25
}

fn default_start_time() -> String {
    "08:00".to_string()
}

fn default_end_time() -> String {
    "22:00".to_string()
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

fn default_peak_hours() -> Vec<u32> {
    vec![12, 13, 14, 20, 21]
}

fn default_categories() -> Vec<String> {
    [
        "electronics", "smartphone", "phone", "laptop", "tablet", "clothing", "fashion", "shoes",
        "bags", "accessories", "home", "kitchen", "decoration", "furniture", "garden", "beauty",
        "cosmetics", "skincare", "makeup", "health", "sports", "fitness", "outdoor", "camping",
        "automotive", "toys", "games", "kids", "baby", "pet",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_min_discount() -> f64 {
    30.0
}

fn default_conflict_threshold() -> u32 {
    3
}

fn default_conflict_cooldown_secs() -> u64 {
    300
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("promobot.db")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("bot.log")
}

fn default_memory_config() -> MemoryConfig {
    MemoryConfig {
        database_path: default_db_path(),
    }
}

/// Parse an `HH:MM` string.
pub fn parse_clock(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("Invalid time '{}', expected HH:MM", value))
}

impl PostingConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Unknown timezone '{}': {}", self.timezone, e))
    }

    /// Start and end hour of the posting window.
    pub fn window(&self) -> Result<(u32, u32)> {
        use chrono::Timelike;
        let start = parse_clock(&self.start_time)?;
        let end = parse_clock(&self.end_time)?;
        Ok((start.hour(), end.hour()))
    }

    /// Whether planning should run during `hour` (local time). A window whose
    /// start is after its end wraps past midnight.
    pub fn in_window(&self, hour: u32) -> Result<bool> {
        let (start, end) = self.window()?;
        Ok(if start <= end {
            start <= hour && hour < end
        } else {
            hour >= start || hour < end
        })
    }

    pub fn is_peak_hour(&self, hour: u32) -> bool {
        self.peak_hours.contains(&hour)
    }

    pub fn set_frequency(&mut self, min: u32, max: u32) -> Result<()> {
        validate_frequency(min, max)?;
        self.min_per_hour = min;
        self.max_per_hour = max;
        Ok(())
    }

    pub fn set_window(&mut self, start: &str, end: &str) -> Result<()> {
        let start = parse_clock(start)?;
        let end = parse_clock(end)?;
        if start == end {
            anyhow::bail!("Start and end time must differ");
        }
        self.start_time = start.format("%H:%M").to_string();
        self.end_time = end.format("%H:%M").to_string();
        Ok(())
    }

    /// Enable a search category. Returns false if it was already present.
    pub fn enable_category(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() || self.categories.iter().any(|c| *c == name) {
            return false;
        }
        self.categories.push(name);
        true
    }

    /// Disable a search category. Returns false if it was not present.
    pub fn disable_category(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        let before = self.categories.len();
        self.categories.retain(|c| *c != name);
        self.categories.len() != before
    }
}

pub fn validate_frequency(min: u32, max: u32) -> Result<()> {
    if min < 1 || max < min || max > MAX_POSTS_PER_HOUR {
        anyhow::bail!(
            "Invalid frequency {}-{}: need 1 <= min <= max <= {}",
            min,
            max,
            MAX_POSTS_PER_HOUR
        );
    }
    Ok(())
}

impl Config {
    /// Webhook URL to register, if one can be derived.
    pub fn webhook_url(&self) -> Option<String> {
        self.delivery.webhook_url.clone().or_else(|| {
            self.server
                .public_url
                .as_ref()
                .map(|base| format!("{}/webhook", base.trim_end_matches('/')))
        })
    }

    /// The HTTP server runs in webhook mode or when explicitly enabled.
    pub fn server_enabled(&self) -> bool {
        self.server.enabled || self.delivery.mode == DeliveryMode::Webhook
    }

    /// Warning to log once logging is up, when `path` does not exist.
    pub fn missing_file_notice(path: &Path) -> Option<String> {
        (!path.exists()).then(|| {
            format!(
                "Config file {} not found, using defaults and environment",
                path.display()
            )
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        // A missing .env is fine; hosted deployments inject variables directly.
        let _ = dotenvy::dotenv();

        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment. `lookup` is injectable for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = lookup("CHANNEL_ID") {
            self.telegram.channel_id = v;
        }
        if let Some(v) = lookup("ADMIN_USER_ID") {
            self.telegram.admin_user_id = v
                .trim()
                .parse()
                .with_context(|| format!("ADMIN_USER_ID is not a number: {}", v))?;
        }
        if let Some(v) = lookup("APP_KEY") {
            self.aliexpress.app_key = v;
        }
        if let Some(v) = lookup("APP_SECRET") {
            self.aliexpress.app_secret = v;
        }
        if let Some(v) = lookup("TRACKING_ID") {
            self.aliexpress.tracking_id = v;
        }
        if let Some(v) = lookup("TIMEZONE") {
            self.posting.timezone = v;
        }
        if let Some(v) = lookup("PUBLIC_URL") {
            self.server.public_url = Some(v);
        }
        if let Some(v) = lookup("PORT") {
            let port: u16 = v
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port: {}", v))?;
            self.server.bind = format!("0.0.0.0:{}", port);
            self.server.enabled = true;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            anyhow::bail!("telegram.bot_token is not set (or BOT_TOKEN)");
        }
        if self.telegram.channel_id.is_empty() {
            anyhow::bail!("telegram.channel_id is not set (or CHANNEL_ID)");
        }
        if self.telegram.admin_user_id == 0 {
            anyhow::bail!("telegram.admin_user_id is not set (or ADMIN_USER_ID)");
        }
        validate_frequency(self.posting.min_per_hour, self.posting.max_per_hour)?;
        self.posting.window()?;
        self.posting.tz()?;
        if !(MIN_CONFLICT_COOLDOWN_SECS..=MAX_CONFLICT_COOLDOWN_SECS)
            .contains(&self.delivery.conflict_cooldown_secs)
        {
            anyhow::bail!(
                "delivery.conflict_cooldown_secs must be between {} and {}",
                MIN_CONFLICT_COOLDOWN_SECS,
                MAX_CONFLICT_COOLDOWN_SECS
            );
        }
        if self.delivery.mode == DeliveryMode::Webhook {
            let url = self
                .webhook_url()
                .context("webhook mode needs delivery.webhook_url or server.public_url")?;
            let parsed = reqwest::Url::parse(&url)
                .with_context(|| format!("Invalid webhook URL '{}'", url))?;
            let path = parsed.path();
            if RESERVED_PATHS.contains(&path) || path == "/go" || path.starts_with(CLICK_PREFIX) {
                anyhow::bail!("webhook URL path '{}' clashes with a built-in route", path);
            }
        }
        Ok(())
    }
}
