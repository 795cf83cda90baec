//! Plain-text renderings of bot state for admin replies.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::aliexpress::Product;
use crate::config::PostingConfig;
use crate::poster::truncate_chars;
use crate::scheduler::posting::{HourlyStats, PostingStatus};
use crate::store::Statistics;

pub const TOGGLE_STATUS: &str = "toggle_status";
pub const SHOW_STATS: &str = "show_stats";
pub const SHOW_CONFIG: &str = "show_config";
pub const SHOW_LOGS: &str = "show_logs";
pub const POST_FIRST: &str = "post_first:";
pub const ANNOUNCE_POST: &str = "announce_post";
pub const ANNOUNCE_CANCEL: &str = "announce_cancel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Week,
    Month,
    All,
}

impl Period {
    /// Unknown arguments fall back to all-time figures.
    pub fn parse(arg: &str) -> Self {
        match arg.trim().to_lowercase().as_str() {
            "" | "today" => Period::Today,
            "week" => Period::Week,
            "month" => Period::Month,
            _ => Period::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Today => "Today",
            Period::Week => "Last 7 days",
            Period::Month => "Last 30 days",
            Period::All => "All time",
        }
    }

    /// Start of the period; `Today` begins at local midnight.
    pub fn since(self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Period::Today => {
                let midnight = now.with_timezone(&tz).date_naive().and_hms_opt(0, 0, 0)?;
                tz.from_local_datetime(&midnight)
                    .earliest()
                    .map(|t| t.with_timezone(&Utc))
            }
            Period::Week => Some(now - Duration::days(7)),
            Period::Month => Some(now - Duration::days(30)),
            Period::All => None,
        }
    }
}

/// `"<min> <max>"` from `/frequency`.
pub fn parse_frequency(args: &str) -> Result<(u32, u32)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        bail!("Usage: /frequency <min> <max>\nExample: /frequency 20 25");
    }
    let min = parts[0]
        .parse()
        .with_context(|| format!("'{}' is not a whole number", parts[0]))?;
    let max = parts[1]
        .parse()
        .with_context(|| format!("'{}' is not a whole number", parts[1]))?;
    Ok((min, max))
}

/// `"<start> <end>"` from `/hours`.
pub fn parse_hours(args: &str) -> Result<(String, String)> {
    match args.split_whitespace().collect::<Vec<_>>().as_slice() {
        [start, end] => Ok((start.to_string(), end.to_string())),
        _ => bail!("Usage: /hours <start> <end>\nExample: /hours 08:00 22:00"),
    }
}

pub fn control_keyboard(active: bool) -> InlineKeyboardMarkup {
    let toggle = if active { "⏸️ Pause" } else { "▶️ Resume" };
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback(toggle, TOGGLE_STATUS),
            InlineKeyboardButton::callback("📊 Statistics", SHOW_STATS),
        ],
        vec![
            InlineKeyboardButton::callback("🔧 Settings", SHOW_CONFIG),
            InlineKeyboardButton::callback("📋 Logs", SHOW_LOGS),
        ],
    ])
}

pub fn announce_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Post to channel", ANNOUNCE_POST),
        InlineKeyboardButton::callback("❌ Cancel", ANNOUNCE_CANCEL),
    ]])
}

pub fn post_first_keyboard(product_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "📤 Post first product",
        format!("{}{}", POST_FIRST, product_id),
    )]])
}

fn hourly_line(hourly: &HourlyStats) -> String {
    match &hourly.hour {
        Some(hour) => format!(
            "Hour {}: {}/{} posted ({:.0}%), {} pending",
            hour,
            hourly.posted,
            hourly.target,
            hourly.progress_percent(),
            hourly.pending
        ),
        None => "No hour planned yet".to_string(),
    }
}

pub fn status_text(
    status: &PostingStatus,
    stats: &Statistics,
    channel: &str,
    now: DateTime<Utc>,
) -> String {
    let tz: Tz = status.posting.tz().unwrap_or(Tz::UTC);
    let state = if status.active { "🟢 Active" } else { "🔴 Paused" };
    let next = status
        .next_post
        .map(|t| t.with_timezone(&tz).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "none".to_string());

    format!(
        "🤖 Bot status\n\
         \n\
         State: {state}\n\
         \n\
         📊 Settings:\n\
         • Posts/hour: {min}-{max}\n\
         • Hours: {start} - {end}\n\
         • Timezone: {timezone}\n\
         • Channel: {channel}\n\
         \n\
         ⏱️ {hourly}\n\
         Next post: {next}\n\
         \n\
         📈 Statistics:\n\
         • Total posts: {posts}\n\
         • Total clicks: {clicks}\n\
         • Average score: {score:.1}\n\
         \n\
         🕐 Updated: {updated}",
        state = state,
        min = status.posting.min_per_hour,
        max = status.posting.max_per_hour,
        start = status.posting.start_time,
        end = status.posting.end_time,
        timezone = status.posting.timezone,
        channel = channel,
        hourly = hourly_line(&status.hourly),
        next = next,
        posts = stats.total_posts,
        clicks = stats.total_clicks,
        score = stats.avg_score,
        updated = now.with_timezone(&tz).format("%d/%m/%Y %H:%M:%S"),
    )
}

pub fn stats_text(period: Period, stats: &Statistics) -> String {
    let mut text = format!(
        "📊 Statistics - {}\n\
         \n\
         📈 Overall:\n\
         • Posts: {}\n\
         • Clicks: {}\n\
         • Average score: {:.1}/100\n\
         • Engagement: {:.2} clicks/post\n\
         \n\
         🏆 Top clicked products:",
        period.label(),
        stats.total_posts,
        stats.total_clicks,
        stats.avg_score,
        stats.clicks_per_post()
    );
    if stats.top_products.is_empty() {
        text.push_str("\nNo clicks recorded yet.");
    }
    for (i, (title, clicks)) in stats.top_products.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} - {} clicks",
            i + 1,
            truncate_chars(title, 50),
            clicks
        ));
    }
    text
}

pub fn config_text(posting: &PostingConfig, tracking_id: &str, channel: &str) -> String {
    format!(
        "🔧 Current settings\n\
         \n\
         📊 Posting:\n\
         • Posts/hour: {}-{}\n\
         • Hours: {} - {}\n\
         • Timezone: {}\n\
         • Peak hours: {}\n\
         • Minimum discount: {:.0}%\n\
         • Categories: {}\n\
         \n\
         🔗 API:\n\
         • Tracking ID: {}\n\
         • Channel: {}",
        posting.min_per_hour,
        posting.max_per_hour,
        posting.start_time,
        posting.end_time,
        posting.timezone,
        posting
            .peak_hours
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        posting.min_discount,
        posting.categories.len(),
        tracking_id,
        channel
    )
}

pub fn search_text(term: &str, products: &[Product], currency: &str) -> String {
    let mut text = format!(
        "🔍 Results for '{}'\n\nFound {} products:",
        term,
        products.len()
    );
    for (i, p) in products.iter().take(5).enumerate() {
        text.push_str(&format!(
            "\n{}. {}\n   💰 {} {:.2} | 🎯 {:.0}% off",
            i + 1,
            truncate_chars(&p.title, 50),
            currency,
            p.sale_price,
            p.discount
        ));
    }
    text
}

pub fn api_test_text(products: &[Product], tracking_id: &str) -> String {
    let mut text = format!(
        "✅ API test succeeded\n\
         \n\
         Connection: OK\n\
         Products found: {}\n\
         Tracking ID: {}\n\
         \n\
         Sample products:",
        products.len(),
        tracking_id
    );
    for (i, p) in products.iter().take(3).enumerate() {
        text.push_str(&format!(
            "\n{}. {} - {:.0}% off",
            i + 1,
            truncate_chars(&p.title, 40),
            p.discount
        ));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliexpress::fallback::sample_products;

    #[test]
    fn test_period_parsing() {
        assert_eq!(Period::parse(""), Period::Today);
        assert_eq!(Period::parse("WEEK"), Period::Week);
        assert_eq!(Period::parse("month"), Period::Month);
        assert_eq!(Period::parse("whatever"), Period::All);
    }

    #[test]
    fn test_today_starts_at_local_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 5, 10, 15, 0, 0).unwrap();
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        // Sao Paulo is UTC-3, so local midnight is 03:00 UTC
        assert_eq!(
            Period::Today.since(now, tz),
            Some(Utc.with_ymd_and_hms(2026, 5, 10, 3, 0, 0).unwrap())
        );
        assert_eq!(
            Period::Week.since(now, tz),
            Some(now - Duration::days(7))
        );
        assert_eq!(Period::All.since(now, tz), None);
    }

    #[test]
    fn test_parse_frequency() {
        assert_eq!(parse_frequency("15 20").unwrap(), (15, 20));
        assert!(parse_frequency("15").is_err());
        assert!(parse_frequency("a b").is_err());
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(
            parse_hours(" 08:00   22:00 ").unwrap(),
            ("08:00".to_string(), "22:00".to_string())
        );
        assert!(parse_hours("08:00").is_err());
    }

    #[test]
    fn test_stats_text_lists_top_products() {
        let stats = Statistics {
            total_posts: 4,
            total_clicks: 10,
            avg_score: 61.25,
            top_products: vec![("Phone".to_string(), 7), ("Watch".to_string(), 3)],
        };
        let text = stats_text(Period::Week, &stats);
        assert!(text.starts_with("📊 Statistics - Last 7 days"));
        assert!(text.contains("Engagement: 2.50 clicks/post"));
        assert!(text.contains("1. Phone - 7 clicks"));
        assert!(text.contains("2. Watch - 3 clicks"));

        let empty = stats_text(Period::All, &Statistics::default());
        assert!(empty.contains("No clicks recorded yet."));
    }

    #[test]
    fn test_search_text_caps_at_five() {
        let products = sample_products("T", 5);
        let text = search_text("phone", &products, "R$");
        assert!(text.contains("Found 5 products"));
        assert!(text.contains("5. "));
        assert!(text.contains("R$ 149.99"));
    }

    #[test]
    fn test_control_keyboard_reflects_state() {
        let active = control_keyboard(true);
        assert_eq!(active.inline_keyboard[0][0].text, "⏸️ Pause");
        let paused = control_keyboard(false);
        assert_eq!(paused.inline_keyboard[0][0].text, "▶️ Resume");
    }
}
