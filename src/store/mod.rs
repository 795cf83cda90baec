pub mod posts;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use posts::{PostedRecord, Statistics};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamps are stored as UTC text in SQLite's own datetime format, so
/// string comparison orders them chronologically.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Thread-safe SQLite store for posting history, clicks and trends
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrate on the raw connection before it goes behind the async Mutex.
        Self::run_migrations(&conn)?;

        info!("Store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            -- One row per product ever posted; reposts update it in place
            CREATE TABLE IF NOT EXISTS posted_products (
                product_id TEXT PRIMARY KEY,
                title TEXT NOT NULL DEFAULT '',
                affiliate_url TEXT NOT NULL DEFAULT '',
                posted_at TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                conversion_score REAL NOT NULL DEFAULT 0.0,
                engagement_score REAL NOT NULL DEFAULT 0.0,
                last_click_at TEXT,
                category TEXT,
                discount REAL,
                rating REAL,
                volume INTEGER
            );

            -- Append-only log of posts and clicks
            CREATE TABLE IF NOT EXISTS product_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id TEXT NOT NULL,
                action TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                metadata TEXT,
                score_impact REAL NOT NULL DEFAULT 0.0
            );

            CREATE TABLE IF NOT EXISTS trending_products (
                product_id TEXT PRIMARY KEY,
                trend_score REAL NOT NULL DEFAULT 0.0,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                click_velocity REAL NOT NULL DEFAULT 0.0
            );

            CREATE INDEX IF NOT EXISTS idx_posted_at ON posted_products(posted_at);
            CREATE INDEX IF NOT EXISTS idx_category ON posted_products(category);
            CREATE INDEX IF NOT EXISTS idx_history_product
                ON product_history(product_id, action, timestamp);
            CREATE INDEX IF NOT EXISTS idx_trending_score ON trending_products(trend_score);
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert_eq!(format_ts(early), "2026-01-02 03:04:05");
        assert_eq!(parse_ts(&format_ts(early)), Some(early));
        assert!(format_ts(early) < format_ts(late));
        assert_eq!(parse_ts("yesterday"), None);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        Store::run_migrations(&conn).unwrap();
        Store::run_migrations(&conn).unwrap();
    }
}
