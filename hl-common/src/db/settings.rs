//! Settings database access
//!
//! Runtime tunables are read from the settings table (database-first
//! configuration). Missing or unparsable values fall back to defaults.

use crate::{Error, Result};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Tunables the ledger reads once per session
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSettings {
    /// SQLite busy timeout before a lock error surfaces
    pub lock_retry_ms: u64,
    /// Total time a write may keep retrying on "database is locked"
    pub max_lock_wait_ms: u64,
    /// Broadcast channel capacity for view propagation events
    pub event_bus_capacity: usize,
    /// strftime pattern for history lines
    pub history_date_format: String,
    /// strftime pattern for public comment footers
    pub comment_date_format: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            lock_retry_ms: 250,
            max_lock_wait_ms: 5000,
            event_bus_capacity: 1000,
            history_date_format: crate::time::HISTORY_DATE_FORMAT.to_string(),
            comment_date_format: crate::time::COMMENT_DATE_FORMAT.to_string(),
        }
    }
}

/// Load ledger settings, using defaults for absent keys
pub async fn load_ledger_settings(db: &SqlitePool) -> Result<LedgerSettings> {
    let defaults = LedgerSettings::default();
    Ok(LedgerSettings {
        lock_retry_ms: get_setting(db, "ledger_lock_retry_ms")
            .await?
            .unwrap_or(defaults.lock_retry_ms),
        max_lock_wait_ms: get_setting(db, "ledger_max_lock_wait_ms")
            .await?
            .unwrap_or(defaults.max_lock_wait_ms),
        event_bus_capacity: get_setting::<usize>(db, "event_bus_capacity")
            .await?
            .unwrap_or(defaults.event_bus_capacity)
            .max(1),
        history_date_format: get_setting(db, "history_date_format")
            .await?
            .unwrap_or(defaults.history_date_format),
        comment_date_format: get_setting(db, "comment_date_format")
            .await?
            .unwrap_or(defaults.comment_date_format),
    })
}

/// Generic setting getter
///
/// Returns None if the key doesn't exist or holds NULL.
pub async fn get_setting<T: FromStr>(db: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("Invalid value for setting {}: {}", key, raw))),
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T: ToString>(db: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}
