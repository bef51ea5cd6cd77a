//! Database initialization
//!
//! Opens (or creates) the ledger database and brings the schema up to date:
//! 1. CREATE TABLE IF NOT EXISTS for every table
//! 2. Automatic column sync from the declarative table schemas
//! 3. Versioned migrations
//! 4. Default settings

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// busy_timeout used before the settings table can be read
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Per-connection options: WAL, foreign keys and the lock wait
fn connect_options(db_path: &Path, busy_timeout_ms: u64) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(busy_timeout_ms))
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Stage 1: bring the schema up to date on a single connection
    let bootstrap = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path, DEFAULT_BUSY_TIMEOUT_MS))
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&bootstrap).await?;

    crate::db::table_schemas::sync_all_table_schemas(&bootstrap).await?;

    crate::db::migrations::run_migrations(&bootstrap).await?;

    init_default_settings(&bootstrap).await?;

    let settings = crate::db::settings::load_ledger_settings(&bootstrap).await?;
    bootstrap.close().await;

    // Stage 2: each curation action runs on its own task, so the pool must
    // allow several writers to queue on the SQLite lock
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_millis(settings.max_lock_wait_ms))
        .connect_with(connect_options(db_path, settings.lock_retry_ms))
        .await?;

    info!(
        "Database pool ready: busy_timeout={}ms, max_lock_wait={}ms",
        settings.lock_retry_ms, settings.max_lock_wait_ms
    );

    Ok(pool)
}

/// Create every ledger table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;

    // Owned by ingestion and user administration, read-only to the ledger
    create_users_table(pool).await?;
    create_projects_tables(pool).await?;
    create_variant_sample_table(pool).await?;

    // Curation ledger
    create_variant_evaluations_table(pool).await?;
    create_variant_evaluation_counts_table(pool).await?;
    create_variant_comments_table(pool).await?;
    create_gene_comments_table(pool).await?;
    create_sample_comments_table(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime tunables as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            is_admin INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_projects_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            project_id INTEGER PRIMARY KEY,
            sample TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects_users (
            project_id INTEGER NOT NULL REFERENCES projects(project_id),
            username TEXT NOT NULL,
            PRIMARY KEY (project_id, username)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_variant_sample_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variant_sample (
            variant_sample_id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL REFERENCES projects(project_id),
            chr TEXT NOT NULL,
            pos INTEGER NOT NULL,
            length INTEGER NOT NULL,
            reference TEXT NOT NULL,
            alternative TEXT NOT NULL,
            gene_symbol TEXT NOT NULL DEFAULT '',
            zygosity TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_variant_sample_canonical
        ON variant_sample (chr, pos, length, reference, alternative, gene_symbol)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// VariantEvaluation family, one row per sample occurrence of a canonical variant
async fn create_variant_evaluations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variant_evaluations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chr TEXT NOT NULL,
            pos INTEGER NOT NULL,
            length INTEGER NOT NULL,
            reference TEXT NOT NULL,
            alternative TEXT NOT NULL,
            gene_symbol TEXT NOT NULL DEFAULT '',
            project_id INTEGER NOT NULL,
            evaluation INTEGER NOT NULL DEFAULT 0,
            evaluation_username TEXT,
            evaluation_date TEXT,
            check_insilico TEXT NOT NULL DEFAULT 'NOT_CHECKED',
            check_insilico_username TEXT,
            check_insilico_date TEXT,
            reporting TEXT NOT NULL DEFAULT 'NOT_CHECKED',
            reporting_username TEXT,
            reporting_date TEXT,
            check_validated_variant TEXT NOT NULL DEFAULT 'NOT_CHECKED',
            check_validated_variant_username TEXT,
            check_validated_variant_date TEXT,
            check_somatic_variant TEXT NOT NULL DEFAULT 'NOT_CHECKED',
            check_somatic_variant_username TEXT,
            check_somatic_variant_date TEXT,
            check_segregation TEXT NOT NULL DEFAULT 'NOT_CHECKED',
            check_segregation_username TEXT,
            check_segregation_date TEXT,
            evaluation_comments TEXT NOT NULL DEFAULT '',
            evaluation_comments_username TEXT,
            evaluation_comments_date TEXT,
            history TEXT NOT NULL DEFAULT '',
            UNIQUE (chr, pos, length, reference, alternative, gene_symbol, project_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// AggregateCounters, one row per canonical variant
async fn create_variant_evaluation_counts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variant_evaluation_counts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chr TEXT NOT NULL,
            pos INTEGER NOT NULL,
            length INTEGER NOT NULL,
            reference TEXT NOT NULL,
            alternative TEXT NOT NULL,
            gene_symbol TEXT NOT NULL DEFAULT '',
            num_evaluated_as_type_1 INTEGER NOT NULL DEFAULT 0,
            num_evaluated_as_type_2 INTEGER NOT NULL DEFAULT 0,
            num_evaluated_as_type_3 INTEGER NOT NULL DEFAULT 0,
            num_evaluated_as_type_4 INTEGER NOT NULL DEFAULT 0,
            num_evaluated_as_type_5 INTEGER NOT NULL DEFAULT 0,
            UNIQUE (chr, pos, length, reference, alternative, gene_symbol)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_variant_comments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS variant_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chr TEXT NOT NULL,
            pos INTEGER NOT NULL,
            length INTEGER NOT NULL,
            reference TEXT NOT NULL,
            alternative TEXT NOT NULL,
            gene_symbol TEXT NOT NULL DEFAULT '',
            username TEXT NOT NULL,
            variant_of_interest INTEGER,
            variant_comments TEXT NOT NULL DEFAULT '',
            UNIQUE (chr, pos, length, reference, alternative, gene_symbol, username)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_gene_comments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS gene_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            gene_symbol TEXT NOT NULL,
            username TEXT NOT NULL,
            gene_of_interest INTEGER,
            gene_comments TEXT NOT NULL DEFAULT '',
            UNIQUE (gene_symbol, username)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sample_comments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sample_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL,
            username TEXT NOT NULL,
            sample_of_interest INTEGER,
            sample_comments TEXT NOT NULL DEFAULT '',
            UNIQUE (project_id, username)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure all tunables exist, resetting NULL values to defaults
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    ensure_setting(pool, "ledger_lock_retry_ms", "250").await?;
    ensure_setting(pool, "ledger_max_lock_wait_ms", "5000").await?;
    ensure_setting(pool, "event_bus_capacity", "1000").await?;
    ensure_setting(pool, "history_date_format", crate::time::HISTORY_DATE_FORMAT).await?;
    ensure_setting(pool, "comment_date_format", crate::time::COMMENT_DATE_FORMAT).await?;

    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        WHERE settings.value IS NULL
        "#,
    )
    .bind(key)
    .bind(default_value)
    .execute(pool)
    .await?;

    Ok(())
}
