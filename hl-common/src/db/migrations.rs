//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in `schema_version`.
//!
//! 1. **Never modify existing migrations** - databases in the field already ran them
//! 2. **Always add new migrations** - one function per change, bump the version
//! 3. **Column additions go in table_schemas.rs** - auto-sync handles them

use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version, 0 when nothing was recorded yet
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    info!(
        "Migrating database schema from v{} to v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

/// Migration v1: blank gene symbols
///
/// Legacy rows stored a missing gene as NULL, which escapes the UNIQUE
/// constraints. Normalize to the empty string.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    for table in ["variant_evaluations", "variant_evaluation_counts", "variant_comments"] {
        let sql = format!("UPDATE {} SET gene_symbol = '' WHERE gene_symbol IS NULL", table);
        let updated = sqlx::query(&sql).execute(pool).await?.rows_affected();
        if updated > 0 {
            info!(table, rows = updated, "Migration v1: normalized NULL gene symbols");
        }
    }

    Ok(())
}

/// Migration v2: rebuild aggregate counters
///
/// Older clients patched counters incrementally and could drift. Recompute
/// every row from the evaluations table.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO variant_evaluation_counts (
            chr, pos, length, reference, alternative, gene_symbol,
            num_evaluated_as_type_1, num_evaluated_as_type_2, num_evaluated_as_type_3,
            num_evaluated_as_type_4, num_evaluated_as_type_5
        )
        SELECT chr, pos, length, reference, alternative, gene_symbol,
               SUM(CASE WHEN evaluation = 1 THEN 1 ELSE 0 END),
               SUM(CASE WHEN evaluation = 2 THEN 1 ELSE 0 END),
               SUM(CASE WHEN evaluation = 3 THEN 1 ELSE 0 END),
               SUM(CASE WHEN evaluation = 4 THEN 1 ELSE 0 END),
               SUM(CASE WHEN evaluation = 5 THEN 1 ELSE 0 END)
        FROM variant_evaluations
        WHERE true
        GROUP BY chr, pos, length, reference, alternative, gene_symbol
        ON CONFLICT (chr, pos, length, reference, alternative, gene_symbol) DO UPDATE SET
            num_evaluated_as_type_1 = excluded.num_evaluated_as_type_1,
            num_evaluated_as_type_2 = excluded.num_evaluated_as_type_2,
            num_evaluated_as_type_3 = excluded.num_evaluated_as_type_3,
            num_evaluated_as_type_4 = excluded.num_evaluated_as_type_4,
            num_evaluated_as_type_5 = excluded.num_evaluated_as_type_5
        "#,
    )
    .execute(pool)
    .await?;

    info!(
        rows = result.rows_affected(),
        "Migration v2: rebuilt evaluation counters"
    );

    Ok(())
}
