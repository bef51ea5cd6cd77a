//! Per-variant evaluation counters
//!
//! `num_evaluated_as_type_N` always equals the number of evaluation records
//! of the canonical variant whose class is N. Counters are recomputed from
//! the records, never incremented, so concurrent writers converge.

use chrono::Utc;
use hl_common::db::CanonicalVariant;
use hl_common::events::{EventBus, LedgerEvent, RowMatch};
use hl_common::retry::retry_on_lock;
use hl_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::records::{bind_variant, CANONICAL_PREDICATE};
use crate::verdict::Pathogenicity;
use crate::view_cache::ViewCache;

/// Counts of evaluation records per class I to V
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationCounts(pub [i64; 5]);

impl EvaluationCounts {
    /// Count for a class, zero for "not evaluated"
    pub fn get(&self, class: Pathogenicity) -> i64 {
        class.counter_index().map(|i| self.0[i]).unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.0.iter().sum()
    }

    /// Column name of the counter at `index`
    pub fn column(index: usize) -> String {
        format!("num_evaluated_as_type_{}", index + 1)
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self([
            row.try_get("c1")?,
            row.try_get("c2")?,
            row.try_get("c3")?,
            row.try_get("c4")?,
            row.try_get("c5")?,
        ]))
    }
}

/// Stored counters, zero when no evaluation was ever recorded
pub(crate) async fn load_counts(pool: &SqlitePool, variant: &CanonicalVariant) -> Result<EvaluationCounts> {
    let sql = format!(
        "SELECT num_evaluated_as_type_1 AS c1, num_evaluated_as_type_2 AS c2, \
         num_evaluated_as_type_3 AS c3, num_evaluated_as_type_4 AS c4, \
         num_evaluated_as_type_5 AS c5 FROM variant_evaluation_counts WHERE {}",
        CANONICAL_PREDICATE
    );
    let row = bind_variant(sqlx::query(&sql), variant).fetch_optional(pool).await?;

    match row {
        Some(row) => EvaluationCounts::from_row(&row),
        None => Ok(EvaluationCounts::default()),
    }
}

/// Recount the classes of `variant` and store them, on the caller's transaction
///
/// The counters row is inserted first when missing, which takes the write
/// lock before counting.
pub(crate) async fn recount(conn: &mut SqliteConnection, variant: &CanonicalVariant) -> Result<EvaluationCounts> {
    let insert = sqlx::query(
        "INSERT OR IGNORE INTO variant_evaluation_counts \
         (chr, pos, length, reference, alternative, gene_symbol) VALUES (?, ?, ?, ?, ?, ?)",
    );
    bind_variant(insert, variant).execute(&mut *conn).await?;

    let count_sql = format!(
        "SELECT \
         COALESCE(SUM(CASE WHEN evaluation = 1 THEN 1 ELSE 0 END), 0) AS c1, \
         COALESCE(SUM(CASE WHEN evaluation = 2 THEN 1 ELSE 0 END), 0) AS c2, \
         COALESCE(SUM(CASE WHEN evaluation = 3 THEN 1 ELSE 0 END), 0) AS c3, \
         COALESCE(SUM(CASE WHEN evaluation = 4 THEN 1 ELSE 0 END), 0) AS c4, \
         COALESCE(SUM(CASE WHEN evaluation = 5 THEN 1 ELSE 0 END), 0) AS c5 \
         FROM variant_evaluations WHERE {}",
        CANONICAL_PREDICATE
    );
    let row = bind_variant(sqlx::query(&count_sql), variant)
        .fetch_one(&mut *conn)
        .await?;
    let counts = EvaluationCounts::from_row(&row)?;

    let update_sql = format!(
        "UPDATE variant_evaluation_counts SET num_evaluated_as_type_1 = ?, \
         num_evaluated_as_type_2 = ?, num_evaluated_as_type_3 = ?, \
         num_evaluated_as_type_4 = ?, num_evaluated_as_type_5 = ? WHERE {}",
        CANONICAL_PREDICATE
    );
    let mut update = sqlx::query(&update_sql);
    for n in counts.0 {
        update = update.bind(n);
    }
    bind_variant(update, variant).execute(&mut *conn).await?;

    Ok(counts)
}

#[derive(Debug, Clone)]
pub struct AggregateCounter {
    pool: SqlitePool,
    bus: EventBus,
    view: ViewCache,
    max_lock_wait_ms: u64,
}

impl AggregateCounter {
    pub fn new(pool: SqlitePool, bus: EventBus, view: ViewCache, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            bus,
            view,
            max_lock_wait_ms,
        }
    }

    /// Stored counters, zero when no evaluation was ever recorded
    pub async fn load(&self, variant: &CanonicalVariant) -> Result<EvaluationCounts> {
        load_counts(&self.pool, variant).await
    }

    /// Recount the classes of `variant` in its own transaction and publish
    /// the result
    pub async fn recompute(&self, action_id: Uuid, variant: &CanonicalVariant) -> Result<EvaluationCounts> {
        let counts = retry_on_lock("counter recompute", self.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;
            let counts = recount(&mut tx, variant).await?;
            tx.commit().await?;
            Ok::<EvaluationCounts, Error>(counts)
        })
        .await?;

        self.publish(action_id, variant, counts).await;
        Ok(counts)
    }

    /// Push committed counters to every displayed row of the variant
    pub async fn publish(&self, action_id: Uuid, variant: &CanonicalVariant, counts: EvaluationCounts) {
        info!(%action_id, variant = %variant, counts = ?counts.0, "Counters recomputed");

        let matcher = RowMatch::Variant(variant.clone());
        for (index, count) in counts.0.iter().enumerate() {
            self.view
                .propagate(
                    action_id,
                    &matcher,
                    &EvaluationCounts::column(index),
                    Some(count.to_string()),
                )
                .await;
        }
        self.bus.emit_lossy(LedgerEvent::CountersRecomputed {
            variant: variant.clone(),
            counts: counts.0,
            timestamp: Utc::now(),
        });
    }
}
