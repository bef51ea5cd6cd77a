//! Identity resolution
//!
//! Maps displayed per-sample row ids to their canonical variant and project.
//! A selection is resolved with one batched query; any id missing from
//! storage fails the whole selection with [`Error::NotFound`].

use std::collections::{BTreeMap, BTreeSet};

use hl_common::db::{CanonicalVariant, SampleOccurrence, VariantSampleId};
use hl_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::records::bind_variant;

const OCCURRENCE_COLUMNS: &str = "vs.variant_sample_id, vs.project_id, p.sample, vs.zygosity, \
     vs.chr, vs.pos, vs.length, vs.reference, vs.alternative, vs.gene_symbol";

/// Resolves per-sample row ids to canonical identity
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    pool: SqlitePool,
}

impl IdentityResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve one row id
    pub async fn resolve(&self, id: VariantSampleId) -> Result<SampleOccurrence> {
        let mut resolved = self.resolve_all(&[id]).await?;
        resolved
            .pop()
            .ok_or_else(|| Error::NotFound(format!("variant_sample_id {}", id)))
    }

    /// Resolve a selection of row ids
    ///
    /// Duplicate ids are collapsed. The result is ordered by row id.
    pub async fn resolve_all(&self, ids: &[VariantSampleId]) -> Result<Vec<SampleOccurrence>> {
        let wanted: BTreeSet<VariantSampleId> = ids.iter().copied().collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; wanted.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM variant_sample vs JOIN projects p ON p.project_id = vs.project_id \
             WHERE vs.variant_sample_id IN ({})",
            OCCURRENCE_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in &wanted {
            query = query.bind(id.0);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut found: BTreeMap<VariantSampleId, SampleOccurrence> = BTreeMap::new();
        for row in rows {
            let occurrence = occurrence_from_row(&row)?;
            found.insert(occurrence.id, occurrence);
        }

        if let Some(missing) = wanted.iter().find(|id| !found.contains_key(id)) {
            return Err(Error::NotFound(format!("variant_sample_id {}", missing)));
        }

        debug!(requested = ids.len(), resolved = found.len(), "Resolved selection");
        Ok(found.into_values().collect())
    }

    /// Every occurrence of a canonical variant across projects
    pub async fn occurrences_of(&self, variant: &CanonicalVariant) -> Result<Vec<SampleOccurrence>> {
        let sql = format!(
            "SELECT {} FROM variant_sample vs JOIN projects p ON p.project_id = vs.project_id \
             WHERE vs.chr = ? AND vs.pos = ? AND vs.length = ? AND vs.reference = ? \
             AND vs.alternative = ? AND vs.gene_symbol = ? \
             ORDER BY p.sample, vs.variant_sample_id",
            OCCURRENCE_COLUMNS
        );
        let rows = bind_variant(sqlx::query(&sql), variant)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(occurrence_from_row).collect()
    }
}

fn occurrence_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SampleOccurrence> {
    Ok(SampleOccurrence {
        id: VariantSampleId(row.try_get("variant_sample_id")?),
        project_id: row.try_get("project_id")?,
        sample: row.try_get("sample")?,
        zygosity: row.try_get("zygosity")?,
        variant: CanonicalVariant {
            chr: row.try_get("chr")?,
            pos: row.try_get("pos")?,
            length: row.try_get("length")?,
            reference: row.try_get("reference")?,
            alternative: row.try_get("alternative")?,
            gene_symbol: row.try_get("gene_symbol")?,
        },
    })
}
