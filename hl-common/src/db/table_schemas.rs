//! Table Schema Definitions
//!
//! Declared columns of the curation tables. Older databases created before a
//! verdict column existed get it added on startup by [`SchemaSync`].

use crate::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Canonical variant key columns shared by several tables
fn canonical_key_columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new("chr", "TEXT").not_null(),
        ColumnDefinition::new("pos", "INTEGER").not_null(),
        ColumnDefinition::new("length", "INTEGER").not_null(),
        ColumnDefinition::new("reference", "TEXT").not_null(),
        ColumnDefinition::new("alternative", "TEXT").not_null(),
        ColumnDefinition::new("gene_symbol", "TEXT").not_null().default("''"),
    ]
}

/// Value column plus its `_username` / `_date` companions
fn verdict_columns(name: &str, sql_type: &str, default: &str) -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new(name, sql_type).not_null().default(default),
        ColumnDefinition::new(format!("{}_username", name), "TEXT"),
        ColumnDefinition::new(format!("{}_date", name), "TEXT"),
    ]
}

/// VariantEvaluation family
pub struct VariantEvaluationsTableSchema;

impl TableSchema for VariantEvaluationsTableSchema {
    fn table_name() -> &'static str {
        "variant_evaluations"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        let mut columns = vec![ColumnDefinition::new("id", "INTEGER").primary_key()];
        columns.extend(canonical_key_columns());
        columns.push(ColumnDefinition::new("project_id", "INTEGER").not_null());
        columns.extend(verdict_columns("evaluation", "INTEGER", "0"));
        columns.extend(verdict_columns("check_insilico", "TEXT", "'NOT_CHECKED'"));
        // reporting arrived after the first deployments
        columns.extend(verdict_columns("reporting", "TEXT", "'NOT_CHECKED'"));
        columns.extend(verdict_columns("check_validated_variant", "TEXT", "'NOT_CHECKED'"));
        columns.extend(verdict_columns("check_somatic_variant", "TEXT", "'NOT_CHECKED'"));
        columns.extend(verdict_columns("check_segregation", "TEXT", "'NOT_CHECKED'"));
        columns.extend(verdict_columns("evaluation_comments", "TEXT", "''"));
        columns.push(ColumnDefinition::new("history", "TEXT").not_null().default("''"));
        columns
    }
}

/// AggregateCounters
pub struct VariantEvaluationCountsTableSchema;

impl TableSchema for VariantEvaluationCountsTableSchema {
    fn table_name() -> &'static str {
        "variant_evaluation_counts"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        let mut columns = vec![ColumnDefinition::new("id", "INTEGER").primary_key()];
        columns.extend(canonical_key_columns());
        for class in 1..=5 {
            columns.push(
                ColumnDefinition::new(format!("num_evaluated_as_type_{}", class), "INTEGER")
                    .not_null()
                    .default("0"),
            );
        }
        columns
    }
}

/// Per-user and public variant comments
pub struct VariantCommentsTableSchema;

impl TableSchema for VariantCommentsTableSchema {
    fn table_name() -> &'static str {
        "variant_comments"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        let mut columns = vec![ColumnDefinition::new("id", "INTEGER").primary_key()];
        columns.extend(canonical_key_columns());
        columns.push(ColumnDefinition::new("username", "TEXT").not_null());
        columns.push(ColumnDefinition::new("variant_of_interest", "INTEGER"));
        columns.push(ColumnDefinition::new("variant_comments", "TEXT").not_null().default("''"));
        columns
    }
}

/// Per-user and public gene comments
pub struct GeneCommentsTableSchema;

impl TableSchema for GeneCommentsTableSchema {
    fn table_name() -> &'static str {
        "gene_comments"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("gene_symbol", "TEXT").not_null(),
            ColumnDefinition::new("username", "TEXT").not_null(),
            ColumnDefinition::new("gene_of_interest", "INTEGER"),
            ColumnDefinition::new("gene_comments", "TEXT").not_null().default("''"),
        ]
    }
}

/// Per-user and public sample comments
pub struct SampleCommentsTableSchema;

impl TableSchema for SampleCommentsTableSchema {
    fn table_name() -> &'static str {
        "sample_comments"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("project_id", "INTEGER").not_null(),
            ColumnDefinition::new("username", "TEXT").not_null(),
            ColumnDefinition::new("sample_of_interest", "INTEGER"),
            ColumnDefinition::new("sample_comments", "TEXT").not_null().default("''"),
        ]
    }
}

/// Synchronize all table schemas
///
/// Runs after CREATE TABLE IF NOT EXISTS and before migrations.
pub async fn sync_all_table_schemas(pool: &SqlitePool) -> Result<()> {
    let mut added = 0;
    added += SchemaSync::sync_table::<VariantEvaluationsTableSchema>(pool).await?;
    added += SchemaSync::sync_table::<VariantEvaluationCountsTableSchema>(pool).await?;
    added += SchemaSync::sync_table::<VariantCommentsTableSchema>(pool).await?;
    added += SchemaSync::sync_table::<GeneCommentsTableSchema>(pool).await?;
    added += SchemaSync::sync_table::<SampleCommentsTableSchema>(pool).await?;

    if added > 0 {
        info!(columns_added = added, "Schema synchronization complete");
    }

    Ok(())
}
