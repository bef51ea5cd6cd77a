//! Read side of the ledger
//!
//! Loads what the details panels show for one displayed row: the shared
//! evaluation with its history and counters, the actor's private flags and
//! comments, the public comments, and the evaluations other samples carry
//! for the same canonical variant.

use std::collections::{BTreeMap, HashMap};

use hl_common::db::{CanonicalVariant, SampleOccurrence};
use hl_common::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::aggregate::{load_counts, EvaluationCounts};
use crate::audit::History;
use crate::records::{bind_variant, RecordId, CANONICAL_PREDICATE, PUBLIC_OWNER};
use crate::verdict::{
    EvaluationField, EvaluationValue, Insilico, Interest, Mosaicism, Pathogenicity, Reporting,
    Segregation, Validation,
};

/// Who last set a verdict field, and when
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldStamp {
    pub username: Option<String>,
    pub date: Option<String>,
}

/// Verdicts of one evaluation record
///
/// The default value stands for an occurrence never evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationSummary {
    pub record_id: Option<RecordId>,
    pub evaluation: Pathogenicity,
    pub insilico: Insilico,
    pub reporting: Reporting,
    pub validation: Validation,
    pub mosaicism: Mosaicism,
    pub segregation: Segregation,
    pub comments: String,
}

impl EvaluationSummary {
    /// Every field as a typed value, in column order
    pub fn values(&self) -> [EvaluationValue; 7] {
        [
            EvaluationValue::Evaluation(self.evaluation),
            EvaluationValue::Insilico(self.insilico),
            EvaluationValue::Reporting(self.reporting),
            EvaluationValue::Validation(self.validation),
            EvaluationValue::Mosaicism(self.mosaicism),
            EvaluationValue::Segregation(self.segregation),
            EvaluationValue::Comments(self.comments.clone()),
        ]
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluation != Pathogenicity::NotEvaluated
    }
}

/// Shared evaluation panel of one row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationDetails {
    pub summary: EvaluationSummary,
    pub stamps: HashMap<EvaluationField, FieldStamp>,
    pub history: History,
    pub counts: EvaluationCounts,
}

/// One private (or public) comment record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommentDetails {
    pub record_id: Option<RecordId>,
    pub interest: Interest,
    pub comments: String,
}

/// Variant, gene and sample comments of one owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommentSet {
    pub variant: CommentDetails,
    pub gene: CommentDetails,
    pub sample: CommentDetails,
}

/// Another sample's evaluation of the same canonical variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OtherEvaluation {
    pub project_id: i64,
    pub sample: String,
    pub summary: EvaluationSummary,
    pub evaluated_by: FieldStamp,
}

/// Evaluations across samples with a per-field tally of values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OtherEvaluations {
    pub rows: Vec<OtherEvaluation>,
    /// Column name -> displayed value -> number of rows
    pub tallies: BTreeMap<String, BTreeMap<String, usize>>,
}

fn tally_label(value: &EvaluationValue) -> String {
    match value {
        EvaluationValue::Evaluation(class) => class.label().to_string(),
        other => other.display_value(),
    }
}

fn summary_from_row(row: &SqliteRow) -> Result<EvaluationSummary> {
    let record_id: Option<i64> = row.try_get("id")?;
    let Some(record_id) = record_id else {
        return Ok(EvaluationSummary::default());
    };
    Ok(EvaluationSummary {
        record_id: Some(RecordId(record_id)),
        evaluation: Pathogenicity::from_code(row.try_get("evaluation")?)?,
        insilico: row.try_get::<String, _>("check_insilico")?.parse()?,
        reporting: row.try_get::<String, _>("reporting")?.parse()?,
        validation: row.try_get::<String, _>("check_validated_variant")?.parse()?,
        mosaicism: row.try_get::<String, _>("check_somatic_variant")?.parse()?,
        segregation: row.try_get::<String, _>("check_segregation")?.parse()?,
        comments: row.try_get("evaluation_comments")?,
    })
}

/// Loads details panels
#[derive(Debug, Clone)]
pub struct DetailsLoader {
    pool: SqlitePool,
}

impl DetailsLoader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Shared evaluation of one occurrence
    pub async fn evaluation(&self, occurrence: &SampleOccurrence) -> Result<EvaluationDetails> {
        let variant = &occurrence.variant;
        let sql = format!(
            "SELECT * FROM variant_evaluations WHERE {} AND project_id = ?",
            CANONICAL_PREDICATE
        );
        let row = bind_variant(sqlx::query(&sql), variant)
            .bind(occurrence.project_id)
            .fetch_optional(&self.pool)
            .await?;

        let mut details = EvaluationDetails::default();
        if let Some(row) = row {
            details.summary = summary_from_row(&row)?;
            for field in EvaluationField::ALL {
                details.stamps.insert(
                    field,
                    FieldStamp {
                        username: row.try_get(field.username_column().as_str())?,
                        date: row.try_get(field.date_column().as_str())?,
                    },
                );
            }
            details.history = History::from_blob(&row.try_get::<String, _>("history")?);
        }
        details.counts = load_counts(&self.pool, variant).await?;

        Ok(details)
    }

    /// Private flags and comments of `actor` for one row
    pub async fn private(&self, actor: &str, occurrence: &SampleOccurrence) -> Result<CommentSet> {
        self.comment_set(actor, occurrence).await
    }

    /// Public comments for one row
    pub async fn public(&self, occurrence: &SampleOccurrence) -> Result<CommentSet> {
        self.comment_set(PUBLIC_OWNER, occurrence).await
    }

    async fn comment_set(&self, owner: &str, occurrence: &SampleOccurrence) -> Result<CommentSet> {
        let variant = &occurrence.variant;

        let sql = format!(
            "SELECT id, variant_of_interest AS interest, variant_comments AS comments \
             FROM variant_comments WHERE {} AND username = ?",
            CANONICAL_PREDICATE
        );
        let variant_row = bind_variant(sqlx::query(&sql), variant)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        let gene_row = sqlx::query(
            "SELECT id, gene_of_interest AS interest, gene_comments AS comments \
             FROM gene_comments WHERE gene_symbol = ? AND username = ?",
        )
        .bind(&variant.gene_symbol)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        let sample_row = sqlx::query(
            "SELECT id, sample_of_interest AS interest, sample_comments AS comments \
             FROM sample_comments WHERE project_id = ? AND username = ?",
        )
        .bind(occurrence.project_id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        Ok(CommentSet {
            variant: comment_from_row(variant_row.as_ref())?,
            gene: comment_from_row(gene_row.as_ref())?,
            sample: comment_from_row(sample_row.as_ref())?,
        })
    }

    /// Evaluations of `variant` in every sample carrying it
    ///
    /// With `include_non_evaluated` false, rows without a pathogenicity
    /// class are left out of both the list and the tally.
    pub async fn other_evaluations(
        &self,
        variant: &CanonicalVariant,
        include_non_evaluated: bool,
    ) -> Result<OtherEvaluations> {
        let query = sqlx::query(
            "SELECT vs.project_id AS project_id, p.sample AS sample, ve.id AS id, \
             ve.evaluation AS evaluation, ve.evaluation_username AS evaluation_username, \
             ve.evaluation_date AS evaluation_date, ve.check_insilico AS check_insilico, \
             ve.reporting AS reporting, ve.check_validated_variant AS check_validated_variant, \
             ve.check_somatic_variant AS check_somatic_variant, \
             ve.check_segregation AS check_segregation, \
             ve.evaluation_comments AS evaluation_comments \
             FROM variant_sample vs \
             JOIN projects p ON p.project_id = vs.project_id \
             LEFT JOIN variant_evaluations ve ON ve.chr = vs.chr AND ve.pos = vs.pos \
               AND ve.length = vs.length AND ve.reference = vs.reference \
               AND ve.alternative = vs.alternative AND ve.gene_symbol = vs.gene_symbol \
               AND ve.project_id = vs.project_id \
             WHERE vs.chr = ? AND vs.pos = ? AND vs.length = ? AND vs.reference = ? \
               AND vs.alternative = ? AND vs.gene_symbol = ? \
             GROUP BY vs.project_id \
             ORDER BY p.sample, vs.project_id",
        );
        let rows = bind_variant(query, variant).fetch_all(&self.pool).await?;

        let mut result = OtherEvaluations::default();
        for row in rows {
            let summary = summary_from_row(&row)?;
            if !include_non_evaluated && !summary.is_evaluated() {
                continue;
            }
            for value in summary.values() {
                *result
                    .tallies
                    .entry(value.field().column().to_string())
                    .or_default()
                    .entry(tally_label(&value))
                    .or_default() += 1;
            }
            result.rows.push(OtherEvaluation {
                project_id: row.try_get("project_id")?,
                sample: row.try_get("sample")?,
                evaluated_by: FieldStamp {
                    username: row.try_get("evaluation_username")?,
                    date: row.try_get("evaluation_date")?,
                },
                summary,
            });
        }

        Ok(result)
    }
}

fn comment_from_row(row: Option<&SqliteRow>) -> Result<CommentDetails> {
    match row {
        Some(row) => Ok(CommentDetails {
            record_id: Some(RecordId(row.try_get("id")?)),
            interest: Interest::from_db(row.try_get("interest")?),
            comments: row.try_get("comments")?,
        }),
        None => Ok(CommentDetails::default()),
    }
}
