//! Annotation record store
//!
//! Owns lazy creation of annotation records. A record is identified by its
//! family, the identity it annotates and, for comment families, the owning
//! scope (a username or the literal `PUBLIC`). The UNIQUE constraints of the
//! tables guarantee at most one row per key; a duplicate insert surfaces as
//! [`Error::StorageConflict`] and is resolved by re-reading once.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use hl_common::db::{CanonicalVariant, LedgerSettings};
use hl_common::events::{EventBus, LedgerEvent};
use hl_common::retry::retry_on_lock;
use hl_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::aggregate::{recount, EvaluationCounts};
use crate::audit::{blob_fragment, AuditEntry};
use crate::verdict::{EvaluationValue, Interest, SqlValue};

/// Username owning the shared public comment rows
pub const PUBLIC_OWNER: &str = "PUBLIC";

/// Prefix of the footer kept at the end of public comments
pub const FOOTER_PREFIX: &str = "Last modified by ";

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Row id of an annotation record within its family table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Committed result of an evaluation write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationWrite {
    /// History line appended to each record
    pub entry: AuditEntry,
    /// Stored history blob per record, new line included
    pub histories: BTreeMap<RecordId, String>,
    /// Counters recounted with the write, per canonical variant
    pub counts: Vec<(CanonicalVariant, EvaluationCounts)>,
}

/// Record families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    /// Shared verdicts, one record per sample occurrence
    VariantEvaluation,
    VariantComment,
    GeneComment,
    SampleComment,
}

impl Family {
    pub fn table(self) -> &'static str {
        match self {
            Family::VariantEvaluation => "variant_evaluations",
            Family::VariantComment => "variant_comments",
            Family::GeneComment => "gene_comments",
            Family::SampleComment => "sample_comments",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::VariantEvaluation => "variant_evaluation",
            Family::VariantComment => "variant_comment",
            Family::GeneComment => "gene_comment",
            Family::SampleComment => "sample_comment",
        }
    }

    /// Column holding the free-text comment
    pub fn comment_column(self) -> &'static str {
        match self {
            Family::VariantEvaluation => "evaluation_comments",
            Family::VariantComment => "variant_comments",
            Family::GeneComment => "gene_comments",
            Family::SampleComment => "sample_comments",
        }
    }

    /// Column holding the "of interest" flag, None for evaluations
    pub fn interest_column(self) -> Option<&'static str> {
        match self {
            Family::VariantEvaluation => None,
            Family::VariantComment => Some("variant_of_interest"),
            Family::GeneComment => Some("gene_of_interest"),
            Family::SampleComment => Some("sample_of_interest"),
        }
    }
}

/// Owner of a comment record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Shared row editable by any authenticated actor
    Public,
    /// Row of one user, only visible to them
    Private(String),
}

impl Scope {
    /// Value of the `username` column
    pub fn username(&self) -> &str {
        match self {
            Scope::Public => PUBLIC_OWNER,
            Scope::Private(user) => user,
        }
    }
}

/// What a record annotates
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKey {
    /// A canonical variant as seen in one project (sample)
    Occurrence {
        variant: CanonicalVariant,
        project_id: i64,
    },
    Variant(CanonicalVariant),
    Gene(String),
    Project(i64),
}

/// Full key of an annotation record
///
/// Built through the constructors so family, identity and scope always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    family: Family,
    identity: IdentityKey,
    scope: Option<Scope>,
}

impl RecordKey {
    pub fn evaluation(variant: CanonicalVariant, project_id: i64) -> Self {
        Self {
            family: Family::VariantEvaluation,
            identity: IdentityKey::Occurrence { variant, project_id },
            scope: None,
        }
    }

    pub fn variant_comment(variant: CanonicalVariant, scope: Scope) -> Self {
        Self {
            family: Family::VariantComment,
            identity: IdentityKey::Variant(variant),
            scope: Some(scope),
        }
    }

    pub fn gene_comment(gene_symbol: impl Into<String>, scope: Scope) -> Self {
        Self {
            family: Family::GeneComment,
            identity: IdentityKey::Gene(gene_symbol.into()),
            scope: Some(scope),
        }
    }

    pub fn sample_comment(project_id: i64, scope: Scope) -> Self {
        Self {
            family: Family::SampleComment,
            identity: IdentityKey::Project(project_id),
            scope: Some(scope),
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    fn owner(&self) -> &str {
        self.scope.as_ref().map(Scope::username).unwrap_or_default()
    }
}

/// Value written to a comment-family record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentValue {
    Interest(Interest),
    Text(String),
}

impl CommentValue {
    /// Column written in the family table
    pub fn column(&self, family: Family) -> Result<&'static str> {
        match self {
            CommentValue::Text(_) => Ok(family.comment_column()),
            CommentValue::Interest(_) => family.interest_column().ok_or_else(|| {
                Error::InvalidInput(format!("{} records carry no interest flag", family.name()))
            }),
        }
    }

    /// Value as shown in table cells
    pub fn display_value(&self) -> Option<String> {
        match self {
            CommentValue::Text(text) => Some(text.clone()),
            CommentValue::Interest(flag) => flag.to_db().map(|b| if b { "1" } else { "0" }.to_string()),
        }
    }
}

/// `WHERE` clause matching a canonical variant, bound by [`bind_variant`]
pub(crate) const CANONICAL_PREDICATE: &str = "chr = ? AND pos = ? AND length = ? AND reference = ? \
     AND alternative = ? AND gene_symbol = ?";

pub(crate) fn bind_variant<'q>(query: SqliteQuery<'q>, variant: &'q CanonicalVariant) -> SqliteQuery<'q> {
    query
        .bind(variant.chr.as_str())
        .bind(variant.pos)
        .bind(variant.length)
        .bind(variant.reference.as_str())
        .bind(variant.alternative.as_str())
        .bind(variant.gene_symbol.as_str())
}

fn bind_identity<'q>(query: SqliteQuery<'q>, identity: &'q IdentityKey) -> SqliteQuery<'q> {
    match identity {
        IdentityKey::Occurrence { variant, project_id } => bind_variant(query, variant).bind(*project_id),
        IdentityKey::Variant(variant) => bind_variant(query, variant),
        IdentityKey::Gene(gene) => query.bind(gene.as_str()),
        IdentityKey::Project(project_id) => query.bind(*project_id),
    }
}

/// `WHERE` clause matching one record key
fn key_predicate(key: &RecordKey) -> &'static str {
    match key.family {
        Family::VariantEvaluation => {
            "chr = ? AND pos = ? AND length = ? AND reference = ? AND alternative = ? \
             AND gene_symbol = ? AND project_id = ?"
        }
        Family::VariantComment => {
            "chr = ? AND pos = ? AND length = ? AND reference = ? AND alternative = ? \
             AND gene_symbol = ? AND username = ?"
        }
        Family::GeneComment => "gene_symbol = ? AND username = ?",
        Family::SampleComment => "project_id = ? AND username = ?",
    }
}

/// Positional placeholders for an `IN (...)` list
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Remove every public-comment footer line
pub fn strip_footer(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let line = line.trim();
            !(line.starts_with(FOOTER_PREFIX) && line.ends_with('.') && line.contains(" on "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace the footer of a public comment with one naming the latest author
pub fn apply_footer(text: &str, actor: &str, date: &str) -> String {
    format!("{}\n{}{} on {}.", strip_footer(text), FOOTER_PREFIX, actor, date)
}

/// Lazy create-or-reuse of annotation records and their field writes
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
    bus: EventBus,
    settings: LedgerSettings,
}

impl RecordStore {
    pub fn new(pool: SqlitePool, bus: EventBus, settings: LedgerSettings) -> Self {
        Self { pool, bus, settings }
    }

    /// Existing record id for a key
    pub async fn find(&self, key: &RecordKey) -> Result<Option<RecordId>> {
        let sql = format!("SELECT id FROM {} WHERE {}", key.family.table(), key_predicate(key));
        let mut query = bind_identity(sqlx::query(&sql), &key.identity);
        if key.scope.is_some() {
            query = query.bind(key.owner());
        }
        let row: Option<i64> = query
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get("id"))
            .transpose()?;
        Ok(row.map(RecordId))
    }

    /// Return the record for `key`, creating it on first use
    ///
    /// Two callers racing on a never-seen key converge on one row: the loser
    /// of the insert race gets a conflict and re-reads the winner's id.
    pub async fn resolve_or_create(&self, key: &RecordKey, actor: &str) -> Result<RecordId> {
        if let Some(id) = self.find(key).await? {
            return Ok(id);
        }

        match self.insert(key, actor).await {
            Ok(id) => Ok(id),
            Err(Error::StorageConflict(reason)) => {
                warn!(family = key.family.name(), %reason, "Concurrent record creation, re-reading");
                self.find(key).await?.ok_or_else(|| {
                    Error::Internal(format!(
                        "{} record vanished after insert conflict",
                        key.family.name()
                    ))
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve a whole selection, creating each distinct record once
    ///
    /// Keys are de-duplicated before any insert, so two selected samples
    /// carrying the same variant share one record.
    pub async fn resolve_or_create_batch<'k, I>(
        &self,
        keys: I,
        actor: &str,
    ) -> Result<HashMap<RecordKey, RecordId>>
    where
        I: IntoIterator<Item = &'k RecordKey>,
    {
        let mut resolved: HashMap<RecordKey, RecordId> = HashMap::new();
        let mut requested = 0usize;
        for key in keys {
            requested += 1;
            if resolved.contains_key(key) {
                continue;
            }
            let id = self.resolve_or_create(key, actor).await?;
            resolved.insert(key.clone(), id);
        }

        if requested > resolved.len() {
            debug!(
                requested,
                distinct = resolved.len(),
                "Merged duplicate keys in selection"
            );
        }

        Ok(resolved)
    }

    async fn insert(&self, key: &RecordKey, actor: &str) -> Result<RecordId> {
        let record_id = retry_on_lock("record insert", self.settings.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;

            let sql = match key.family {
                Family::VariantEvaluation => {
                    "INSERT INTO variant_evaluations \
                     (chr, pos, length, reference, alternative, gene_symbol, project_id, evaluation_comments, history) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, '', '')"
                }
                Family::VariantComment => {
                    "INSERT INTO variant_comments \
                     (chr, pos, length, reference, alternative, gene_symbol, username, variant_comments) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, '')"
                }
                Family::GeneComment => {
                    "INSERT INTO gene_comments (gene_symbol, username, gene_comments) VALUES (?, ?, '')"
                }
                Family::SampleComment => {
                    "INSERT INTO sample_comments (project_id, username, sample_comments) VALUES (?, ?, '')"
                }
            };

            let mut query = bind_identity(sqlx::query(sql), &key.identity);
            if key.scope.is_some() {
                query = query.bind(key.owner());
            }
            let result = query
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::from_insert(e, key.family.name()))?;

            // The counters row is born with the first evaluation of its variant
            if let IdentityKey::Occurrence { variant, .. } = &key.identity {
                bind_variant(
                    sqlx::query(
                        "INSERT OR IGNORE INTO variant_evaluation_counts \
                         (chr, pos, length, reference, alternative, gene_symbol) VALUES (?, ?, ?, ?, ?, ?)",
                    ),
                    variant,
                )
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<RecordId, Error>(RecordId(result.last_insert_rowid()))
        })
        .await?;

        info!(
            family = key.family.name(),
            record_id = record_id.0,
            actor,
            "Created annotation record"
        );
        self.bus.emit_lossy(LedgerEvent::RecordCreated {
            family: key.family.name().to_string(),
            record_id: record_id.0,
            actor: actor.to_string(),
            timestamp: Utc::now(),
        });

        Ok(record_id)
    }

    /// Write one verdict field of one evaluation record
    pub async fn write(
        &self,
        record_id: RecordId,
        value: &EvaluationValue,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<EvaluationWrite> {
        self.write_evaluations(&BTreeSet::from([record_id]), value, actor, at).await
    }

    /// Write one verdict field on a set of evaluation records
    ///
    /// Value, `_username`, `_date` and the history line are set by a single
    /// UPDATE; each distinct record receives exactly one history line. A
    /// classification also recounts every canonical variant touched, in the
    /// same transaction, so a failed recount leaves no trace of the write.
    pub async fn write_evaluations(
        &self,
        record_ids: &BTreeSet<RecordId>,
        value: &EvaluationValue,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<EvaluationWrite> {
        let entry = AuditEntry::for_write(value, actor, at, &self.settings.history_date_format);
        if record_ids.is_empty() {
            return Err(Error::InvalidInput("No evaluation record selected".to_string()));
        }

        let field = value.field();
        let update_sql = format!(
            "UPDATE variant_evaluations SET {col} = ?, {user} = ?, {date} = ?, history = history || ? \
             WHERE id IN ({ids})",
            col = field.column(),
            user = field.username_column(),
            date = field.date_column(),
            ids = placeholders(record_ids.len()),
        );
        let select_sql = format!(
            "SELECT id, history, chr, pos, length, reference, alternative, gene_symbol \
             FROM variant_evaluations WHERE id IN ({})",
            placeholders(record_ids.len()),
        );
        let fragment = blob_fragment(&entry);
        let sql_value = value.sql_value();

        let (histories, counts) = retry_on_lock("evaluation write", self.settings.max_lock_wait_ms, || async {
            let mut tx = self.pool.begin().await?;

            let mut update = sqlx::query(&update_sql);
            update = match &sql_value {
                SqlValue::Integer(i) => update.bind(*i),
                SqlValue::Text(t) => update.bind(t.as_str()),
            };
            update = update.bind(actor).bind(entry.timestamp.as_str()).bind(fragment.as_str());
            for id in record_ids {
                update = update.bind(id.0);
            }
            update.execute(&mut *tx).await?;

            let mut select = sqlx::query(&select_sql);
            for id in record_ids {
                select = select.bind(id.0);
            }
            let rows = select.fetch_all(&mut *tx).await?;

            let mut histories = BTreeMap::new();
            let mut variants = BTreeSet::new();
            for row in rows {
                histories.insert(RecordId(row.try_get("id")?), row.try_get::<String, _>("history")?);
                variants.insert(CanonicalVariant {
                    chr: row.try_get("chr")?,
                    pos: row.try_get("pos")?,
                    length: row.try_get("length")?,
                    reference: row.try_get("reference")?,
                    alternative: row.try_get("alternative")?,
                    gene_symbol: row.try_get("gene_symbol")?,
                });
            }

            let mut counts = Vec::new();
            if value.is_classification() {
                for variant in variants {
                    let recounted = recount(&mut tx, &variant).await?;
                    counts.push((variant, recounted));
                }
            }

            tx.commit().await?;
            Ok::<_, Error>((histories, counts))
        })
        .await?;

        debug!(
            field = field.column(),
            records = record_ids.len(),
            actor,
            "Evaluation field written"
        );

        Ok(EvaluationWrite {
            entry,
            histories,
            counts,
        })
    }

    /// Write a flag or comment on a set of comment-family records
    pub async fn write_comment_field(
        &self,
        family: Family,
        record_ids: &BTreeSet<RecordId>,
        value: &CommentValue,
    ) -> Result<()> {
        if family == Family::VariantEvaluation {
            return Err(Error::InvalidInput(
                "evaluation records are written through write_evaluations".to_string(),
            ));
        }
        if record_ids.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE {} SET {} = ? WHERE id IN ({})",
            family.table(),
            value.column(family)?,
            placeholders(record_ids.len()),
        );

        retry_on_lock("comment write", self.settings.max_lock_wait_ms, || async {
            let mut query = sqlx::query(&sql);
            query = match value {
                CommentValue::Text(text) => query.bind(text.as_str()),
                CommentValue::Interest(flag) => query.bind(flag.to_db()),
            };
            for id in record_ids {
                query = query.bind(id.0);
            }
            query.execute(&self.pool).await?;
            Ok::<(), Error>(())
        })
        .await
    }

    /// Write the shared public comment of a variant, gene or sample
    ///
    /// The previous "Last modified by" footer is replaced instead of growing
    /// a history. Returns the record id and the stored text.
    pub async fn write_public_comment(
        &self,
        key: &RecordKey,
        text: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(RecordId, String)> {
        if key.scope != Some(Scope::Public) {
            return Err(Error::InvalidInput(
                "public comment written to a non-public record".to_string(),
            ));
        }

        let date = hl_common::time::format_local(at, &self.settings.comment_date_format);
        let stored = apply_footer(text, actor, &date);

        let record_id = self.resolve_or_create(key, actor).await?;
        self.write_comment_field(
            key.family,
            &BTreeSet::from([record_id]),
            &CommentValue::Text(stored.clone()),
        )
        .await?;

        Ok((record_id, stored))
    }
}
