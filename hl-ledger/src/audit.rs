//! Append-only audit trail of the VariantEvaluation family
//!
//! History is kept as an ordered list of immutable entries. At the storage
//! boundary it is serialized to the legacy blob: every line terminated by `|`.
//! Appends are `history = history || ?`, so no statement ever rewrites or
//! reorders earlier lines.

use std::fmt;

use chrono::{DateTime, Utc};
use hl_common::retry::retry_on_lock;
use hl_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::records::RecordId;
use crate::verdict::{EvaluationField, EvaluationValue};

/// Line terminator in the stored history blob
pub const HISTORY_SEPARATOR: char = '|';

/// How the change is worded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditVerb {
    /// `<field> set to <value>`
    SetTo,
    /// `<field> modified to '<text>'`
    ModifiedTo,
}

/// One history line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub subject: String,
    pub verb: AuditVerb,
    pub value: String,
    pub actor: String,
    pub timestamp: String,
}

impl AuditEntry {
    /// Entry describing a verdict write
    pub fn for_write(value: &EvaluationValue, actor: &str, at: DateTime<Utc>, date_format: &str) -> Self {
        let field = value.field();
        let (verb, rendered) = match value {
            EvaluationValue::Evaluation(class) => (AuditVerb::SetTo, class.label().to_string()),
            EvaluationValue::Comments(text) => (AuditVerb::ModifiedTo, sanitize(text)),
            other => (AuditVerb::SetTo, other.display_value()),
        };
        Self {
            subject: field.description().to_string(),
            verb,
            value: rendered,
            actor: actor.to_string(),
            timestamp: hl_common::time::format_local(at, date_format),
        }
    }

    /// Parse a rendered line, None for lines in an unknown shape
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let open = line.rfind(" (")?;
        let trailer = line[open + 2..].strip_suffix(')')?;
        let (actor, timestamp) = trailer.split_once(" - ")?;
        let body = &line[..open];

        let (subject, verb, value) = if let Some((subject, rest)) = body.split_once(" modified to '") {
            (subject, AuditVerb::ModifiedTo, rest.strip_suffix('\'')?)
        } else {
            let (subject, rest) = body.split_once(" set to ")?;
            (subject, AuditVerb::SetTo, rest)
        };

        Some(Self {
            subject: subject.to_string(),
            verb,
            value: value.to_string(),
            actor: actor.to_string(),
            timestamp: timestamp.to_string(),
        })
    }

    /// True when this line records a change to `field`
    pub fn concerns(&self, field: EvaluationField) -> bool {
        self.subject == field.description()
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verb {
            AuditVerb::SetTo => write!(
                f,
                "{} set to {} ({} - {})",
                self.subject, self.value, self.actor, self.timestamp
            ),
            AuditVerb::ModifiedTo => write!(
                f,
                "{} modified to '{}' ({} - {})",
                self.subject, self.value, self.actor, self.timestamp
            ),
        }
    }
}

/// Free text cannot carry the separator or line breaks into the blob
fn sanitize(text: &str) -> String {
    text.replace(HISTORY_SEPARATOR, "/").replace(['\n', '\r'], " ")
}

/// A line of a stored history, parsed when it has the known shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryLine {
    Entry(AuditEntry),
    /// Lines written by other tools, kept verbatim
    Raw(String),
}

impl fmt::Display for HistoryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryLine::Entry(entry) => entry.fmt(f),
            HistoryLine::Raw(text) => f.write_str(text),
        }
    }
}

/// Ordered history of one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    lines: Vec<HistoryLine>,
}

impl History {
    /// Parse the stored blob
    pub fn from_blob(blob: &str) -> Self {
        let lines = blob
            .split(HISTORY_SEPARATOR)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match AuditEntry::parse(line) {
                Some(entry) => HistoryLine::Entry(entry),
                None => HistoryLine::Raw(line.to_string()),
            })
            .collect();
        Self { lines }
    }

    /// Serialize back to the legacy blob
    pub fn to_blob(&self) -> String {
        self.lines.iter().map(|line| format!("{}{}", line, HISTORY_SEPARATOR)).collect()
    }

    pub fn lines(&self) -> &[HistoryLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Parsed entries only, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.lines.iter().filter_map(|line| match line {
            HistoryLine::Entry(entry) => Some(entry),
            HistoryLine::Raw(_) => None,
        })
    }
}

/// Fragment appended to the history column by a single storage statement
pub fn blob_fragment(entry: &AuditEntry) -> String {
    format!("{}{}", entry, HISTORY_SEPARATOR)
}

/// Access to the history column
#[derive(Debug, Clone)]
pub struct AuditTrail {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl AuditTrail {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Append one line to a record's history
    ///
    /// Verdict writes append inside their own UPDATE; this is for entries
    /// that come with no field change.
    pub async fn append(&self, record_id: RecordId, entry: &AuditEntry) -> Result<()> {
        let fragment = blob_fragment(entry);
        retry_on_lock("history append", self.max_lock_wait_ms, || async {
            sqlx::query("UPDATE variant_evaluations SET history = history || ? WHERE id = ?")
                .bind(&fragment)
                .bind(record_id.0)
                .execute(&self.pool)
                .await?;
            Ok::<(), Error>(())
        })
        .await
    }

    /// Load a record's history, empty when the record does not exist
    pub async fn load(&self, record_id: RecordId) -> Result<History> {
        let blob: Option<String> =
            sqlx::query_scalar("SELECT history FROM variant_evaluations WHERE id = ?")
                .bind(record_id.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(blob.map(|b| History::from_blob(&b)).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::{Insilico, Pathogenicity};

    fn entry(value: EvaluationValue) -> AuditEntry {
        let mut entry = AuditEntry::for_write(&value, "alice", Utc::now(), "%Y-%m-%d %H:%M:%S");
        entry.timestamp = "2026-10-19 10:00:00".to_string();
        entry
    }

    #[test]
    fn test_classification_wording() {
        let e = entry(EvaluationValue::Evaluation(Pathogenicity::TypeIII));
        assert_eq!(e.to_string(), "Evaluation set to type III (alice - 2026-10-19 10:00:00)");
        let e = entry(EvaluationValue::Evaluation(Pathogenicity::NotEvaluated));
        assert_eq!(e.to_string(), "Evaluation set to not evaluated (alice - 2026-10-19 10:00:00)");
    }

    #[test]
    fn test_check_wording() {
        let e = entry(EvaluationValue::Insilico(Insilico::NotOk));
        assert_eq!(e.to_string(), "check_insilico set to NOT_OK (alice - 2026-10-19 10:00:00)");
        assert!(e.concerns(EvaluationField::CheckInsilico));
    }

    #[test]
    fn test_comment_wording_is_sanitized() {
        let e = entry(EvaluationValue::Comments("seen in\nmother | father".to_string()));
        assert_eq!(
            e.to_string(),
            "evaluation_comments modified to 'seen in mother / father' (alice - 2026-10-19 10:00:00)"
        );
    }

    #[test]
    fn test_parse_rendered_lines() {
        let e = entry(EvaluationValue::Comments("it's fine (mostly)".to_string()));
        assert_eq!(AuditEntry::parse(&e.to_string()), Some(e));
        let e = entry(EvaluationValue::Evaluation(Pathogenicity::TypeV));
        assert_eq!(AuditEntry::parse(&e.to_string()), Some(e));
    }

    #[test]
    fn test_history_blob_keeps_order_and_unknown_lines() {
        let blob = "Evaluation set to type I (bob - 2024-01-01 08:00:00)|imported from v1|\
                    reporting set to YES (alice - 2024-01-02 09:00:00)|";
        let history = History::from_blob(blob);
        assert_eq!(history.len(), 3);
        assert_eq!(history.lines()[1], HistoryLine::Raw("imported from v1".to_string()));
        assert_eq!(history.entries().count(), 2);
        assert_eq!(history.to_blob(), blob);
    }

    #[test]
    fn test_empty_blob() {
        assert!(History::from_blob("").is_empty());
        assert_eq!(History::default().to_blob(), "");
    }
}
