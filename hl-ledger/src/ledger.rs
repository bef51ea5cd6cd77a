//! Curation ledger
//!
//! Runs curation actions end to end: identity resolution, permission check,
//! lazy record creation, the field write with its history line and counter
//! recompute in one transaction, then propagation to displayed rows.
//!
//! Actions run off the caller's task via [`Ledger::submit`]; the caller
//! observes the outcome through the returned handle.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use hl_common::db::{
    init_database, load_ledger_settings, CanonicalVariant, LedgerSettings, SampleOccurrence,
    VariantSampleId,
};
use hl_common::events::{EventBus, RowMatch};
use hl_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{AggregateCounter, EvaluationCounts};
use crate::audit::{AuditEntry, AuditTrail};
use crate::details::DetailsLoader;
use crate::identity::IdentityResolver;
use crate::permission::PermissionGate;
use crate::records::{CommentValue, Family, RecordId, RecordKey, RecordStore, Scope, PUBLIC_OWNER};
use crate::verdict::EvaluationValue;
use crate::view_cache::ViewCache;

/// Identity of the curator driving a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub actor: String,
}

impl SessionConfig {
    pub fn new(actor: impl Into<String>) -> Result<Self> {
        let actor = actor.into().trim().to_string();
        if actor.is_empty() {
            return Err(Error::Config("No username configured".to_string()));
        }
        if actor == PUBLIC_OWNER {
            return Err(Error::Config(format!("{} is a reserved username", PUBLIC_OWNER)));
        }
        Ok(Self { actor })
    }
}

/// What a comment or flag is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommentTarget {
    Variant,
    Gene,
    Sample,
}

impl CommentTarget {
    pub fn family(self) -> Family {
        match self {
            CommentTarget::Variant => Family::VariantComment,
            CommentTarget::Gene => Family::GeneComment,
            CommentTarget::Sample => Family::SampleComment,
        }
    }

    pub fn key(self, occurrence: &SampleOccurrence, scope: Scope) -> RecordKey {
        match self {
            CommentTarget::Variant => RecordKey::variant_comment(occurrence.variant.clone(), scope),
            CommentTarget::Gene => RecordKey::gene_comment(occurrence.variant.gene_symbol.clone(), scope),
            CommentTarget::Sample => RecordKey::sample_comment(occurrence.project_id, scope),
        }
    }

    /// Displayed rows sharing the record
    pub fn matcher(self, occurrence: &SampleOccurrence) -> RowMatch {
        match self {
            CommentTarget::Variant => RowMatch::Variant(occurrence.variant.clone()),
            CommentTarget::Gene => RowMatch::Gene(occurrence.variant.gene_symbol.clone()),
            CommentTarget::Sample => RowMatch::Project(occurrence.project_id),
        }
    }
}

/// One curator action on a selection of displayed rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurationAction {
    /// Set a shared verdict field (classification, checks or evaluation comment)
    Evaluate {
        rows: Vec<VariantSampleId>,
        value: EvaluationValue,
    },
    /// Set the actor's own flag or comment
    SetPrivate {
        rows: Vec<VariantSampleId>,
        target: CommentTarget,
        value: CommentValue,
    },
    /// Replace the shared public comment
    SetPublicComment {
        rows: Vec<VariantSampleId>,
        target: CommentTarget,
        text: String,
    },
}

impl CurationAction {
    pub fn rows(&self) -> &[VariantSampleId] {
        match self {
            CurationAction::Evaluate { rows, .. }
            | CurationAction::SetPrivate { rows, .. }
            | CurationAction::SetPublicComment { rows, .. } => rows,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            CurationAction::Evaluate { .. } => "evaluate",
            CurationAction::SetPrivate { .. } => "set_private",
            CurationAction::SetPublicComment { .. } => "set_public_comment",
        }
    }
}

/// Result of a completed action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action_id: Uuid,
    /// Distinct records written
    pub records: Vec<RecordId>,
    /// History line appended to each evaluation record
    pub audit: Option<AuditEntry>,
    /// Counters after recompute, per canonical variant
    pub counts: Vec<(CanonicalVariant, EvaluationCounts)>,
    /// Stored public comment text, footer included
    pub stored_text: Option<String>,
    /// Displayed rows refreshed
    pub rows_updated: usize,
}

/// Entry point of every curation action
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    bus: EventBus,
    settings: LedgerSettings,
    identity: IdentityResolver,
    permissions: PermissionGate,
    records: RecordStore,
    counter: AggregateCounter,
    audit: AuditTrail,
    details: DetailsLoader,
    view: ViewCache,
}

impl Ledger {
    /// Open (creating if needed) the ledger database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = init_database(db_path).await?;
        Self::from_pool(pool).await
    }

    /// Build a ledger over an initialized pool
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let settings = load_ledger_settings(&pool).await?;
        let bus = EventBus::new(settings.event_bus_capacity);
        let view = ViewCache::new(bus.clone());

        Ok(Self {
            identity: IdentityResolver::new(pool.clone()),
            permissions: PermissionGate::new(pool.clone()),
            records: RecordStore::new(pool.clone(), bus.clone(), settings.clone()),
            counter: AggregateCounter::new(pool.clone(), bus.clone(), view.clone(), settings.max_lock_wait_ms),
            audit: AuditTrail::new(pool.clone(), settings.max_lock_wait_ms),
            details: DetailsLoader::new(pool.clone()),
            view,
            bus,
            settings,
            pool,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    pub fn permissions(&self) -> &PermissionGate {
        &self.permissions
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn counter(&self) -> &AggregateCounter {
        &self.counter
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn details(&self) -> &DetailsLoader {
        &self.details
    }

    pub fn view(&self) -> &ViewCache {
        &self.view
    }

    /// Run an action on its own task
    pub fn submit(&self, session: SessionConfig, action: CurationAction) -> JoinHandle<Result<ActionOutcome>> {
        let ledger = self.clone();
        tokio::spawn(async move { ledger.execute(&session, action).await })
    }

    /// Run an action to completion
    pub async fn execute(&self, session: &SessionConfig, action: CurationAction) -> Result<ActionOutcome> {
        let action_id = Uuid::new_v4();
        let name = action.name();

        let result = if action.rows().is_empty() {
            Err(Error::InvalidInput("No variant selected".to_string()))
        } else {
            match action {
                CurationAction::Evaluate { rows, value } => {
                    self.run_evaluate(action_id, session, &rows, &value).await
                }
                CurationAction::SetPrivate { rows, target, value } => {
                    self.run_private(action_id, session, &rows, target, &value).await
                }
                CurationAction::SetPublicComment { rows, target, text } => {
                    self.run_public(action_id, session, &rows, target, &text).await
                }
            }
        };

        match &result {
            Ok(outcome) => info!(
                %action_id,
                action = name,
                actor = %session.actor,
                records = outcome.records.len(),
                rows_updated = outcome.rows_updated,
                "Curation action completed"
            ),
            Err(e) => warn!(
                %action_id,
                action = name,
                actor = %session.actor,
                error = %e,
                "Curation action failed"
            ),
        }

        result
    }

    async fn run_evaluate(
        &self,
        action_id: Uuid,
        session: &SessionConfig,
        rows: &[VariantSampleId],
        value: &EvaluationValue,
    ) -> Result<ActionOutcome> {
        let actor = session.actor.as_str();
        let occurrences = self.identity.resolve_all(rows).await?;
        self.permissions.require_modify(actor, rows).await?;

        let keys: Vec<RecordKey> = occurrences
            .iter()
            .map(|occ| RecordKey::evaluation(occ.variant.clone(), occ.project_id))
            .collect();
        let resolved = self.records.resolve_or_create_batch(&keys, actor).await?;
        let record_ids: BTreeSet<RecordId> = resolved.values().copied().collect();

        let write = self
            .records
            .write_evaluations(&record_ids, value, actor, hl_common::time::now())
            .await?;

        for (variant, counts) in &write.counts {
            self.counter.publish(action_id, variant, *counts).await;
        }

        let mut outcome = ActionOutcome {
            action_id,
            records: record_ids.into_iter().collect(),
            counts: write.counts,
            ..Default::default()
        };

        let field = value.field();
        for (occ, key) in occurrences.iter().zip(&keys) {
            let matcher = RowMatch::Occurrence(occ.id);
            outcome.rows_updated += self
                .view
                .propagate(action_id, &matcher, field.column(), Some(value.display_value()))
                .await;
            self.view
                .propagate(action_id, &matcher, &field.username_column(), Some(actor.to_string()))
                .await;
            self.view
                .propagate(action_id, &matcher, &field.date_column(), Some(write.entry.timestamp.clone()))
                .await;
            let history = resolved.get(key).and_then(|id| write.histories.get(id));
            if let Some(history) = history {
                self.view
                    .propagate(action_id, &matcher, "history", Some(history.clone()))
                    .await;
            }
        }
        outcome.audit = Some(write.entry);

        Ok(outcome)
    }

    async fn run_private(
        &self,
        action_id: Uuid,
        session: &SessionConfig,
        rows: &[VariantSampleId],
        target: CommentTarget,
        value: &CommentValue,
    ) -> Result<ActionOutcome> {
        let actor = session.actor.as_str();
        let occurrences = self.identity.resolve_all(rows).await?;
        self.permissions.require_modify(actor, rows).await?;

        let scope = Scope::Private(actor.to_string());
        let keys: Vec<RecordKey> = occurrences.iter().map(|occ| target.key(occ, scope.clone())).collect();
        let family = target.family();
        let resolved = self.records.resolve_or_create_batch(&keys, actor).await?;
        let record_ids: BTreeSet<RecordId> = resolved.values().copied().collect();

        self.records.write_comment_field(family, &record_ids, value).await?;

        let column = value.column(family)?;
        let mut seen: HashSet<RowMatch> = HashSet::new();
        let mut rows_updated = 0;
        for occ in &occurrences {
            let matcher = target.matcher(occ);
            if !seen.insert(matcher.clone()) {
                continue;
            }
            rows_updated += self
                .view
                .propagate(action_id, &matcher, column, value.display_value())
                .await;
        }

        Ok(ActionOutcome {
            action_id,
            records: record_ids.into_iter().collect(),
            rows_updated,
            ..Default::default()
        })
    }

    async fn run_public(
        &self,
        action_id: Uuid,
        session: &SessionConfig,
        rows: &[VariantSampleId],
        target: CommentTarget,
        text: &str,
    ) -> Result<ActionOutcome> {
        let actor = session.actor.as_str();
        let occurrences = self.identity.resolve_all(rows).await?;
        self.permissions.require_known(actor).await?;

        let mut outcome = ActionOutcome {
            action_id,
            ..Default::default()
        };
        let mut written: BTreeMap<RecordId, RowMatch> = BTreeMap::new();
        let mut done: HashSet<RecordKey> = HashSet::new();
        let now = hl_common::time::now();

        for occ in &occurrences {
            let key = target.key(occ, Scope::Public);
            if done.contains(&key) {
                continue;
            }
            let (record_id, stored) = self.records.write_public_comment(&key, text, actor, now).await?;
            written.insert(record_id, target.matcher(occ));
            outcome.stored_text = Some(stored);
            done.insert(key);
        }

        if let Some(stored) = &outcome.stored_text {
            let column = format!("public_{}", target.family().comment_column());
            for matcher in written.values() {
                outcome.rows_updated += self
                    .view
                    .propagate(action_id, matcher, &column, Some(stored.clone()))
                    .await;
            }
        }
        outcome.records = written.into_keys().collect();

        Ok(outcome)
    }

    /// Classify a selection
    pub async fn evaluate(
        &self,
        session: &SessionConfig,
        rows: Vec<VariantSampleId>,
        value: EvaluationValue,
    ) -> Result<ActionOutcome> {
        self.execute(session, CurationAction::Evaluate { rows, value }).await
    }

    /// Set the actor's own flag or comment on a selection
    pub async fn set_private(
        &self,
        session: &SessionConfig,
        rows: Vec<VariantSampleId>,
        target: CommentTarget,
        value: CommentValue,
    ) -> Result<ActionOutcome> {
        self.execute(session, CurationAction::SetPrivate { rows, target, value }).await
    }

    /// Replace the public comment of a selection
    pub async fn set_public_comment(
        &self,
        session: &SessionConfig,
        rows: Vec<VariantSampleId>,
        target: CommentTarget,
        text: impl Into<String>,
    ) -> Result<ActionOutcome> {
        self.execute(
            session,
            CurationAction::SetPublicComment {
                rows,
                target,
                text: text.into(),
            },
        )
        .await
    }
}
