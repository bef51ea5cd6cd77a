//! In-memory view of displayed rows
//!
//! Holds the per-sample rows currently shown and applies annotation updates
//! to every row an update concerns. Propagation never fails a curation
//! action: storage is already committed when it runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use hl_common::db::{SampleOccurrence, VariantSampleId};
use hl_common::events::{EventBus, LedgerEvent, RowMatch};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

/// One displayed row and its annotation cells
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewRow {
    pub occurrence: SampleOccurrence,
    pub fields: BTreeMap<String, Option<String>>,
}

impl ViewRow {
    pub fn new(occurrence: SampleOccurrence) -> Self {
        Self {
            occurrence,
            fields: BTreeMap::new(),
        }
    }

    pub fn matches(&self, matcher: &RowMatch) -> bool {
        let occ = &self.occurrence;
        match matcher {
            RowMatch::Occurrence(id) => occ.id == *id,
            RowMatch::Variant(variant) => occ.variant == *variant,
            RowMatch::Gene(gene) => occ.variant.gene_symbol == *gene,
            RowMatch::Project(project_id) => occ.project_id == *project_id,
            RowMatch::Sample(sample) => occ.sample == *sample,
        }
    }
}

/// Shared cache of displayed rows, cheap to clone
#[derive(Debug, Clone)]
pub struct ViewCache {
    rows: Arc<RwLock<HashMap<VariantSampleId, ViewRow>>>,
    bus: EventBus,
}

impl ViewCache {
    pub fn new(bus: EventBus) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            bus,
        }
    }

    /// Start displaying a row, replacing any previous copy
    pub async fn display(&self, row: ViewRow) {
        self.rows.write().await.insert(row.occurrence.id, row);
    }

    pub async fn remove(&self, id: VariantSampleId) -> Option<ViewRow> {
        self.rows.write().await.remove(&id)
    }

    pub async fn row(&self, id: VariantSampleId) -> Option<ViewRow> {
        self.rows.read().await.get(&id).cloned()
    }

    /// Current cell value; None when the row or cell is absent or unset
    pub async fn value(&self, id: VariantSampleId, field: &str) -> Option<String> {
        self.rows
            .read()
            .await
            .get(&id)
            .and_then(|row| row.fields.get(field).cloned().flatten())
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Apply an update to every matching row and broadcast it
    ///
    /// Returns the number of cached rows touched.
    pub async fn propagate(
        &self,
        action_id: Uuid,
        matcher: &RowMatch,
        field: &str,
        value: Option<String>,
    ) -> usize {
        let touched = {
            let mut rows = self.rows.write().await;
            let mut touched = 0;
            for row in rows.values_mut().filter(|row| row.matches(matcher)) {
                row.fields.insert(field.to_string(), value.clone());
                touched += 1;
            }
            touched
        };

        trace!(%action_id, field, touched, "Propagated annotation");
        self.bus.emit_lossy(LedgerEvent::AnnotationUpdated {
            action_id,
            matcher: matcher.clone(),
            field: field.to_string(),
            value,
            timestamp: Utc::now(),
        });

        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl_common::db::CanonicalVariant;

    fn row(id: i64, project_id: i64, sample: &str, pos: i64, gene: &str) -> ViewRow {
        ViewRow::new(SampleOccurrence {
            id: VariantSampleId(id),
            project_id,
            sample: sample.to_string(),
            zygosity: Some("Heterozygous".to_string()),
            variant: CanonicalVariant {
                chr: "2".to_string(),
                pos,
                length: 1,
                reference: "C".to_string(),
                alternative: "T".to_string(),
                gene_symbol: gene.to_string(),
            },
        })
    }

    async fn cache() -> ViewCache {
        let cache = ViewCache::new(EventBus::new(16));
        cache.display(row(1, 10, "A", 100, "MSH2")).await;
        cache.display(row(2, 20, "B", 100, "MSH2")).await;
        cache.display(row(3, 20, "B", 500, "MSH6")).await;
        cache
    }

    #[tokio::test]
    async fn test_variant_update_reaches_every_sample() {
        let cache = cache().await;
        let variant = cache.row(VariantSampleId(1)).await.unwrap().occurrence.variant;
        let touched = cache
            .propagate(
                Uuid::new_v4(),
                &RowMatch::Variant(variant),
                "num_evaluated_as_type_3",
                Some("2".to_string()),
            )
            .await;

        assert_eq!(touched, 2);
        assert_eq!(
            cache.value(VariantSampleId(2), "num_evaluated_as_type_3").await,
            Some("2".to_string())
        );
        assert_eq!(cache.value(VariantSampleId(3), "num_evaluated_as_type_3").await, None);
    }

    #[tokio::test]
    async fn test_gene_and_project_matchers() {
        let cache = cache().await;
        let id = Uuid::new_v4();
        assert_eq!(
            cache
                .propagate(id, &RowMatch::Gene("MSH6".to_string()), "gene_comments", None)
                .await,
            1
        );
        assert_eq!(
            cache
                .propagate(id, &RowMatch::Project(20), "sample_of_interest", Some("1".to_string()))
                .await,
            2
        );
    }

    #[tokio::test]
    async fn test_propagate_broadcasts_even_without_rows() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let cache = ViewCache::new(bus);

        let touched = cache
            .propagate(
                Uuid::new_v4(),
                &RowMatch::Occurrence(VariantSampleId(42)),
                "check_insilico",
                Some("OK".to_string()),
            )
            .await;
        assert_eq!(touched, 0);

        match rx.recv().await.unwrap() {
            LedgerEvent::AnnotationUpdated { field, value, .. } => {
                assert_eq!(field, "check_insilico");
                assert_eq!(value.as_deref(), Some("OK"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
