//! Ledger events and EventBus
//!
//! Successful curation writes are broadcast so every on-screen table showing
//! the same variant, gene or sample can refresh without re-querying storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::models::{CanonicalVariant, VariantSampleId};

/// Which displayed rows an update applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key")]
pub enum RowMatch {
    /// One per-sample row
    Occurrence(VariantSampleId),
    /// Every row carrying the canonical variant
    Variant(CanonicalVariant),
    /// Every row in the gene
    Gene(String),
    /// Every row of the project (sample-scoped records)
    Project(i64),
    /// Every row of the sample name
    Sample(String),
}

/// Ledger event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    /// An annotation field changed
    AnnotationUpdated {
        /// Curation action that produced the change
        action_id: Uuid,
        matcher: RowMatch,
        /// Column name as displayed (e.g. `check_insilico_username`)
        field: String,
        /// New value, None for unset
        value: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An annotation record was created lazily on first write
    RecordCreated {
        family: String,
        record_id: i64,
        actor: String,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate counters were recomputed for a canonical variant
    CountersRecomputed {
        variant: CanonicalVariant,
        /// Counts for classes I to V
        counts: [i64; 5],
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for ledger events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LedgerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: LedgerEvent) -> Result<usize, broadcast::error::SendError<LedgerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LedgerEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
