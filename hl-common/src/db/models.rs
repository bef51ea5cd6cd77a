//! Database models shared by the ledger components

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque per-sample variant reference (`variant_sample.variant_sample_id`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantSampleId(pub i64);

impl fmt::Display for VariantSampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A genomic variant independent of the sample it was observed in
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalVariant {
    pub chr: String,
    pub pos: i64,
    pub length: i64,
    pub reference: String,
    pub alternative: String,
    /// Empty when the variant is intergenic
    pub gene_symbol: String,
}

impl fmt::Display for CanonicalVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}-{}",
            self.chr, self.pos, self.length, self.reference, self.alternative, self.gene_symbol
        )
    }
}

/// One sample's observation of a canonical variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleOccurrence {
    pub id: VariantSampleId,
    pub project_id: i64,
    pub sample: String,
    pub zygosity: Option<String>,
    pub variant: CanonicalVariant,
}
