//! Highlander curation ledger
//!
//! Shared and private curation annotations attached to variants observed in
//! sequenced samples: pathogenicity classes, verification checks, comments
//! and "of interest" flags, with an append-only history per evaluation.

pub mod aggregate;
pub mod audit;
pub mod details;
pub mod identity;
pub mod ledger;
pub mod permission;
pub mod records;
pub mod verdict;
pub mod view_cache;

pub use ledger::{ActionOutcome, CommentTarget, CurationAction, Ledger, SessionConfig};
