//! # Highlander Common Library
//!
//! Shared code for the Highlander curation ledger:
//! - Error taxonomy
//! - Configuration loading
//! - Database initialization, schema sync and migrations
//! - Ledger events and the EventBus
//! - Lock retry and time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod retry;
pub mod time;

pub use error::{Error, Result};
