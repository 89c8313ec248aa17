//! Statistics store
//!
//! One SQLite file per Maildir holding serialized counters:
//! - `word_counters`: `(class, word) -> sketch` of mail ids containing the word
//! - `class_totals`: `class -> sketch` of all mail ids learned under the class
//! - `verdicts`: `mail id -> class` last assigned by the lifecycle controller
//!
//! Writes are serialized per store; reads go through a [`Snapshot`] so one
//! classification sees one consistent state.

pub mod sqlite;

pub use sqlite::{Snapshot, StatsStore};

use crate::sketch::HyperLogLog;

/// Counter type persisted in the store
pub type Counter = HyperLogLog;
