//! Stream adapters
//!
//! This module provides adapters that read raw input tables and map them to the
//! typed source streams consumed by the synchronization engine.

mod action_log;
mod affect;

pub use action_log::{ActionLogAdapter, ActionStream};
pub use affect::{AffectAdapter, AffectStream};

use crate::error::SyncError;
use crate::table::Table;

/// Trait for table-to-stream adapters
pub trait StreamAdapter {
    /// Typed stream produced from one table
    type Output;

    /// Convert a raw table into a typed stream
    fn adapt(&self, table: &Table) -> Result<Self::Output, SyncError>;
}

/// True when a student id belongs to a test/debug account
pub(crate) fn is_excluded(student_id: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|id| id == student_id)
}
