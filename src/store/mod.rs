// Store adapter contract for the shared card pool.
//
// The pool lives in an external tabular store (a Google Sheet in production,
// an in-memory table in tests). The coordinator only ever talks to the pool
// through the `CardStore` trait, so the concurrency-control strategy is an
// implementation detail of each adapter.

pub mod memory;
pub mod sheets;

use async_trait::async_trait;
use thiserror::Error;

use crate::draft::card::{CardRecord, Color};

/// Errors surfaced by a store adapter.
///
/// `Unavailable` covers transient failures (network errors, timeouts, rate
/// limits) that the coordinator may retry. `Data` covers structural problems
/// with the backing sheet (missing columns, malformed rows) that retrying
/// will not fix.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("card store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed pool data: {0}")]
    Data(String),
}

/// Result of a conditional reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// The row was Available at write time and is now reserved; carries the
    /// updated record.
    Reserved(CardRecord),
    /// The row was already reserved at write time (by `reserved_by`, when
    /// the store knows who).
    Conflict { reserved_by: Option<String> },
    /// No row with that name and color exists.
    NotFound,
}

/// Outcome of a pool reset. `failures` lists rows that could not be cleared;
/// an empty list means the whole pool is Available again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResetReport {
    pub cleared: usize,
    pub failures: Vec<String>,
}

/// Row-level access to the shared card pool.
///
/// Reads require no coordination. `conditional_reserve` is the single point
/// that must be linearizable per card: two concurrent calls for the same row
/// must not both return `Reserved`.
#[async_trait]
pub trait CardStore: Send + Sync {
    /// All rows of the given color, in sheet order.
    async fn fetch_by_color(&self, color: Color) -> Result<Vec<CardRecord>, StoreError>;

    /// The row with the given name and color, if any. Card names are unique
    /// only within their color, so lookups are always color-scoped.
    async fn fetch_card(&self, name: &str, color: Color)
        -> Result<Option<CardRecord>, StoreError>;

    /// Reserve the named row for `new_owner`, contingent on it still being
    /// Available at write time.
    async fn conditional_reserve(
        &self,
        name: &str,
        color: Color,
        new_owner: &str,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Clear every row back to Available. Idempotent; not atomic across rows.
    async fn reset_all(&self) -> Result<ResetReport, StoreError>;
}
