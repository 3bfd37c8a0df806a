// In-memory card store.
//
// Backs the test suite and local development runs. Holds the pool behind a
// single mutex, which makes `conditional_reserve` a true compare-and-swap:
// the availability check and the write happen under one lock acquisition.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::draft::card::{normalize_user, CardRecord, CardStatus, Color};
use crate::store::{CardStore, ReserveOutcome, ResetReport, StoreError};

pub struct MemoryStore {
    rows: Mutex<Vec<CardRecord>>,
}

impl MemoryStore {
    pub fn new(rows: Vec<CardRecord>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    /// Snapshot of the whole pool, for assertions in tests.
    pub fn rows(&self) -> Vec<CardRecord> {
        self.rows.lock().expect("pool lock poisoned").clone()
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn fetch_by_color(&self, color: Color) -> Result<Vec<CardRecord>, StoreError> {
        let rows = self.rows.lock().expect("pool lock poisoned");
        Ok(rows.iter().filter(|r| r.color == color).cloned().collect())
    }

    async fn fetch_card(
        &self,
        name: &str,
        color: Color,
    ) -> Result<Option<CardRecord>, StoreError> {
        let rows = self.rows.lock().expect("pool lock poisoned");
        Ok(rows
            .iter()
            .find(|r| r.name == name && r.color == color)
            .cloned())
    }

    async fn conditional_reserve(
        &self,
        name: &str,
        color: Color,
        new_owner: &str,
    ) -> Result<ReserveOutcome, StoreError> {
        let mut rows = self.rows.lock().expect("pool lock poisoned");
        let Some(row) = rows.iter_mut().find(|r| r.name == name && r.color == color) else {
            return Ok(ReserveOutcome::NotFound);
        };

        if row.status == CardStatus::Reserved {
            return Ok(ReserveOutcome::Conflict {
                reserved_by: row.reserved_by.clone(),
            });
        }

        row.status = CardStatus::Reserved;
        row.reserved_by = Some(normalize_user(new_owner));
        Ok(ReserveOutcome::Reserved(row.clone()))
    }

    async fn reset_all(&self) -> Result<ResetReport, StoreError> {
        let mut rows = self.rows.lock().expect("pool lock poisoned");
        let mut cleared = 0;
        for row in rows.iter_mut() {
            if row.status == CardStatus::Reserved || row.reserved_by.is_some() {
                row.status = CardStatus::Available;
                row.reserved_by = None;
                cleared += 1;
            }
        }
        Ok(ResetReport {
            cleared,
            failures: Vec::new(),
        })
    }
}
