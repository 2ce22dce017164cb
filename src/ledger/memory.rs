//! In-process ledger. Used when no spreadsheet is configured and by tests.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Ledger, Sheet};

#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<Sheet, Vec<Vec<String>>>>,
    headers: Mutex<HashMap<Sheet, Vec<String>>>,
    failing: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, to exercise retry paths.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of a sheet's data rows.
    pub fn rows(&self, sheet: Sheet) -> Vec<Vec<String>> {
        self.lock_rows().get(&sheet).cloned().unwrap_or_default()
    }

    pub fn header(&self, sheet: Sheet) -> Option<Vec<String>> {
        self.headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sheet)
            .cloned()
    }

    /// Seed a sheet, e.g. the hand-maintained KT sheet.
    pub fn push_row(&self, sheet: Sheet, row: Vec<String>) {
        self.lock_rows().entry(sheet).or_default().push(row);
    }

    fn lock_rows(&self) -> MutexGuard<'_, HashMap<Sheet, Vec<Vec<String>>>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("ledger unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn read_rows(&self, sheet: Sheet) -> Result<Vec<Vec<String>>> {
        self.check()?;
        Ok(self.rows(sheet))
    }

    async fn insert_top(&self, sheet: Sheet, row: Vec<String>) -> Result<()> {
        self.check()?;
        self.lock_rows().entry(sheet).or_default().insert(0, row);
        Ok(())
    }

    async fn update_cell(
        &self,
        sheet: Sheet,
        index: usize,
        column: usize,
        value: String,
    ) -> Result<()> {
        self.check()?;
        let mut rows = self.lock_rows();
        let Some(row) = rows.get_mut(&sheet).and_then(|r| r.get_mut(index)) else {
            bail!("row {} not found in {}", index + 2, sheet.title());
        };
        if row.len() <= column {
            row.resize(column + 1, String::new());
        }
        row[column] = value;
        Ok(())
    }

    async fn delete_row(&self, sheet: Sheet, index: usize) -> Result<()> {
        self.check()?;
        let mut rows = self.lock_rows();
        match rows.get_mut(&sheet) {
            Some(r) if index < r.len() => {
                r.remove(index);
                Ok(())
            }
            _ => bail!("row {} not found in {}", index + 2, sheet.title()),
        }
    }

    async fn write_header(&self, sheet: Sheet) -> Result<()> {
        self.check()?;
        self.headers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sheet, sheet.header().iter().map(|h| h.to_string()).collect());
        Ok(())
    }
}
