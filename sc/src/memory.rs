//! In-process remote table
//!
//! Backs tables with plain vectors. Used by tests and offline tooling; it
//! can also be told to fail the next N reads or writes with a given error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::address::{CellRef, GridRange};
use crate::cache::{Grid, TableAddress};
use crate::credentials::Credential;
use crate::remote::{CellWrite, RemoteError, RemoteTable};

#[derive(Debug, Default)]
struct Failures {
    reads: Vec<RemoteError>,
    writes: Vec<RemoteError>,
}

/// A [`RemoteTable`] kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryRemote {
    tables: Mutex<HashMap<TableAddress, Grid>>,
    failures: Mutex<Failures>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of a table
    pub fn put_table(&self, table_id: &str, table_name: &str, rows: Vec<Vec<String>>) {
        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        tables.insert(TableAddress::new(table_id, table_name), Grid::from_rows(rows));
    }

    /// Current contents of a table
    pub fn table(&self, table_id: &str, table_name: &str) -> Option<Vec<Vec<String>>> {
        let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        tables
            .get(&TableAddress::new(table_id, table_name))
            .map(|grid| grid.rows().to_vec())
    }

    /// Fail the next `count` read calls with `error`
    pub fn fail_next_reads(&self, count: usize, error: RemoteError) {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.reads.extend(std::iter::repeat_n(error, count));
    }

    /// Fail the next `count` write calls with `error`
    pub fn fail_next_writes(&self, count: usize, error: RemoteError) {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        failures.writes.extend(std::iter::repeat_n(error, count));
    }

    /// Number of read calls seen, including failed ones
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls seen, including failed ones
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn take_read_failure(&self) -> Option<RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        (!failures.reads.is_empty()).then(|| failures.reads.remove(0))
    }

    fn take_write_failure(&self) -> Option<RemoteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        (!failures.writes.is_empty()).then(|| failures.writes.remove(0))
    }
}

impl RemoteTable for MemoryRemote {
    fn read_all(
        &self,
        _credential: &Credential,
        table_id: &str,
        table_name: &str,
    ) -> Result<Vec<Vec<String>>, RemoteError> {
        if let Some(err) = self.take_read_failure() {
            return Err(err);
        }
        Ok(self.table(table_id, table_name).unwrap_or_default())
    }

    fn read_range(
        &self,
        _credential: &Credential,
        table_id: &str,
        table_name: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, RemoteError> {
        if let Some(err) = self.take_read_failure() {
            return Err(err);
        }
        let range = GridRange::parse(range).map_err(|e| RemoteError::new(Some(400), e.to_string()))?;
        let tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        let rows = tables
            .get(&TableAddress::new(table_id, table_name))
            .map(|grid| {
                grid.range(&range)
                    .into_iter()
                    .map(|row| row.into_iter().map(Option::unwrap_or_default).collect())
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn batch_write(
        &self,
        _credential: &Credential,
        table_id: &str,
        table_name: &str,
        writes: &[CellWrite],
    ) -> Result<serde_json::Value, RemoteError> {
        if let Some(err) = self.take_write_failure() {
            return Err(err);
        }

        let mut cells = Vec::with_capacity(writes.len());
        for write in writes {
            let cell = CellRef::parse(&write.range).map_err(|e| RemoteError::new(Some(400), e.to_string()))?;
            cells.push((cell, write.value.clone()));
        }

        let mut tables = self.tables.lock().unwrap_or_else(|p| p.into_inner());
        let grid = tables.entry(TableAddress::new(table_id, table_name)).or_default();
        for (cell, value) in cells {
            grid.set(cell, value);
        }

        Ok(serde_json::json!({
            "spreadsheetId": table_id,
            "totalUpdatedCells": writes.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred() -> Credential {
        Credential::new("k", "t")
    }

    #[test]
    fn test_missing_table_reads_empty() {
        let remote = MemoryRemote::new();
        assert!(remote.read_all(&cred(), "id", "Sheet1").unwrap().is_empty());
        assert_eq!(remote.read_count(), 1);
    }

    #[test]
    fn test_batch_write_creates_cells() {
        let remote = MemoryRemote::new();
        let response = remote
            .batch_write(&cred(), "id", "Sheet1", &[CellWrite::new("B2", "x"), CellWrite::new("A1", "y")])
            .unwrap();
        assert_eq!(response["totalUpdatedCells"], 2);

        let table = remote.table("id", "Sheet1").unwrap();
        assert_eq!(table, vec![vec!["y".to_string()], vec!["".to_string(), "x".to_string()]]);
    }

    #[test]
    fn test_read_range() {
        let remote = MemoryRemote::new();
        remote.put_table("id", "S", vec![vec!["a".into(), "b".into()], vec!["c".into()]]);
        let rows = remote.read_range(&cred(), "id", "S", "B1:B2").unwrap();
        assert_eq!(rows, vec![vec!["b".to_string()], vec!["".to_string()]]);
    }

    #[test]
    fn test_scripted_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next_reads(2, RemoteError::new(Some(429), "slow down"));

        assert!(remote.read_all(&cred(), "id", "S").is_err());
        assert!(remote.read_all(&cred(), "id", "S").is_err());
        assert!(remote.read_all(&cred(), "id", "S").is_ok());
        assert_eq!(remote.read_count(), 3);
        assert_eq!(remote.write_count(), 0);
    }
}
