//! Audit notes and their write-back
//!
//! Every processed row gets a note and a timestamp in the main table. Workers
//! record them here; the scheduler flushes them to the remote table once per
//! batch. A failed flush puts the mutations back so the next flush retries
//! them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::row::{RowConfig, RowError, RowLoader};

/// Format of the last-update cell
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// File name of the processed-rows snapshot in the cache dir
pub const ROWS_SNAPSHOT: &str = "rows.jsonl";

/// Current local time in [`TIMESTAMP_FORMAT`]
pub fn now_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Note and timestamp waiting to reach the remote table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub note: String,
    pub timestamp: String,
}

impl PendingMutation {
    pub fn new(note: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            note: note.into(),
            timestamp: timestamp.into(),
        }
    }
}

/// Pending audit mutations of the main table
pub struct AuditLedger {
    loader: Arc<RowLoader>,
    pending: Mutex<BTreeMap<usize, PendingMutation>>,
    rows: Mutex<BTreeMap<usize, RowConfig>>,
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("table", self.loader.table())
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl AuditLedger {
    pub fn new(loader: Arc<RowLoader>) -> Self {
        Self {
            loader,
            pending: Mutex::new(BTreeMap::new()),
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    /// Queue a note for a row and write it into the main cache
    ///
    /// The mutation stays queued even when the cache write fails; the next
    /// flush writes it again.
    pub fn record(&self, index: usize, mutation: PendingMutation) -> Result<(), RowError> {
        debug!(index, "record: called");
        self.lock_pending().insert(index, mutation.clone());
        self.apply(index, &mutation)
    }

    /// Keep a loaded row for the rows snapshot
    pub fn remember_row(&self, row: RowConfig) {
        self.lock_rows().insert(row.index, row);
    }

    pub fn pending_len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock_pending().is_empty()
    }

    /// Copy of the queued mutations
    pub fn pending(&self) -> BTreeMap<usize, PendingMutation> {
        self.lock_pending().clone()
    }

    /// Path of the processed-rows snapshot
    pub fn rows_snapshot_path(&self) -> PathBuf {
        self.loader.registry().cache_dir().join(ROWS_SNAPSHOT)
    }

    /// Push every queued mutation to the remote table in one batched write
    ///
    /// Returns the number of rows flushed. On failure the mutations are merged
    /// back; a mutation recorded for the same row in the meantime is kept.
    pub fn flush(&self) -> Result<usize, RowError> {
        let batch = std::mem::take(&mut *self.lock_pending());
        if batch.is_empty() {
            debug!("flush: nothing pending");
            return Ok(0);
        }
        debug!(rows = batch.len(), "flush: called");

        match self.push(&batch) {
            Ok(()) => {
                info!(rows = batch.len(), "Flushed audit notes");
                self.update_rows(&batch);
                if let Err(e) = self.write_rows_snapshot() {
                    warn!(error = %e, "Failed to write rows snapshot");
                }
                Ok(batch.len())
            }
            Err(e) => {
                error!(rows = batch.len(), error = %e, "Failed to flush audit notes, requeueing");
                let mut pending = self.lock_pending();
                for (index, mutation) in batch {
                    pending.entry(index).or_insert(mutation);
                }
                Err(e)
            }
        }
    }

    /// Write the processed-rows snapshot
    pub fn write_rows_snapshot(&self) -> Result<(), RowError> {
        let rows: Vec<RowConfig> = self.lock_rows().values().cloned().collect();
        sheetcache::snapshot::write_lines(&self.rows_snapshot_path(), &rows)?;
        debug!(rows = rows.len(), "write_rows_snapshot: done");
        Ok(())
    }

    fn push(&self, batch: &BTreeMap<usize, PendingMutation>) -> Result<(), RowError> {
        // The main table may have been reloaded since the notes were recorded
        let mut cells = Vec::with_capacity(batch.len() * 2);
        for (&index, mutation) in batch {
            self.apply(index, mutation)?;
            let (note_cell, stamp_cell) = self.loader.note_cells(index);
            cells.push(note_cell);
            cells.push(stamp_cell);
        }
        self.loader.main_cache().flush_to_remote(&cells)?;
        Ok(())
    }

    fn apply(&self, index: usize, mutation: &PendingMutation) -> Result<(), RowError> {
        let (note_cell, stamp_cell) = self.loader.note_cells(index);
        let cache = self.loader.main_cache();
        cache.update_value(&note_cell, mutation.note.as_str())?;
        cache.update_value(&stamp_cell, mutation.timestamp.as_str())?;
        Ok(())
    }

    fn update_rows(&self, batch: &BTreeMap<usize, PendingMutation>) {
        let mut rows = self.lock_rows();
        for (index, mutation) in batch {
            if let Some(row) = rows.get_mut(index) {
                row.note = Some(mutation.note.clone());
                row.last_update = Some(mutation.timestamp.clone());
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<usize, PendingMutation>> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_rows(&self) -> MutexGuard<'_, BTreeMap<usize, RowConfig>> {
        self.rows.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ColumnLayout;
    use sheetcache::{CacheRegistry, Credential, CredentialPool, MemoryRemote, RateLimitedExecutor, RemoteError, TableAddress};
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<MemoryRemote>, AuditLedger) {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        remote.put_table(
            "main",
            "Sheet1",
            vec![vec!["#".to_string()], vec![String::new(), "1".to_string()], vec![String::new(), "1".to_string()]],
        );
        let pool = Arc::new(CredentialPool::new(vec![Credential::new("k", "t")]).unwrap());
        let executor = Arc::new(RateLimitedExecutor::new(pool).with_backoff_base(Duration::ZERO));
        let registry = Arc::new(CacheRegistry::new(temp.path(), executor, remote.clone()));
        let loader = RowLoader::new(registry, TableAddress::new("main", "Sheet1"), ColumnLayout::default(), 0.0).unwrap();
        (temp, remote, AuditLedger::new(Arc::new(loader)))
    }

    fn cell(remote: &MemoryRemote, row: usize, col: usize) -> String {
        let table = remote.table("main", "Sheet1").unwrap();
        table.get(row).and_then(|r| r.get(col)).cloned().unwrap_or_default()
    }

    #[test]
    fn test_now_stamp_format() {
        let stamp = now_stamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&stamp, TIMESTAMP_FORMAT).is_ok(), "{}", stamp);
    }

    #[test]
    fn test_record_writes_cache_and_queues() {
        let (_temp, remote, ledger) = setup();
        ledger.record(2, PendingMutation::new("ok", "01/01/2026 00:00:00")).unwrap();

        assert_eq!(ledger.pending_len(), 1);
        let cache = ledger.loader.main_cache();
        assert_eq!(cache.get_value("D2").unwrap().as_deref(), Some("ok"));
        assert!(cache.is_dirty());
        // Nothing remote yet
        assert_eq!(remote.write_count(), 0);
    }

    #[test]
    fn test_flush_pushes_all_rows_in_one_write() {
        let (_temp, remote, ledger) = setup();
        ledger.record(2, PendingMutation::new("first", "t1")).unwrap();
        ledger.record(3, PendingMutation::new("second", "t2")).unwrap();

        assert_eq!(ledger.flush().unwrap(), 2);
        assert!(!ledger.has_pending());
        assert_eq!(remote.write_count(), 1);
        assert_eq!(cell(&remote, 1, 3), "first");
        assert_eq!(cell(&remote, 1, 4), "t1");
        assert_eq!(cell(&remote, 2, 3), "second");

        // Empty flush does not touch the remote
        assert_eq!(ledger.flush().unwrap(), 0);
        assert_eq!(remote.write_count(), 1);
    }

    #[test]
    fn test_failed_flush_requeues_and_newer_wins() {
        let (_temp, remote, ledger) = setup();
        ledger.record(2, PendingMutation::new("old", "t1")).unwrap();
        ledger.record(3, PendingMutation::new("keep", "t1")).unwrap();
        remote.fail_next_writes(1, RemoteError::new(Some(500), "backend error"));

        assert!(ledger.flush().is_err());
        assert_eq!(ledger.pending_len(), 2);

        ledger.record(2, PendingMutation::new("new", "t2")).unwrap();
        let pending = ledger.pending();
        assert_eq!(pending[&2].note, "new");
        assert_eq!(pending[&3].note, "keep");

        assert_eq!(ledger.flush().unwrap(), 2);
        assert_eq!(cell(&remote, 1, 3), "new");
        assert_eq!(cell(&remote, 2, 3), "keep");
    }

    #[test]
    fn test_flush_survives_main_reload() {
        let (_temp, remote, ledger) = setup();
        ledger.record(2, PendingMutation::new("note", "t")).unwrap();
        ledger.loader.refresh().unwrap();

        ledger.flush().unwrap();
        assert_eq!(cell(&remote, 1, 3), "note");
    }

    #[test]
    fn test_rows_snapshot() {
        let (_temp, _remote, ledger) = setup();
        let row = RowConfig {
            index: 2,
            name: "Gold".to_string(),
            link: "https://m.test/offer/a".to_string(),
            offer_id: "a".to_string(),
            mode: crate::row::CompareMode::Off,
            compare_url: None,
            floor: 1.0,
            ceiling: None,
            stock: 1,
            blacklist: Vec::new(),
            jitter: crate::row::JitterBand {
                delta_min: 0.0,
                delta_max: 0.0,
                precision: 2,
            },
            unit_stock: 1,
            min_units_per_order: None,
            relax_secs: 0.0,
            note: None,
            last_update: None,
        };
        ledger.remember_row(row);
        ledger.record(2, PendingMutation::new("done", "t")).unwrap();
        ledger.flush().unwrap();

        let rows: Vec<RowConfig> = sheetcache::snapshot::read_lines(&ledger.rows_snapshot_path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].note.as_deref(), Some("done"));
        assert_eq!(rows[0].last_update.as_deref(), Some("t"));
    }
}
