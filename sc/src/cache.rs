//! Local mirror of one remote table
//!
//! The grid is loaded in one bulk read on first access and then served from
//! memory. Writes only touch the local grid until they are flushed, first to
//! the snapshot file and then to the remote table in one batched write.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::address::{CellRef, GridRange};
use crate::error::Result;
use crate::executor::RateLimitedExecutor;
use crate::remote::{CellWrite, RemoteTable};
use crate::snapshot;

/// Identifies one remote table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableAddress {
    pub table_id: String,
    pub table_name: String,
}

impl TableAddress {
    pub fn new(table_id: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            table_name: table_name.into(),
        }
    }

    /// Snapshot file name for this table
    pub fn snapshot_file(&self) -> String {
        format!("{}.jsonl", snapshot::file_stem(&self.table_id, &self.table_name))
    }
}

impl fmt::Display for TableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table_id, self.table_name)
    }
}

/// Row-major grid of string cells; rows may be ragged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Cell value; blank and out-of-bounds cells are `None`
    pub fn get(&self, cell: CellRef) -> Option<&str> {
        self.rows
            .get(cell.row)
            .and_then(|row| row.get(cell.col))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Raw cell value, blank for out-of-bounds
    pub fn raw(&self, cell: CellRef) -> &str {
        self.rows
            .get(cell.row)
            .and_then(|row| row.get(cell.col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Set a cell, padding with blanks so it exists
    pub fn set(&mut self, cell: CellRef, value: String) {
        if self.rows.len() <= cell.row {
            self.rows.resize_with(cell.row + 1, Vec::new);
        }
        let row = &mut self.rows[cell.row];
        if row.len() <= cell.col {
            row.resize(cell.col + 1, String::new());
        }
        row[cell.col] = value;
    }

    /// Rectangular slice of the grid with blanks as `None`
    pub fn range(&self, range: &GridRange) -> Vec<Vec<Option<String>>> {
        let bounds = range.resolve(self.height(), self.width());
        bounds
            .rows
            .map(|r| {
                bounds
                    .cols
                    .clone()
                    .map(|c| self.get(CellRef::new(r, c)).map(str::to_string))
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    grid: Option<Grid>,
    dirty: bool,
}

/// Cached view of a single remote table
pub struct CellCache {
    address: TableAddress,
    snapshot_path: PathBuf,
    executor: Arc<RateLimitedExecutor>,
    remote: Arc<dyn RemoteTable>,
    state: Mutex<CacheState>,
}

impl fmt::Debug for CellCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellCache")
            .field("address", &self.address)
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl CellCache {
    /// Create a cache; nothing is read until first access
    pub fn new(
        address: TableAddress,
        cache_dir: &Path,
        executor: Arc<RateLimitedExecutor>,
        remote: Arc<dyn RemoteTable>,
    ) -> Self {
        let snapshot_path = cache_dir.join(address.snapshot_file());
        Self {
            address,
            snapshot_path,
            executor,
            remote,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn address(&self) -> &TableAddress {
        &self.address
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Read one cell; `None` for blank or out-of-bounds cells
    pub fn get_value(&self, cell: &str) -> Result<Option<String>> {
        let cell = CellRef::parse(cell)?;
        let mut state = self.lock();
        let grid = self.loaded(&mut state)?;
        Ok(grid.get(cell).map(str::to_string))
    }

    /// Write one cell locally and mark the cache dirty
    pub fn update_value(&self, cell: &str, value: impl Into<String>) -> Result<()> {
        let cell = CellRef::parse(cell)?;
        let mut state = self.lock();
        self.loaded(&mut state)?.set(cell, value.into());
        state.dirty = true;
        Ok(())
    }

    /// Read a rectangular range; out-of-range cells come back as `None`
    pub fn get_range(&self, a1_range: &str) -> Result<Vec<Vec<Option<String>>>> {
        let range = GridRange::parse(a1_range)?;
        let mut state = self.lock();
        let grid = self.loaded(&mut state)?;
        Ok(grid.range(&range))
    }

    /// Persist the grid to the snapshot file if it has unsaved changes
    pub fn flush_local(&self) -> Result<()> {
        let mut state = self.lock();
        self.flush_locked(&mut state)
    }

    /// Save locally, then push the listed cells to the remote table in one batch
    pub fn flush_to_remote<S: AsRef<str>>(&self, cells: &[S]) -> Result<serde_json::Value> {
        debug!(table = %self.address, count = cells.len(), "flush_to_remote: called");
        let writes = {
            let mut state = self.lock();
            self.flush_locked(&mut state)?;
            let grid = self.loaded(&mut state)?;

            let mut writes = Vec::with_capacity(cells.len());
            for cell in cells {
                let cell_ref = CellRef::parse(cell.as_ref())?;
                writes.push(CellWrite::new(cell_ref.to_a1(), grid.raw(cell_ref)));
            }
            writes
        };

        if writes.is_empty() {
            debug!("flush_to_remote: nothing to send");
            return Ok(serde_json::Value::Null);
        }

        let response = self.executor.execute(|credential| {
            self.remote
                .batch_write(credential, &self.address.table_id, &self.address.table_name, &writes)
        })?;

        info!(table = %self.address, cells = writes.len(), "Flushed cells to remote table");
        Ok(response)
    }

    /// Drop local state and load the full table from the remote store
    pub fn reload(&self) -> Result<()> {
        let mut state = self.lock();
        let grid = self.fetch()?;
        state.grid = Some(grid);
        state.dirty = false;
        Ok(())
    }

    /// Load the grid from the snapshot file without contacting the remote store
    ///
    /// Returns `false` when no snapshot exists.
    pub fn rehydrate(&self) -> Result<bool> {
        if !self.snapshot_path.exists() {
            return Ok(false);
        }
        let rows: Vec<Vec<String>> = snapshot::read_lines(&self.snapshot_path)?;
        let mut state = self.lock();
        info!(table = %self.address, rows = rows.len(), "Rehydrated cache from snapshot");
        state.grid = Some(Grid::from_rows(rows));
        state.dirty = false;
        Ok(true)
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().grid.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// (height, width) of the loaded grid
    pub fn dimensions(&self) -> Result<(usize, usize)> {
        let mut state = self.lock();
        let grid = self.loaded(&mut state)?;
        Ok((grid.height(), grid.width()))
    }

    fn loaded<'a>(&self, state: &'a mut CacheState) -> Result<&'a mut Grid> {
        if state.grid.is_none() {
            let grid = self.fetch()?;
            state.dirty = false;
            state.grid = Some(grid);
        }
        Ok(state.grid.get_or_insert_with(Grid::default))
    }

    fn fetch(&self) -> Result<Grid> {
        debug!(table = %self.address, "fetch: loading table from remote");
        let rows = self.executor.execute(|credential| {
            self.remote
                .read_all(credential, &self.address.table_id, &self.address.table_name)
        })?;
        info!(table = %self.address, rows = rows.len(), "Loaded table from remote");

        let grid = Grid::from_rows(rows);
        snapshot::write_lines(&self.snapshot_path, grid.rows())?;
        Ok(grid)
    }

    fn flush_locked(&self, state: &mut CacheState) -> Result<()> {
        if !state.dirty {
            return Ok(());
        }
        if let Some(grid) = &state.grid {
            snapshot::write_lines(&self.snapshot_path, grid.rows())?;
            debug!(table = %self.address, "flush_local: wrote snapshot");
        }
        state.dirty = false;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, CredentialPool};
    use crate::memory::MemoryRemote;
    use crate::remote::RemoteError;
    use proptest::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn executor() -> Arc<RateLimitedExecutor> {
        let pool = Arc::new(CredentialPool::new(vec![Credential::new("k1", "t1"), Credential::new("k2", "t2")]).unwrap());
        Arc::new(RateLimitedExecutor::new(pool).with_backoff_base(Duration::ZERO))
    }

    fn cache_with(remote: Arc<MemoryRemote>, dir: &Path) -> CellCache {
        CellCache::new(TableAddress::new("sheet-id", "Sheet1"), dir, executor(), remote)
    }

    fn seeded_remote() -> Arc<MemoryRemote> {
        let remote = Arc::new(MemoryRemote::new());
        remote.put_table(
            "sheet-id",
            "Sheet1",
            vec![
                vec!["name".to_string(), "price".to_string()],
                vec!["widget".to_string(), "".to_string(), "x".to_string()],
            ],
        );
        remote
    }

    #[test]
    fn test_lazy_load_reads_once() {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote();
        let cache = cache_with(remote.clone(), temp.path());

        assert!(!cache.is_loaded());
        assert_eq!(cache.get_value("A2").unwrap(), Some("widget".to_string()));
        assert_eq!(cache.get_value("B1").unwrap(), Some("price".to_string()));
        assert_eq!(remote.read_count(), 1);
        assert!(cache.snapshot_path().exists());
    }

    #[test]
    fn test_blank_and_out_of_bounds_are_none() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(seeded_remote(), temp.path());

        assert_eq!(cache.get_value("B2").unwrap(), None);
        assert_eq!(cache.get_value("B5").unwrap(), None);
        assert_eq!(cache.get_value("ZZ999").unwrap(), None);
    }

    #[test]
    fn test_untouched_empty_cache() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let cache = cache_with(remote, temp.path());

        assert_eq!(cache.get_value("B5").unwrap(), None);
        cache.update_value("A1", "X").unwrap();
        assert_eq!(cache.get_range("A1:A1").unwrap(), vec![vec![Some("X".to_string())]]);
    }

    #[test]
    fn test_read_your_write_without_flush() {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote();
        let cache = cache_with(remote.clone(), temp.path());

        cache.update_value("D7", "note").unwrap();
        assert!(cache.is_dirty());
        assert_eq!(cache.get_value("D7").unwrap(), Some("note".to_string()));
        assert_eq!(cache.dimensions().unwrap(), (7, 4));
        assert_eq!(remote.write_count(), 0);
    }

    #[test]
    fn test_flush_local_writes_snapshot() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(seeded_remote(), temp.path());

        cache.update_value("C1", "stock").unwrap();
        cache.flush_local().unwrap();
        assert!(!cache.is_dirty());

        let rows: Vec<Vec<String>> = snapshot::read_lines(cache.snapshot_path()).unwrap();
        assert_eq!(rows[0], vec!["name", "price", "stock"]);
    }

    #[test]
    fn test_flush_to_remote_round_trip() {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote();
        let cache = cache_with(remote.clone(), temp.path());

        cache.update_value("D2", "updated").unwrap();
        cache.update_value("E2", "19/10/2026 10:00:00").unwrap();
        cache.flush_to_remote(&["D2", "E2"]).unwrap();
        assert!(!cache.is_dirty());
        assert_eq!(remote.write_count(), 1);

        let fresh_dir = TempDir::new().unwrap();
        let fresh = cache_with(remote, fresh_dir.path());
        assert_eq!(fresh.get_value("D2").unwrap(), Some("updated".to_string()));
        assert_eq!(fresh.get_value("E2").unwrap(), Some("19/10/2026 10:00:00".to_string()));
    }

    #[test]
    fn test_flush_to_remote_retries_rate_limit() {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote();
        let cache = cache_with(remote.clone(), temp.path());
        cache.update_value("A3", "v").unwrap();

        remote.fail_next_writes(1, RemoteError::new(Some(429), "Too Many Requests"));
        cache.flush_to_remote(&["A3"]).unwrap();
        assert_eq!(remote.table("sheet-id", "Sheet1").unwrap()[2][0], "v");
    }

    #[test]
    fn test_flush_to_remote_failure_keeps_local_value() {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote();
        let cache = cache_with(remote.clone(), temp.path());
        cache.update_value("A3", "v").unwrap();

        remote.fail_next_writes(1, RemoteError::new(Some(400), "bad request"));
        assert!(cache.flush_to_remote(&["A3"]).is_err());
        assert_eq!(cache.get_value("A3").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn test_initial_load_failure_surfaces() {
        let temp = TempDir::new().unwrap();
        let remote = seeded_remote();
        remote.fail_next_reads(1, RemoteError::new(Some(500), "backend"));
        let cache = cache_with(remote, temp.path());

        assert!(cache.get_value("A1").is_err());
        // Next access retries the load
        assert_eq!(cache.get_value("A1").unwrap(), Some("name".to_string()));
    }

    #[test]
    fn test_get_range_shapes() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(seeded_remote(), temp.path());

        assert_eq!(
            cache.get_range("A:A").unwrap(),
            vec![vec![Some("name".to_string())], vec![Some("widget".to_string())]]
        );
        assert_eq!(
            cache.get_range("B1:C2").unwrap(),
            vec![vec![Some("price".to_string()), None], vec![None, Some("x".to_string())]]
        );
        // Unbounded columns use the widest row, so every row has the same width
        let all = cache.get_range("1:2").unwrap();
        assert!(all.iter().all(|row| row.len() == 3));
        assert_eq!(cache.get_range("F10:G11").unwrap(), vec![vec![None, None], vec![None, None]]);
    }

    #[test]
    fn test_rehydrate_without_remote() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(seeded_remote(), temp.path());
        cache.update_value("B2", "9.99").unwrap();
        cache.flush_local().unwrap();

        let offline = Arc::new(MemoryRemote::new());
        let rehydrated = cache_with(offline.clone(), temp.path());
        assert!(rehydrated.rehydrate().unwrap());
        assert_eq!(rehydrated.get_value("B2").unwrap(), Some("9.99".to_string()));
        assert_eq!(offline.read_count(), 0);
    }

    #[test]
    fn test_invalid_address() {
        let temp = TempDir::new().unwrap();
        let cache = cache_with(seeded_remote(), temp.path());
        assert!(cache.get_value("not a cell").is_err());
        assert!(cache.update_value("A0", "x").is_err());
    }

    #[test]
    fn test_concurrent_updates_are_serialized() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(cache_with(seeded_remote(), temp.path()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for row in 0..25 {
                        let cell = CellRef::new(row + i * 25, i).to_a1();
                        cache.update_value(&cell, format!("{}-{}", i, row)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8 {
            for row in 0..25 {
                let cell = CellRef::new(row + i * 25, i).to_a1();
                assert_eq!(cache.get_value(&cell).unwrap(), Some(format!("{}-{}", i, row)));
            }
        }
    }

    proptest! {
        #[test]
        fn prop_grid_never_panics(row in 0usize..500, col in 0usize..60, width in 0usize..5, height in 0usize..5) {
            let grid = Grid::from_rows(vec![vec!["v".to_string(); width]; height]);
            let cell = CellRef::new(row, col);
            let expected = if row < height && col < width { Some("v") } else { None };
            prop_assert_eq!(grid.get(cell), expected);

            let range = GridRange::parse(&format!("{}:{}", cell.to_a1(), CellRef::new(row + 2, col + 1).to_a1())).unwrap();
            let slice = grid.range(&range);
            prop_assert_eq!(slice.len(), 3);
            prop_assert!(slice.iter().all(|r| r.len() == 2));
        }

        #[test]
        fn prop_remote_round_trip(value in "[ -~]{1,40}", row in 0usize..50, col in 0usize..10) {
            let temp = TempDir::new().unwrap();
            let remote = Arc::new(MemoryRemote::new());
            let cache = cache_with(remote.clone(), temp.path());
            let cell = CellRef::new(row, col).to_a1();

            cache.update_value(&cell, value.clone()).unwrap();
            cache.flush_to_remote(&[cell.as_str()]).unwrap();

            let fresh_dir = TempDir::new().unwrap();
            let fresh = cache_with(remote, fresh_dir.path());
            prop_assert_eq!(fresh.get_value(&cell).unwrap(), Some(value));
        }
    }
}
