//! Directory of cell caches, one per remote table
//!
//! The registry is an explicit object handed to every component that needs
//! table access. It shares one credential pool and executor between all of
//! its caches, so a rotation triggered by one table is seen by every other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::cache::{CellCache, TableAddress};
use crate::config::CacheConfig;
use crate::credentials::CredentialPool;
use crate::error::{CacheError, Result};
use crate::executor::RateLimitedExecutor;
use crate::remote::RemoteTable;

pub struct CacheRegistry {
    cache_dir: PathBuf,
    executor: Arc<RateLimitedExecutor>,
    remote: Arc<dyn RemoteTable>,
    caches: Mutex<HashMap<TableAddress, Arc<CellCache>>>,
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("cache_dir", &self.cache_dir)
            .field("tables", &self.len())
            .finish()
    }
}

impl CacheRegistry {
    pub fn new(cache_dir: impl Into<PathBuf>, executor: Arc<RateLimitedExecutor>, remote: Arc<dyn RemoteTable>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            executor,
            remote,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Build the pool, executor and registry described by `config`
    ///
    /// Fails when the credentials directory is missing or empty.
    pub fn from_config(config: &CacheConfig, remote: Arc<dyn RemoteTable>) -> Result<Self> {
        debug!(?config, "CacheRegistry::from_config: called");
        let pool = CredentialPool::from_dir(&config.credentials_dir)?.with_cooldown(config.credential_cooldown());
        let executor = RateLimitedExecutor::new(Arc::new(pool))
            .with_max_attempts(config.max_attempts)
            .with_backoff_base(config.backoff_base());
        Ok(Self::new(&config.cache_dir, Arc::new(executor), remote))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn executor(&self) -> &Arc<RateLimitedExecutor> {
        &self.executor
    }

    /// Return the cache for a table, creating it on first use
    pub fn get_or_create(&self, table_id: &str, table_name: &str) -> Arc<CellCache> {
        let address = TableAddress::new(table_id, table_name);
        let mut caches = self.lock();
        caches
            .entry(address)
            .or_insert_with_key(|address| {
                info!(table = %address, "Registering table cache");
                Arc::new(CellCache::new(
                    address.clone(),
                    &self.cache_dir,
                    self.executor.clone(),
                    self.remote.clone(),
                ))
            })
            .clone()
    }

    /// Return the cache for a registered table
    pub fn get(&self, table_id: &str, table_name: &str) -> Result<Arc<CellCache>> {
        self.lock()
            .get(&TableAddress::new(table_id, table_name))
            .cloned()
            .ok_or_else(|| CacheError::NotFound {
                table_id: table_id.to_string(),
                table_name: table_name.to_string(),
            })
    }

    /// Drop a cache; its snapshot file is left on disk
    pub fn remove(&self, table_id: &str, table_name: &str) -> Option<Arc<CellCache>> {
        self.lock().remove(&TableAddress::new(table_id, table_name))
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Addresses of every registered table, sorted
    pub fn addresses(&self) -> Vec<TableAddress> {
        let mut addresses: Vec<TableAddress> = self.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_value(&self, table_id: &str, table_name: &str, cell: &str) -> Result<Option<String>> {
        self.get(table_id, table_name)?.get_value(cell)
    }

    pub fn update_value(&self, table_id: &str, table_name: &str, cell: &str, value: impl Into<String>) -> Result<()> {
        self.get(table_id, table_name)?.update_value(cell, value)
    }

    pub fn get_range(&self, table_id: &str, table_name: &str, range: &str) -> Result<Vec<Vec<Option<String>>>> {
        self.get(table_id, table_name)?.get_range(range)
    }

    pub fn flush_to_remote<S: AsRef<str>>(
        &self,
        table_id: &str,
        table_name: &str,
        cells: &[S],
    ) -> Result<serde_json::Value> {
        self.get(table_id, table_name)?.flush_to_remote(cells)
    }

    /// Save every dirty cache to its snapshot file
    pub fn flush_all_local(&self) -> Result<()> {
        let caches: Vec<Arc<CellCache>> = self.lock().values().cloned().collect();
        for cache in caches {
            cache.flush_local()?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TableAddress, Arc<CellCache>>> {
        self.caches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::memory::MemoryRemote;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(dir: &Path, remote: Arc<MemoryRemote>) -> CacheRegistry {
        let pool = Arc::new(CredentialPool::new(vec![Credential::new("k", "t")]).unwrap());
        let executor = Arc::new(RateLimitedExecutor::new(pool).with_backoff_base(Duration::ZERO));
        CacheRegistry::new(dir, executor, remote)
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let registry = registry(temp.path(), Arc::new(MemoryRemote::new()));

        let a = registry.get_or_create("id", "Sheet1");
        let b = registry.get_or_create("id", "Sheet1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        registry.get_or_create("id", "Sheet2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_instance() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(registry(temp.path(), Arc::new(MemoryRemote::new())));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("id", "Sheet1"))
            })
            .collect();
        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(caches.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_get_unregistered_is_not_found() {
        let temp = TempDir::new().unwrap();
        let registry = registry(temp.path(), Arc::new(MemoryRemote::new()));

        let err = registry.get("id", "Missing").unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
        assert!(registry.get_value("id", "Missing", "A1").is_err());
        assert!(registry.update_value("id", "Missing", "A1", "x").is_err());
    }

    #[test]
    fn test_proxies_delegate() {
        let temp = TempDir::new().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let registry = registry(temp.path(), remote.clone());
        registry.get_or_create("id", "Sheet1");

        registry.update_value("id", "Sheet1", "B2", "7").unwrap();
        assert_eq!(registry.get_value("id", "Sheet1", "B2").unwrap(), Some("7".to_string()));
        assert_eq!(
            registry.get_range("id", "Sheet1", "B2:B2").unwrap(),
            vec![vec![Some("7".to_string())]]
        );
        registry.flush_to_remote("id", "Sheet1", &["B2"]).unwrap();
        assert_eq!(remote.table("id", "Sheet1").unwrap()[1][1], "7");
    }

    #[test]
    fn test_remove_keeps_snapshot() {
        let temp = TempDir::new().unwrap();
        let registry = registry(temp.path(), Arc::new(MemoryRemote::new()));
        let cache = registry.get_or_create("id", "Sheet1");
        cache.update_value("A1", "x").unwrap();
        cache.flush_local().unwrap();

        assert!(registry.remove("id", "Sheet1").is_some());
        assert!(registry.is_empty());
        assert!(cache.snapshot_path().exists());

        registry.get_or_create("id", "Other");
        registry.clear();
        assert!(registry.addresses().is_empty());
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let temp = TempDir::new().unwrap();
        let config = CacheConfig {
            cache_dir: temp.path().join("cache"),
            credentials_dir: temp.path().join("keys"),
            ..CacheConfig::default()
        };
        let remote: Arc<dyn RemoteTable> = Arc::new(MemoryRemote::new());

        let err = CacheRegistry::from_config(&config, remote.clone()).unwrap_err();
        assert!(err.is_config());

        fs::create_dir_all(&config.credentials_dir).unwrap();
        fs::write(config.credentials_dir.join("one.json"), r#"{"access_token": "a"}"#).unwrap();
        let registry = CacheRegistry::from_config(&config, remote).unwrap();
        assert_eq!(registry.executor().pool().len(), 1);
        assert_eq!(registry.cache_dir(), config.cache_dir.as_path());
    }
}
