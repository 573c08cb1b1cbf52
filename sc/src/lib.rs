//! SheetCache - local mirror of rate-limited remote tables
//!
//! Keeps a full copy of each remote table in memory, serves reads and writes
//! locally, and pushes changed cells back in one batched write per flush.
//! Remote calls go through a shared pool of interchangeable credentials and
//! are retried on a fresh credential when the remote side rate-limits.
//!
//! # Architecture
//!
//! ```text
//! CacheRegistry
//! └── CellCache (one per table id + table name)
//!     ├── grid (rows of string cells)
//!     ├── {cache_dir}/{id}_{name}.jsonl   # durable snapshot
//!     └── RateLimitedExecutor
//!         ├── CredentialPool
//!         └── RemoteTable (SheetsClient, MemoryRemote)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sheetcache::{CacheConfig, CacheRegistry, SheetsClient};
//!
//! let config = CacheConfig::load(None)?;
//! let remote = Arc::new(SheetsClient::new(&config.api_url)?);
//! let registry = CacheRegistry::from_config(&config, remote)?;
//! let cache = registry.get_or_create("1BxiMV...", "Sheet1");
//! cache.update_value("D2", "updated")?;
//! cache.flush_to_remote(&["D2"])?;
//! ```

pub mod address;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod memory;
pub mod registry;
pub mod remote;
pub mod sheets;
pub mod snapshot;

pub use address::{CellRef, GridRange, column_index, column_letters};
pub use cache::{CellCache, Grid, TableAddress};
pub use config::CacheConfig;
pub use credentials::{Credential, CredentialPool, PoolStatus};
pub use error::{CacheError, Result};
pub use executor::RateLimitedExecutor;
pub use memory::MemoryRemote;
pub use registry::CacheRegistry;
pub use remote::{CellWrite, RemoteError, RemoteTable};
pub use sheets::SheetsClient;
