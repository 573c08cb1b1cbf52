//! Credential pool with random selection and rotation on failure
//!
//! The pool owns every credential and its failed state. Callers get a
//! [`Credential`] lease for one attempt and hand it back through
//! [`CredentialPool::rotate`] when the remote side rejects it.

use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};

/// One set of access rights for the remote store
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    id: String,
    secret: String,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            index: 0,
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// Identifier (the key file stem for file-based credentials)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bearer secret sent with each request
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// On-disk shape of a credential file
#[derive(Debug, Deserialize)]
struct CredentialFile {
    access_token: String,
}

/// Snapshot of the pool for operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub total: usize,
    pub current: Option<String>,
    pub failed: Vec<String>,
    pub available: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    current: Option<usize>,
    failed: HashMap<usize, Instant>,
}

/// Interchangeable credentials shared by every cache in the process
#[derive(Debug)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    cooldown: Option<Duration>,
    state: Mutex<PoolState>,
}

impl CredentialPool {
    /// Build a pool from in-memory credentials
    pub fn new(credentials: Vec<Credential>) -> Result<Self> {
        if credentials.is_empty() {
            return Err(CacheError::Config("credential pool needs at least one credential".to_string()));
        }

        let credentials = credentials
            .into_iter()
            .enumerate()
            .map(|(index, mut credential)| {
                credential.index = index;
                credential
            })
            .collect();

        Ok(Self {
            credentials,
            cooldown: None,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Load every `*.json` credential file from a directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        debug!(?dir, "CredentialPool::from_dir: called");
        if !dir.is_dir() {
            return Err(CacheError::MissingCredentialsDir(dir.to_path_buf()));
        }

        let pattern = dir.join("*.json");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|e| CacheError::Config(e.to_string()))?;

        let mut credentials = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| CacheError::Io(e.into_error()))?;
            if !path.is_file() {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let file: CredentialFile = serde_json::from_str(&content).map_err(|e| {
                CacheError::Config(format!("invalid credential file {}: {}", path.display(), e))
            })?;
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            credentials.push(Credential::new(id, file.access_token));
        }

        if credentials.is_empty() {
            return Err(CacheError::NoCredentials(dir.to_path_buf()));
        }

        info!(count = credentials.len(), "Loaded credential(s)");
        Self::new(credentials)
    }

    /// Let failed credentials back into rotation after `cooldown`
    pub fn with_cooldown(mut self, cooldown: Option<Duration>) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Pick a random credential that is not marked failed and make it current
    ///
    /// If every credential is failed the failed set is cleared first, so
    /// selection never comes back empty.
    pub fn select(&self) -> Credential {
        let mut state = self.lock();
        self.select_locked(&mut state)
    }

    /// Current credential, selecting one if none is held yet
    pub fn current(&self) -> Credential {
        let mut state = self.lock();
        match state.current {
            Some(index) => self.credentials[index].clone(),
            None => self.select_locked(&mut state),
        }
    }

    /// Mark `failed` as failed and move to a different credential
    ///
    /// When another thread already rotated away from `failed`, the current
    /// credential is kept.
    pub fn rotate(&self, failed: &Credential) -> Credential {
        let mut state = self.lock();
        warn!(credential = %failed.id, "Marking credential as failed");
        state.failed.insert(failed.index, Instant::now());

        match state.current {
            Some(current) if current != failed.index => {
                debug!(current = %self.credentials[current].id, "rotate: already rotated by another caller");
                self.credentials[current].clone()
            }
            _ => {
                let next = self.select_locked(&mut state);
                info!(credential = %next.id, "Rotated to new credential");
                next
            }
        }
    }

    /// Give every failed credential another chance
    pub fn reset_failed(&self) {
        self.lock().failed.clear();
        info!("Failed credentials list has been reset");
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        let mut failed: Vec<String> = state.failed.keys().map(|i| self.credentials[*i].id.clone()).collect();
        failed.sort();

        PoolStatus {
            total: self.credentials.len(),
            current: state.current.map(|i| self.credentials[i].id.clone()),
            available: self.credentials.len() - state.failed.len(),
            failed,
        }
    }

    fn select_locked(&self, state: &mut PoolState) -> Credential {
        if let Some(cooldown) = self.cooldown {
            state.failed.retain(|_, failed_at| failed_at.elapsed() < cooldown);
        }

        let mut available: Vec<usize> = (0..self.credentials.len())
            .filter(|i| !state.failed.contains_key(i))
            .collect();

        if available.is_empty() {
            warn!("All credentials have failed, resetting failed credentials list");
            state.failed.clear();
            available = (0..self.credentials.len()).collect();
        }

        let index = *available.choose(&mut rand::rng()).unwrap_or(&0);
        state.current = Some(index);
        debug!(credential = %self.credentials[index].id, "select: using credential");
        self.credentials[index].clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A panic while holding the lock cannot leave the state half-written
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
