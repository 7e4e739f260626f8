//! JSON-file nonce cache.
//!
//! One JSON object at a fixed path: lower-cased address -> next nonce.
//! Missing or corrupt files read as an empty mapping. Every save rewrites
//! the whole document (read-modify-write), so concurrent processes sharing
//! a file are not supported.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tally_core::nonce::{normalize_address, NonceRecord, NonceStore};
use tally_core::{TallyError, TallyResult};

/// Default cache file name, relative to the working directory.
pub const DEFAULT_NONCE_FILE: &str = "nonces.json";

#[derive(Debug, Clone)]
pub struct JsonFileNonceStore {
    path: PathBuf,
}

impl JsonFileNonceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole mapping; read and parse errors are logged and yield empty.
    pub fn read_all(&self) -> BTreeMap<String, u64> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "nonce cache unreadable");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str::<BTreeMap<String, u64>>(&raw) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "nonce cache corrupt, ignoring");
                BTreeMap::new()
            }
        }
    }

    pub fn records(&self) -> Vec<NonceRecord> {
        self.read_all()
            .into_iter()
            .map(|(address, sequence)| NonceRecord { address, sequence })
            .collect()
    }
}

impl NonceStore for JsonFileNonceStore {
    fn load(&self, address: &str) -> Option<u64> {
        self.read_all().get(&normalize_address(address)).copied()
    }

    fn save(&self, address: &str, sequence: u64) -> TallyResult<()> {
        let mut all = self.read_all();
        all.insert(normalize_address(address), sequence);

        let json = serde_json::to_string_pretty(&all)
            .map_err(|e| TallyError::Persistence(format!("Failed to encode nonce cache: {e}")))?;
        std::fs::write(&self.path, json).map_err(|e| {
            TallyError::Persistence(format!(
                "Failed to write nonce cache {}: {e}",
                self.path.display()
            ))
        })?;

        tracing::debug!(path = %self.path.display(), entries = all.len(), "nonce cache written");
        Ok(())
    }
}
