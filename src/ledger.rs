//! Durable record of which records have already produced a receipt.
//!
//! The on-disk format is the same JSON map the poller has always written:
//!
//! ```json
//! { "appXXXX/Submissions": { "rec123": true, "rec456": true } }
//! ```
//!
//! A missing file is a first run and loads as empty. A file that exists but
//! does not parse is fatal: silently starting from an empty ledger would
//! reprint every historical record.

use crate::error::ReceiptError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// In-memory ledger: `source_key → { record_id → true }`.
///
/// Identifiers are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessedLedger {
    sources: BTreeMap<String, BTreeMap<String, bool>>,
}

impl ProcessedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `record_id` was already emitted for `source_key`.
    pub fn contains(&self, source_key: &str, record_id: &str) -> bool {
        self.sources
            .get(source_key)
            .is_some_and(|ids| ids.contains_key(record_id))
    }

    /// Record `record_id` as emitted. Returns `false` if it already was.
    pub fn mark(&mut self, source_key: &str, record_id: &str) -> bool {
        self.sources
            .entry(source_key.to_string())
            .or_default()
            .insert(record_id.to_string(), true)
            .is_none()
    }

    /// Number of records emitted for `source_key`.
    pub fn count(&self, source_key: &str) -> usize {
        self.sources.get(source_key).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.values().all(BTreeMap::is_empty)
    }
}

/// File-backed store for a [`ProcessedLedger`].
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger from disk.
    ///
    /// # Errors
    /// - [`ReceiptError::LedgerIo`] when the file exists but cannot be read
    /// - [`ReceiptError::LedgerCorrupt`] when it is not a valid ledger
    pub fn load(&self) -> Result<ProcessedLedger, ReceiptError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}, starting empty", self.path.display());
                return Ok(ProcessedLedger::new());
            }
            Err(e) => {
                return Err(ReceiptError::LedgerIo {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let ledger: ProcessedLedger =
            serde_json::from_slice(&bytes).map_err(|e| ReceiptError::LedgerCorrupt {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;

        debug!(
            "Loaded ledger from {} ({} sources)",
            self.path.display(),
            ledger.sources.len()
        );
        Ok(ledger)
    }

    /// Write the full ledger.
    ///
    /// Atomic write: temp file in the same directory, fsync, then rename, so a
    /// concurrent reader sees either the old or the new ledger, never a torn one.
    pub fn persist(&self, ledger: &ProcessedLedger) -> Result<(), ReceiptError> {
        let io_err = |source: std::io::Error| ReceiptError::LedgerIo {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let json = serde_json::to_vec(ledger)
            .map_err(|e| ReceiptError::Internal(format!("Failed to serialise ledger: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_is_idempotent() {
        let mut ledger = ProcessedLedger::new();
        assert!(ledger.mark("app/tbl", "rec1"));
        assert!(!ledger.mark("app/tbl", "rec1"));
        assert_eq!(ledger.count("app/tbl"), 1);
        assert!(ledger.contains("app/tbl", "rec1"));
    }

    #[test]
    fn sources_are_independent_namespaces() {
        let mut ledger = ProcessedLedger::new();
        ledger.mark("appA/tbl", "rec1");
        assert!(!ledger.contains("appB/tbl", "rec1"));
        assert_eq!(ledger.count("appB/tbl"), 0);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LedgerStore::new(dir.path().join("processed_records.json"));
        let ledger = store.load().unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn persist_then_load_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("processed_records.json");
        let store = LedgerStore::new(&path);

        let mut ledger = ProcessedLedger::new();
        ledger.mark("appA/Submissions", "rec1");
        ledger.mark("appA/Submissions", "rec2");
        store.persist(&ledger).unwrap();

        let reloaded = LedgerStore::new(&path).load().unwrap();
        assert_eq!(reloaded, ledger);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["appA/Submissions"]["rec1"], serde_json::Value::Bool(true));
    }

    #[test]
    fn reads_legacy_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_records.json");
        std::fs::write(&path, r#"{"appS/Sprig":{"recA":true},"appO/OnBoard":{}}"#).unwrap();
        let ledger = LedgerStore::new(&path).load().unwrap();
        assert!(ledger.contains("appS/Sprig", "recA"));
        assert_eq!(ledger.count("appO/OnBoard"), 0);
    }

    #[test]
    fn corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_records.json");
        std::fs::write(&path, "{\"appS/Sprig\": {\"recA\": tr").unwrap();
        let err = LedgerStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ReceiptError::LedgerCorrupt { .. }), "got: {err}");
    }

    #[test]
    fn wrong_shape_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_records.json");
        std::fs::write(&path, r#"["rec1","rec2"]"#).unwrap();
        assert!(matches!(
            LedgerStore::new(&path).load(),
            Err(ReceiptError::LedgerCorrupt { .. })
        ));
    }

    #[test]
    fn persist_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_records.json");
        let store = LedgerStore::new(&path);
        let mut ledger = ProcessedLedger::new();
        ledger.mark("a/b", "r");
        store.persist(&ledger).unwrap();
        store.persist(&ledger).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
