//! Durable session record so a restarted client can re-attach to a
//! still-alive sandbox instead of provisioning a new one.
//!
//! The record is deliberately tiny: the sandbox id and its expiry. The
//! backend stays authoritative: a stale record pointing at a torn-down
//! sandbox simply fails on the first execute call.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sandbox_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Narrow read/write/delete interface over the record file. No other
/// component touches the underlying store directly.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the record, if any. A malformed file is dropped and treated
    /// as absent rather than wedging startup.
    pub fn load(&self) -> Option<SessionRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding malformed session record");
                self.delete();
                None
            }
        }
    }

    pub fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    /// Best-effort removal; a missing file is fine.
    pub fn delete(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> RecordStore {
        RecordStore::new(dir.path().join("session.json"))
    }

    #[test]
    fn round_trips_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let record = SessionRecord {
            sandbox_id: "sbx-42".into(),
            expires_at: Utc::now() + Duration::hours(1),
        };

        assert!(store.load().is_none());
        store.save(&record).unwrap();
        assert_eq!(store.load(), Some(record));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.delete();
        store
            .save(&SessionRecord {
                sandbox_id: "sbx-42".into(),
                expires_at: Utc::now(),
            })
            .unwrap();
        store.delete();
        store.delete();
        assert!(store.load().is_none());
    }

    #[test]
    fn malformed_record_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(dir.path().join("session.json"), "not json").unwrap();
        assert!(store.load().is_none());
        // The bad file is gone afterwards.
        assert!(!dir.path().join("session.json").exists());
    }
}
