//! Local file-based journal storage backend.
//!
//! The journal lives in `<state dir>/journal.json` and is replaced
//! atomically on every save.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ConvergentError, Result, StateError};

use super::store::StateStore;
use super::types::{JOURNAL_VERSION, Journal};

/// Default state directory name.
pub const STATE_DIR: &str = ".convergent";

/// Journal file name.
const JOURNAL_FILE: &str = "journal.json";

/// Local file-based journal store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the journal file.
    journal_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let journal_path = base_dir.join(JOURNAL_FILE);
        Self { base_dir, journal_path }
    }

    /// Returns the journal file path.
    #[must_use]
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.base_dir).await? {
            debug!(path = %self.base_dir.display(), "Creating state directory");
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<Journal>> {
        if !fs::try_exists(&self.journal_path).await? {
            debug!(path = %self.journal_path.display(), "Journal does not exist");
            return Ok(None);
        }

        debug!(path = %self.journal_path.display(), "Loading journal");

        let content = fs::read_to_string(&self.journal_path).await.map_err(|e| {
            ConvergentError::State(StateError::Corrupted {
                message: format!("Failed to read journal: {e}"),
            })
        })?;

        let journal: Journal = serde_json::from_str(&content).map_err(|e| {
            ConvergentError::State(StateError::Corrupted {
                message: format!("Failed to parse journal: {e}"),
            })
        })?;

        if journal.version != JOURNAL_VERSION {
            return Err(StateError::VersionMismatch {
                expected: JOURNAL_VERSION.to_string(),
                found: journal.version,
            }
            .into());
        }

        Ok(Some(journal))
    }

    async fn save(&self, journal: &Journal) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(journal)
            .map_err(|e| StateError::serialization(format!("Failed to serialize journal: {e}")))?;

        let temp_path = self.journal_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp journal: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write journal: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync journal: {e}")))?;

        fs::rename(&temp_path, &self.journal_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename journal: {e}")))?;

        info!(
            path = %self.journal_path.display(),
            resources = journal.resources.len(),
            "Journal saved"
        );
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        if fs::try_exists(&self.journal_path).await? {
            info!(path = %self.journal_path.display(), "Deleting journal");
            fs::remove_file(&self.journal_path)
                .await
                .map_err(|e| StateError::write(format!("Failed to delete journal: {e}")))?;
        }
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.journal_path).await?)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ApplyExecutor, PlanAction};
    use crate::remote::{InMemoryRemote, RemoteClient};
    use crate::schema::{SchemaRegistry, builtin};
    use crate::state::Document;
    use std::sync::Arc;
    use tempfile::TempDir;

    const SCAN: &str = "projects/p/locations/us-central1/dataScans/s1";

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::new(temp_dir.path().join(STATE_DIR));
        (store, temp_dir)
    }

    async fn destroy_record(remote: InMemoryRemote) -> crate::planner::OperationRecord {
        let registry = Arc::new(SchemaRegistry::builtin().unwrap());
        let executor = ApplyExecutor::new(registry, Arc::new(remote) as Arc<dyn RemoteClient>);
        executor.destroy(builtin::DATAPLEX_DATASCAN, SCAN).await
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();

        let mut journal = Journal::new();
        journal.config_hash = String::from("abc");
        store.save(&journal).await.expect("Failed to save journal");

        let loaded = store
            .load()
            .await
            .expect("Failed to load journal")
            .expect("Journal should exist");
        assert_eq!(loaded.config_hash, "abc");
        assert!(store.journal_path().ends_with("journal.json"));
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();
        assert!(store.load().await.expect("Load should not fail").is_none());
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_journal() {
        let (store, _temp) = create_test_store();
        store.ensure_dir().await.unwrap();
        fs::write(store.journal_path(), "{ not json").await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ConvergentError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let (store, _temp) = create_test_store();
        let mut journal = Journal::new();
        journal.version = String::from("0.1");
        store.save(&journal).await.unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ConvergentError::State(StateError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _temp) = create_test_store();
        store.save(&Journal::new()).await.unwrap();
        assert!(store.exists().await.unwrap());

        store.delete().await.unwrap();
        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_records_survive_round_trip() {
        let (store, _temp) = create_test_store();

        let remote = InMemoryRemote::new();
        remote.insert(SCAN, Document::new());
        remote.inject_fault(
            crate::remote::RemoteMethod::Delete,
            crate::remote::Fault::Rejected(403, String::from("denied")),
        );
        let failed = destroy_record(remote).await;

        let mut journal = Journal::new();
        journal.record("quality", "hash-1", &failed);
        store.save(&journal).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        let record = loaded.get("quality").unwrap();
        assert_eq!(record.remote_id, SCAN);
        assert_eq!(record.last_action, PlanAction::Delete);
        assert!(!record.last_success);
        assert!(record.config_hash.is_empty());
        assert_eq!(record.history.len(), 1);
        assert!(record.history[0].error.as_deref().unwrap().contains("denied"));
    }

    #[tokio::test]
    async fn test_successful_delete_drops_record() {
        let remote = InMemoryRemote::new();
        remote.insert(SCAN, Document::new());
        let deleted = destroy_record(remote).await;
        assert!(deleted.success);

        let mut journal = Journal::new();
        journal
            .resources
            .insert(String::from("quality"), crate::state::ResourceRecord::new("quality", "k", SCAN));
        journal.record("quality", "hash-1", &deleted);
        assert!(journal.get("quality").is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut record = crate::state::ResourceRecord::new("r", "k", "id");
        for i in 0..MAX_HISTORY_TEST {
            record.push_history(crate::state::HistoryEntry {
                timestamp: chrono::Utc::now(),
                action: PlanAction::Update,
                config_hash: format!("h{i}"),
                operations: vec![],
                success: true,
                error: None,
            });
        }
        assert_eq!(record.history.len(), crate::state::MAX_HISTORY);
        assert_eq!(record.history.last().unwrap().config_hash, format!("h{}", MAX_HISTORY_TEST - 1));
    }

    const MAX_HISTORY_TEST: usize = crate::state::MAX_HISTORY + 5;
}
