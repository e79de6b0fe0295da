use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::config::CoeditConfig;
use crate::document::{DocumentHandle, DocumentStore, PersistedDocument};
use crate::protocol::{Change, ChangeEvent};
use crate::{CoeditError, CoeditResult};

const FILE_EXTENSION: &str = "json";

/// Writes dirty documents to disk in the background
///
/// Each document is stored as `{id}.json` holding its record and version
/// log. Presence is not written.
pub struct PersistenceManager {
    store: Arc<DocumentStore>,
    storage_path: PathBuf,
    check_interval: Duration,
    handles: JoinSet<()>,
}

impl PersistenceManager {
    pub fn new(store: Arc<DocumentStore>, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            storage_path: storage_path.into(),
            check_interval: Duration::from_secs(10),
            handles: JoinSet::new(),
        }
    }

    pub fn with_config(
        store: Arc<DocumentStore>,
        storage_path: impl Into<PathBuf>,
        config: &CoeditConfig,
    ) -> Self {
        let mut manager = Self::new(store, storage_path);
        manager.set_check_interval(config.persist_interval);
        manager
    }

    /// Set the interval for checking dirty documents
    pub fn set_check_interval(&mut self, interval: Duration) {
        self.check_interval = interval;
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    /// Start the periodic persistence pass
    pub async fn start(&mut self) -> CoeditResult<()> {
        tokio::fs::create_dir_all(&self.storage_path).await?;

        info!(
            "Starting persistence manager with storage path: {:?}",
            self.storage_path
        );

        let store = self.store.clone();
        let storage_path = self.storage_path.clone();
        let check_interval = self.check_interval;

        self.handles.spawn(async move {
            let mut interval = interval(check_interval);

            loop {
                interval.tick().await;
                let persisted = persist_dirty(&store, &storage_path).await;
                if persisted > 0 {
                    debug!("Persistence pass wrote {} documents", persisted);
                }
            }
        });

        // Deleted documents lose their file as well
        let mut change_rx = self.store.subscribe_to_changes();
        let storage_path = self.storage_path.clone();
        self.handles.spawn(async move {
            loop {
                match change_rx.recv().await {
                    Ok(ChangeEvent {
                        document_id,
                        change: Change::Deleted,
                    }) => {
                        if let Err(e) = remove_document_file(&storage_path, &document_id).await {
                            error!("Failed to remove file of document '{}': {}", document_id, e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Persistence deletion listener skipped {} changes", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(())
    }

    /// Stop the background pass after a final write of everything dirty
    pub async fn stop(&mut self) {
        info!("Stopping persistence manager");

        let persisted = persist_dirty(&self.store, &self.storage_path).await;
        info!("Final persistence pass wrote {} documents", persisted);

        self.handles.abort_all();
        while let Some(result) = self.handles.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!("Persistence task error: {}", e);
                }
            }
        }
    }

    /// Remove the stored file of a deleted document
    pub async fn forget_document(&self, document_id: &str) -> CoeditResult<bool> {
        remove_document_file(&self.storage_path, document_id).await
    }

    /// Load every stored document into the store
    ///
    /// Call on startup, before sessions open. Unreadable files are logged
    /// and skipped. Returns how many documents were loaded.
    pub async fn load_all_documents(&self) -> CoeditResult<usize> {
        info!(
            "Loading documents from storage path: {:?}",
            self.storage_path
        );

        let mut entries = match tokio::fs::read_dir(&self.storage_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Storage path {:?} does not exist yet", self.storage_path);
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }

            match load_document(&self.store, &path).await {
                Ok(handle) => {
                    debug!("Loaded document '{}'", handle.id());
                    loaded += 1;
                }
                Err(e) => error!("Failed to load document from {:?}: {}", path, e),
            }
        }

        info!("Loaded {} documents", loaded);
        Ok(loaded)
    }
}

fn document_path(storage_path: &Path, document_id: &str) -> PathBuf {
    storage_path.join(format!("{}.{}", document_id, FILE_EXTENSION))
}

async fn remove_document_file(storage_path: &Path, document_id: &str) -> CoeditResult<bool> {
    match tokio::fs::remove_file(document_path(storage_path, document_id)).await {
        Ok(()) => {
            debug!("Removed stored file of document '{}'", document_id);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn persist_dirty(store: &DocumentStore, storage_path: &Path) -> usize {
    let mut persisted = 0;
    for doc_id in store.list_documents() {
        let Some(doc_handle) = store.get_document(&doc_id) else {
            continue;
        };
        if !doc_handle.is_dirty() {
            continue;
        }

        // Clear first so edits landing during the write mark it dirty again
        doc_handle.mark_clean();
        match persist_document(&doc_handle, storage_path).await {
            Ok(()) => persisted += 1,
            Err(e) => {
                error!("Failed to persist document '{}': {}", doc_id, e);
                doc_handle.mark_dirty();
            }
        }
    }
    persisted
}

async fn persist_document(doc_handle: &DocumentHandle, storage_path: &Path) -> CoeditResult<()> {
    let file_path = document_path(storage_path, doc_handle.id());
    let json_data = serde_json::to_string_pretty(&doc_handle.to_persisted())?;

    // Write beside the target and rename so a crash never leaves half a file
    let temp_path = file_path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, json_data).await?;
    tokio::fs::rename(&temp_path, &file_path).await?;
    Ok(())
}

async fn load_document(store: &DocumentStore, file_path: &Path) -> CoeditResult<DocumentHandle> {
    let json_data = tokio::fs::read_to_string(file_path).await?;
    let persisted: PersistedDocument = serde_json::from_str(&json_data)?;

    let expected = file_path.file_stem().and_then(|s| s.to_str());
    if expected != Some(persisted.record.id.as_str()) {
        return Err(CoeditError::Persistence(format!(
            "file {:?} holds document {}",
            file_path, persisted.record.id
        )));
    }
    store.insert_loaded(persisted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::UserProfile;
    use crate::version::VersionStore;
    use tempfile::TempDir;

    fn owner() -> UserProfile {
        UserProfile::new("owner", "Owner", "owner@example.com")
    }

    #[tokio::test]
    async fn test_persistence_manager_creation() {
        let store = Arc::new(DocumentStore::new());
        let temp_dir = TempDir::new().unwrap();

        let manager = PersistenceManager::new(store, temp_dir.path());
        assert_eq!(manager.check_interval, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_document_round_trip_through_disk() {
        let store = Arc::new(DocumentStore::new());
        let temp_dir = TempDir::new().unwrap();

        let doc = store.create_document(&owner(), Some("Plans".to_string()));
        store.write_content(doc.id(), "owner", "first line").unwrap();
        VersionStore::new(store.clone())
            .checkpoint(doc.id(), &owner(), "first line", "start")
            .unwrap();

        let mut manager = PersistenceManager::new(store.clone(), temp_dir.path());
        manager.stop().await;
        assert!(!doc.is_dirty());
        assert!(temp_dir.path().join(format!("{}.json", doc.id())).exists());

        let new_store = Arc::new(DocumentStore::new());
        let loader = PersistenceManager::new(new_store.clone(), temp_dir.path());
        assert_eq!(loader.load_all_documents().await.unwrap(), 1);

        let loaded = new_store.get_document(doc.id()).unwrap();
        assert_eq!(loaded.title(), "Plans");
        assert_eq!(loaded.content(), "first line");
        assert_eq!(loaded.revision(), 1);
        assert_eq!(loaded.version_count(), 1);
        assert_eq!(
            new_store.find_by_join_code(&doc.join_code()).unwrap(),
            Some(doc.id().to_string())
        );
    }

    #[tokio::test]
    async fn test_clean_documents_are_skipped() {
        let store = Arc::new(DocumentStore::new());
        let temp_dir = TempDir::new().unwrap();
        let doc = store.create_document(&owner(), None);
        doc.mark_clean();

        assert_eq!(persist_dirty(&store, temp_dir.path()).await, 0);
        assert!(!temp_dir.path().join(format!("{}.json", doc.id())).exists());
    }

    #[tokio::test]
    async fn test_load_skips_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        tokio::fs::write(temp_dir.path().join("broken.json"), "{ not json")
            .await
            .unwrap();
        tokio::fs::write(temp_dir.path().join("notes.txt"), "ignored")
            .await
            .unwrap();

        let store = Arc::new(DocumentStore::new());
        let manager = PersistenceManager::new(store.clone(), temp_dir.path());
        assert_eq!(manager.load_all_documents().await.unwrap(), 0);
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_storage_path_loads_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(DocumentStore::new());
        let manager = PersistenceManager::new(store, temp_dir.path().join("absent"));
        assert_eq!(manager.load_all_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forget_document() {
        let store = Arc::new(DocumentStore::new());
        let temp_dir = TempDir::new().unwrap();
        let doc = store.create_document(&owner(), None);

        let mut manager = PersistenceManager::new(store.clone(), temp_dir.path());
        manager.stop().await;

        assert!(manager.forget_document(doc.id()).await.unwrap());
        assert!(!manager.forget_document(doc.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_document_file_is_removed() {
        let store = Arc::new(DocumentStore::new());
        let temp_dir = TempDir::new().unwrap();
        let doc = store.create_document(&owner(), None);
        let path = temp_dir.path().join(format!("{}.json", doc.id()));

        let mut manager = PersistenceManager::new(store.clone(), temp_dir.path());
        manager.start().await.unwrap();
        persist_dirty(&store, temp_dir.path()).await;
        assert!(path.exists());

        store.delete_document(doc.id(), "owner").unwrap();
        for _ in 0..50 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_background_pass_writes_dirty_documents() {
        let store = Arc::new(DocumentStore::new());
        let temp_dir = TempDir::new().unwrap();
        let doc = store.create_document(&owner(), None);

        let mut manager = PersistenceManager::new(store.clone(), temp_dir.path());
        manager.set_check_interval(Duration::from_millis(20));
        manager.start().await.unwrap();

        let path = temp_dir.path().join(format!("{}.json", doc.id()));
        for _ in 0..50 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(path.exists());
        assert!(!doc.is_dirty());
        manager.stop().await;
    }
}
