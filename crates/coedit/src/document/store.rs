use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    join_code, Document, DocumentHandle, DocumentRecord, Participant, PersistedDocument, Role,
    UserProfile, DEFAULT_TITLE,
};
use crate::config::CoeditConfig;
use crate::protocol::{Change, ChangeEvent};
use crate::sync::{DocumentWriter, WriteReceipt};
use crate::version::VersionLog;
use crate::{CoeditError, CoeditResult};

/// Thread-safe store for shared documents
///
/// The DocumentStore is the single shared state all editing sessions write
/// to. It owns the documents, the join code index and the change channel
/// every session listens on. Content writes are plain overwrites: whoever
/// writes last wins.
pub struct DocumentStore {
    documents: DashMap<String, Arc<Document>>,
    join_codes: DashMap<String, String>,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl DocumentStore {
    /// Create a new document store
    pub fn new() -> Self {
        Self::with_capacity(CoeditConfig::default().change_channel_capacity)
    }

    pub fn with_config(config: &CoeditConfig) -> Self {
        Self::with_capacity(config.change_channel_capacity)
    }

    /// Create a store whose change channel buffers `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            documents: DashMap::new(),
            join_codes: DashMap::new(),
            change_tx,
        }
    }

    /// Create a new document owned by `owner`
    pub fn create_document(&self, owner: &UserProfile, title: Option<String>) -> DocumentHandle {
        let id = Uuid::new_v4().to_string();
        let code = self.claim_join_code(&id);
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let record = DocumentRecord::new(id.clone(), owner, title, code);
        let document = Arc::new(Document::new(
            record,
            VersionLog::new(),
            self.change_tx.clone(),
        ));
        document.mark_dirty();
        self.documents.insert(id.clone(), document.clone());

        info!("Creating new document: {} (owner {})", id, owner.user_id);
        document.emit(Change::Created);
        DocumentHandle::new(document)
    }

    /// Reserve a join code that no other document uses
    fn claim_join_code(&self, document_id: &str) -> String {
        loop {
            let code = join_code::generate();
            match self.join_codes.entry(code.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(document_id.to_string());
                    return code;
                }
                Entry::Occupied(_) => {
                    debug!("Join code collision on {}, drawing again", code);
                }
            }
        }
    }

    /// Get an existing document by ID
    pub fn get_document(&self, id: &str) -> Option<DocumentHandle> {
        self.documents
            .get(id)
            .map(|entry| DocumentHandle::new(entry.value().clone()))
    }

    pub(crate) fn document(&self, id: &str) -> CoeditResult<Arc<Document>> {
        self.documents
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoeditError::not_found(id))
    }

    /// List all document IDs
    pub fn list_documents(&self) -> Vec<String> {
        self.documents
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get the number of documents
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Documents `user_id` participates in, most recently edited first
    pub fn documents_for(&self, user_id: &str) -> Vec<DocumentRecord> {
        let mut records: Vec<DocumentRecord> = self
            .documents
            .iter()
            .filter(|entry| entry.value().role_of(user_id).is_some())
            .map(|entry| entry.value().record())
            .collect();
        records.sort_by(|a, b| b.last_edited_at.cmp(&a.last_edited_at));
        records
    }

    /// Resolve a join code, ignoring case and surrounding whitespace
    pub fn find_by_join_code(&self, code: &str) -> CoeditResult<Option<String>> {
        let code = join_code::normalize(code)?;
        Ok(self.join_codes.get(&code).map(|entry| entry.value().clone()))
    }

    /// Add `profile` as a collaborator of the document behind `code`
    ///
    /// Joining a document the user already participates in leaves their role
    /// untouched.
    pub fn join_by_code(&self, code: &str, profile: &UserProfile) -> CoeditResult<String> {
        let document_id = self
            .find_by_join_code(code)?
            .ok_or_else(|| CoeditError::not_found(&format!("join code {}", code.trim())))?;
        let document = self.document(&document_id)?;

        let joined = document.update(|record| {
            if record.is_participant(&profile.user_id) {
                return false;
            }
            record.participants.insert(
                profile.user_id.clone(),
                Participant::from_profile(profile, Role::Collaborator, Utc::now()),
            );
            true
        });

        if joined {
            info!(
                "User {} joined document {} as collaborator",
                profile.user_id, document_id
            );
            document.emit(Change::Participants);
        }

        Ok(document_id)
    }

    pub fn get_role(&self, document_id: &str, user_id: &str) -> CoeditResult<Option<Role>> {
        Ok(self.document(document_id)?.role_of(user_id))
    }

    pub fn is_participant(&self, document_id: &str, user_id: &str) -> bool {
        matches!(self.get_role(document_id, user_id), Ok(Some(_)))
    }

    /// Change a participant's role. Only the owner may do this.
    ///
    /// Granting `Owner` transfers ownership: the acting owner becomes a
    /// collaborator so that exactly one owner remains.
    pub fn set_role(
        &self,
        document_id: &str,
        actor_id: &str,
        target_id: &str,
        role: Role,
    ) -> CoeditResult<()> {
        let document = self.document(document_id)?;
        document.require_owner(actor_id, "change roles in")?;

        if actor_id == target_id {
            return match role {
                Role::Owner => Ok(()),
                Role::Collaborator => Err(CoeditError::validation(
                    "the owner cannot demote themselves; transfer ownership instead",
                )),
            };
        }

        document.update(|record| {
            if !record.is_participant(target_id) {
                return Err(CoeditError::validation(format!(
                    "{} is not a participant",
                    target_id
                )));
            }

            if role == Role::Owner {
                if let Some(previous) = record.participants.get_mut(actor_id) {
                    previous.role = Role::Collaborator;
                }
                record.owner_id = target_id.to_string();
            }
            if let Some(participant) = record.participants.get_mut(target_id) {
                participant.role = role;
            }
            Ok(())
        })?;

        info!(
            "User {} set role of {} to {:?} in document {}",
            actor_id, target_id, role, document_id
        );
        document.emit(Change::Participants);
        Ok(())
    }

    /// Remove a collaborator. Only the owner may do this, and not to themselves.
    pub fn remove_participant(
        &self,
        document_id: &str,
        actor_id: &str,
        target_id: &str,
    ) -> CoeditResult<()> {
        let document = self.document(document_id)?;
        document.require_owner(actor_id, "remove participants from")?;

        if actor_id == target_id {
            return Err(CoeditError::validation("the owner cannot be removed"));
        }

        let removed = document.update(|record| record.participants.remove(target_id).is_some());
        if !removed {
            return Err(CoeditError::validation(format!(
                "{} is not a participant",
                target_id
            )));
        }

        info!(
            "User {} removed {} from document {}",
            actor_id, target_id, document_id
        );
        document.remove_presence(target_id);
        document.emit(Change::Participants);
        Ok(())
    }

    pub fn rename(&self, document_id: &str, actor_id: &str, title: &str) -> CoeditResult<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoeditError::validation("title must not be empty"));
        }

        let document = self.document(document_id)?;
        document.require_participant(actor_id, "rename")?;
        document.update(|record| record.title = title.to_string());
        document.emit(Change::Title {
            title: title.to_string(),
        });
        Ok(())
    }

    /// Overwrite a document's content on behalf of a participant
    pub fn write_content(
        &self,
        document_id: &str,
        author_id: &str,
        content: &str,
    ) -> CoeditResult<WriteReceipt> {
        let document = self.document(document_id)?;
        document.require_participant(author_id, "edit")?;

        let receipt = document.update(|record| {
            let replaced_revision = record.revision;
            let replaced_by = record.last_edited_by.clone();
            let revision = record.write_content(content.to_string(), author_id);
            WriteReceipt {
                revision,
                replaced_revision,
                replaced_by,
                edited_at: record.last_edited_at,
            }
        });

        debug!(
            "Document {} now at revision {} (written by {})",
            document_id, receipt.revision, author_id
        );
        document.emit(Change::Content {
            content: content.to_string(),
            revision: receipt.revision,
            edited_by: author_id.to_string(),
            edited_at: receipt.edited_at,
            restored_from: None,
        });
        Ok(receipt)
    }

    /// Delete a document. Only the owner may do this.
    pub fn delete_document(&self, document_id: &str, actor_id: &str) -> CoeditResult<()> {
        let document = self.document(document_id)?;
        document.require_owner(actor_id, "delete")?;

        self.remove_document(document_id);
        document.emit(Change::Deleted);
        Ok(())
    }

    /// Remove a document and its join code
    ///
    /// Returns true if the document was removed, false if it didn't exist.
    pub(crate) fn remove_document(&self, id: &str) -> bool {
        match self.documents.remove(id) {
            Some((_, document)) => {
                let code = document.read(|record| record.join_code.clone());
                self.join_codes.remove(&code);
                info!("Removed document: {}", id);
                true
            }
            None => {
                debug!("Attempted to remove non-existent document: {}", id);
                false
            }
        }
    }

    /// Install a document read back from storage
    pub(crate) fn insert_loaded(&self, persisted: PersistedDocument) -> CoeditResult<DocumentHandle> {
        let id = persisted.record.id.clone();
        let code = persisted.record.join_code.clone();

        match self.join_codes.entry(code.clone()) {
            Entry::Occupied(entry) if entry.get() != &id => {
                warn!(
                    "Join code {} of document {} already belongs to {}",
                    code,
                    id,
                    entry.get()
                );
                return Err(CoeditError::validation(format!(
                    "duplicate join code {}",
                    code
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(entry) => {
                entry.insert(id.clone());
            }
        }

        let document = Arc::new(Document::new(
            persisted.record,
            persisted.versions,
            self.change_tx.clone(),
        ));
        self.documents.insert(id, document.clone());
        Ok(DocumentHandle::new(document))
    }

    /// Subscribe to changes across all documents
    ///
    /// Returns a receiver that will get notified of all changes.
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.change_tx.subscribe()
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentWriter for DocumentStore {
    async fn write_content(
        &self,
        document_id: &str,
        author_id: &str,
        content: &str,
    ) -> CoeditResult<WriteReceipt> {
        DocumentStore::write_content(self, document_id, author_id, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn owner() -> UserProfile {
        UserProfile::new("owner", "Owner", "owner@example.com")
    }

    fn guest() -> UserProfile {
        UserProfile::new("guest", "Guest", "guest@example.com")
    }

    #[tokio::test]
    async fn test_document_store_creation() {
        let store = DocumentStore::new();
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn test_create_and_get_document() {
        let store = DocumentStore::new();

        let doc = store.create_document(&owner(), None);
        assert_eq!(doc.title(), DEFAULT_TITLE);
        assert_eq!(doc.content(), "");
        assert_eq!(doc.role_of("owner"), Some(Role::Owner));
        assert_eq!(store.document_count(), 1);

        let retrieved = store.get_document(doc.id()).unwrap();
        assert_eq!(retrieved.id(), doc.id());
    }

    #[tokio::test]
    async fn test_join_codes_unique() {
        let store = DocumentStore::new();
        let mut codes = HashSet::new();

        for _ in 0..10_000 {
            let doc = store.create_document(&owner(), None);
            assert!(codes.insert(doc.join_code()));
        }
    }

    #[tokio::test]
    async fn test_find_by_join_code_ignores_case() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), Some("Notes".to_string()));
        let code = doc.join_code();

        let found = store
            .find_by_join_code(&code.to_ascii_lowercase())
            .unwrap();
        assert_eq!(found.as_deref(), Some(doc.id()));

        assert!(matches!(
            store.find_by_join_code("nope"),
            Err(CoeditError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_by_code_adds_collaborator() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);

        let joined = store.join_by_code(&doc.join_code(), &guest()).unwrap();
        assert_eq!(joined, doc.id());
        assert_eq!(
            store.get_role(doc.id(), "guest").unwrap(),
            Some(Role::Collaborator)
        );

        // The owner joining their own document keeps the owner role
        store.join_by_code(&doc.join_code(), &owner()).unwrap();
        assert_eq!(store.get_role(doc.id(), "owner").unwrap(), Some(Role::Owner));
    }

    #[tokio::test]
    async fn test_join_unknown_code() {
        let store = DocumentStore::new();
        let result = store.join_by_code("ZZZZZZ", &guest());
        assert!(matches!(result, Err(CoeditError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_write_content_requires_participant() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);

        let receipt = store.write_content(doc.id(), "owner", "hello").unwrap();
        assert_eq!(receipt.revision, 1);
        assert_eq!(receipt.replaced_revision, 0);
        assert_eq!(doc.content(), "hello");

        let denied = store.write_content(doc.id(), "guest", "mine now");
        assert!(matches!(denied, Err(CoeditError::AccessDenied { .. })));
        assert_eq!(doc.content(), "hello");
    }

    #[tokio::test]
    async fn test_write_broadcasts_content_change() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);
        let mut rx = store.subscribe_to_changes();

        store.write_content(doc.id(), "owner", "hello").unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.document_id, doc.id());
        match event.change {
            Change::Content {
                content, revision, ..
            } => {
                assert_eq!(content, "hello");
                assert_eq!(revision, 1);
            }
            other => panic!("Expected content change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);
        let code = doc.join_code();
        store.join_by_code(&code, &guest()).unwrap();

        let denied = store.delete_document(doc.id(), "guest");
        assert!(matches!(denied, Err(CoeditError::AccessDenied { .. })));
        assert_eq!(store.document_count(), 1);

        store.delete_document(doc.id(), "owner").unwrap();
        assert_eq!(store.document_count(), 0);
        assert_eq!(store.find_by_join_code(&code).unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_role_transfers_ownership() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);
        store.join_by_code(&doc.join_code(), &guest()).unwrap();

        let denied = store.set_role(doc.id(), "guest", "owner", Role::Collaborator);
        assert!(matches!(denied, Err(CoeditError::AccessDenied { .. })));

        store
            .set_role(doc.id(), "owner", "guest", Role::Owner)
            .unwrap();
        let record = doc.record();
        assert_eq!(record.owner_id, "guest");
        assert_eq!(record.role_of("guest"), Some(Role::Owner));
        assert_eq!(record.role_of("owner"), Some(Role::Collaborator));
    }

    #[tokio::test]
    async fn test_owner_cannot_demote_self() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);

        let result = store.set_role(doc.id(), "owner", "owner", Role::Collaborator);
        assert!(matches!(result, Err(CoeditError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_remove_participant() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);
        store.join_by_code(&doc.join_code(), &guest()).unwrap();

        store.remove_participant(doc.id(), "owner", "guest").unwrap();
        assert!(!store.is_participant(doc.id(), "guest"));

        let result = store.remove_participant(doc.id(), "owner", "owner");
        assert!(matches!(result, Err(CoeditError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_rename_and_documents_for() {
        let store = DocumentStore::new();
        let first = store.create_document(&owner(), Some("First".to_string()));
        let second = store.create_document(&owner(), Some("Second".to_string()));
        store.create_document(&guest(), Some("Other".to_string()));

        store.rename(first.id(), "owner", "  Renamed ").unwrap();
        assert_eq!(first.title(), "Renamed");
        assert!(matches!(
            store.rename(first.id(), "owner", "   "),
            Err(CoeditError::Validation { .. })
        ));

        store.write_content(second.id(), "owner", "newest").unwrap();
        let mine = store.documents_for("owner");
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].id, second.id());
    }

    #[tokio::test]
    async fn test_insert_loaded_rejects_duplicate_code() {
        let store = DocumentStore::new();
        let doc = store.create_document(&owner(), None);

        let mut persisted = doc.to_persisted();
        persisted.record.id = "another".to_string();
        assert!(store.insert_loaded(persisted).is_err());
    }
}
