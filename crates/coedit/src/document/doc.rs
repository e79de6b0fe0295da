use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::{DocumentRecord, Role};
use crate::presence::PresenceRecord;
use crate::protocol::{Change, ChangeEvent};
use crate::version::VersionLog;
use crate::{CoeditError, CoeditResult};

/// On-disk form of a document: the record and its version history.
/// Presence is ephemeral and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub record: DocumentRecord,
    pub versions: VersionLog,
}

/// A shared document with its version log and presence records
///
/// The record and the version log sit behind separate locks. Code that needs
/// both goes through [`Document::transact`], which always takes the record
/// lock first.
pub struct Document {
    id: String,
    record: RwLock<DocumentRecord>,
    versions: RwLock<VersionLog>,
    presence: DashMap<String, PresenceRecord>,
    last_modified: Mutex<std::time::Instant>,
    dirty: AtomicBool,
    change_tx: broadcast::Sender<ChangeEvent>,
}

impl Document {
    pub(crate) fn new(
        record: DocumentRecord,
        versions: VersionLog,
        change_tx: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        Self {
            id: record.id.clone(),
            record: RwLock::new(record),
            versions: RwLock::new(versions),
            presence: DashMap::new(),
            last_modified: Mutex::new(std::time::Instant::now()),
            dirty: AtomicBool::new(false),
            change_tx,
        }
    }

    /// Get the document ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A copy of the current record
    pub fn record(&self) -> DocumentRecord {
        self.read(|record| record.clone())
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&DocumentRecord) -> R) -> R {
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        f(&record)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut DocumentRecord) -> R) -> R {
        let result = {
            let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut record)
        };
        self.mark_dirty();
        result
    }

    pub(crate) fn read_versions<R>(&self, f: impl FnOnce(&VersionLog) -> R) -> R {
        let versions = self.versions.read().unwrap_or_else(PoisonError::into_inner);
        f(&versions)
    }

    pub(crate) fn update_versions<R>(&self, f: impl FnOnce(&mut VersionLog) -> R) -> R {
        let result = {
            let mut versions = self.versions.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut versions)
        };
        self.mark_dirty();
        result
    }

    /// Run `f` with exclusive access to both the record and the version log
    pub(crate) fn transact<R>(
        &self,
        f: impl FnOnce(&mut DocumentRecord, &mut VersionLog) -> R,
    ) -> R {
        let result = {
            let mut record = self.record.write().unwrap_or_else(PoisonError::into_inner);
            let mut versions = self.versions.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut record, &mut versions)
        };
        self.mark_dirty();
        result
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.read(|record| record.role_of(user_id))
    }

    /// The caller's role, or `AccessDenied` if they are not a participant
    pub(crate) fn require_participant(
        &self,
        user_id: &str,
        action: &'static str,
    ) -> CoeditResult<Role> {
        self.role_of(user_id)
            .filter(|role| role.can_edit())
            .ok_or_else(|| CoeditError::denied(&self.id, user_id, action))
    }

    pub(crate) fn require_owner(&self, user_id: &str, action: &'static str) -> CoeditResult<()> {
        match self.role_of(user_id) {
            Some(role) if role.can_manage() => Ok(()),
            _ => Err(CoeditError::denied(&self.id, user_id, action)),
        }
    }

    pub(crate) fn upsert_presence(&self, record: PresenceRecord) {
        self.presence.insert(record.user_id.clone(), record);
    }

    pub(crate) fn remove_presence(&self, user_id: &str) -> bool {
        self.presence.remove(user_id).is_some()
    }

    pub(crate) fn retain_presence(&self, keep: impl FnMut(&String, &mut PresenceRecord) -> bool) {
        self.presence.retain(keep);
    }

    pub(crate) fn presence_records(&self) -> Vec<PresenceRecord> {
        self.presence
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Check if the document has been modified since last save
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Mark the document as clean (typically called after saving)
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
        if let Ok(mut last_modified) = self.last_modified.lock() {
            *last_modified = std::time::Instant::now();
        }
    }

    /// Get the last modified time
    pub fn last_modified(&self) -> std::time::Instant {
        self.last_modified
            .lock()
            .map(|time| *time)
            .unwrap_or_else(|_| std::time::Instant::now())
    }

    /// Mark the document as dirty (modified)
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        if let Ok(mut last_modified) = self.last_modified.lock() {
            *last_modified = std::time::Instant::now();
        }
    }

    /// Broadcast a change to every store subscriber
    pub(crate) fn emit(&self, change: Change) {
        let event = ChangeEvent {
            document_id: self.id.clone(),
            change,
        };

        match self.change_tx.send(event) {
            Ok(receiver_count) => {
                debug!(
                    "Sent change for document '{}' to {} receivers",
                    self.id, receiver_count
                );
            }
            Err(_) => {
                debug!("No active receivers for changes to document '{}'", self.id);
            }
        }
    }

    /// Snapshot of everything that outlives a process restart
    pub fn to_persisted(&self) -> PersistedDocument {
        let record = self.record.read().unwrap_or_else(PoisonError::into_inner);
        let versions = self.versions.read().unwrap_or_else(PoisonError::into_inner);
        PersistedDocument {
            record: record.clone(),
            versions: versions.clone(),
        }
    }
}

/// A thread-safe handle to a document
///
/// DocumentHandle provides a read-mostly view of a document while ensuring
/// thread safety through Arc. Mutations go through the store, the version
/// store and the sync engine so that access control is always applied.
#[derive(Clone)]
pub struct DocumentHandle {
    inner: Arc<Document>,
}

impl DocumentHandle {
    pub(crate) fn new(document: Arc<Document>) -> Self {
        Self { inner: document }
    }

    /// Get the document ID
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn record(&self) -> DocumentRecord {
        self.inner.record()
    }

    pub fn title(&self) -> String {
        self.inner.read(|record| record.title.clone())
    }

    pub fn content(&self) -> String {
        self.inner.read(|record| record.content.clone())
    }

    pub fn revision(&self) -> u64 {
        self.inner.read(|record| record.revision)
    }

    pub fn join_code(&self) -> String {
        self.inner.read(|record| record.join_code.clone())
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.inner.role_of(user_id)
    }

    pub fn version_count(&self) -> usize {
        self.inner.read_versions(|log| log.len())
    }

    /// Check if the document has been modified since last save
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// Mark the document as clean (typically called after saving)
    pub fn mark_clean(&self) {
        self.inner.mark_clean()
    }

    pub(crate) fn mark_dirty(&self) {
        self.inner.mark_dirty()
    }

    /// Get the last modified time
    pub fn last_modified(&self) -> std::time::Instant {
        self.inner.last_modified()
    }

    pub fn to_persisted(&self) -> PersistedDocument {
        self.inner.to_persisted()
    }
}
