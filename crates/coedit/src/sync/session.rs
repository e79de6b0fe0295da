use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use super::timer::SessionTimers;
use super::writer::WriteReceipt;
use crate::document::UserProfile;

/// Client-side state of one user editing one document
///
/// Holds what the user currently sees, what this session last wrote, the
/// revision bookkeeping used to tell its own echoes from other writers, and
/// every timer and listener the session owns. It is handed to
/// [`super::SyncEngine::open`] and lives exactly as long as the engine.
pub struct EditSession {
    document_id: String,
    user: UserProfile,
    state: Mutex<SessionState>,
    timers: SessionTimers,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct SessionState {
    /// Content as the user currently sees it
    local: String,
    /// `local` holds edits that have not been handed to the writer
    unsaved: bool,
    /// Content handed to the writer and not yet acknowledged
    in_flight: Option<String>,
    /// Last content this session wrote or adopted from the store
    last_saved: String,
    /// Newest revision this session has seen
    seen_revision: u64,
    /// Revision `local` was derived from
    base_revision: u64,
}

/// How a content change seen on the store relates to this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The session's own write coming back
    Echo,
    /// Older than something the session already saw
    Stale,
    /// Another writer's content, now the session's last known state.
    /// `local_replaced` is false when unsaved local edits were kept.
    Applied { local_replaced: bool },
}

impl EditSession {
    pub fn new(document_id: impl Into<String>, user: UserProfile) -> Self {
        Self {
            document_id: document_id.into(),
            user,
            state: Mutex::new(SessionState::default()),
            timers: SessionTimers::new(),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn timers(&self) -> &SessionTimers {
        &self.timers
    }

    /// Content as the user currently sees it
    pub fn content(&self) -> String {
        self.state().local.clone()
    }

    /// Last content this session wrote or adopted
    pub fn last_saved(&self) -> String {
        self.state().last_saved.clone()
    }

    pub fn has_unsaved(&self) -> bool {
        self.state().unsaved
    }

    /// Whether content handed to the writer is still unacknowledged
    pub fn is_writing(&self) -> bool {
        self.state().in_flight.is_some()
    }

    pub fn seen_revision(&self) -> u64 {
        self.state().seen_revision
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark closed; returns false if it already was
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Replace everything local with a persisted state, discarding unsaved edits
    pub(crate) fn adopt(&self, content: String, revision: u64) {
        let mut state = self.state();
        state.local = content.clone();
        state.last_saved = content;
        state.unsaved = false;
        state.in_flight = None;
        state.seen_revision = state.seen_revision.max(revision);
        state.base_revision = revision;
    }

    pub(crate) fn stage_edit(&self, content: String) {
        let mut state = self.state();
        state.local = content;
        state.unsaved = true;
    }

    /// Hand the unsaved content to the writer, if there is any
    pub(crate) fn take_unsaved(&self) -> Option<String> {
        let mut state = self.state();
        if !state.unsaved {
            return None;
        }
        state.unsaved = false;
        let content = state.local.clone();
        state.in_flight = Some(content.clone());
        Some(content)
    }

    /// Announce content about to land on the store through another path,
    /// such as a restore, so its change event counts as this session's own
    pub(crate) fn expect_content(&self, content: String) {
        self.state().in_flight = Some(content);
    }

    /// Forget content announced with [`Self::expect_content`]
    pub(crate) fn clear_expected(&self) {
        self.state().in_flight = None;
    }

    /// Record a successful write
    ///
    /// Returns true when the write replaced a revision written by someone
    /// else that the written content was not based on.
    pub(crate) fn complete_write(&self, content: &str, receipt: &WriteReceipt) -> bool {
        let mut state = self.state();
        let overwrote_unseen = receipt.replaced_revision != state.base_revision
            && receipt
                .replaced_by
                .as_deref()
                .map_or(false, |author| author != self.user.user_id);

        state.in_flight = None;
        state.last_saved = content.to_string();
        state.seen_revision = state.seen_revision.max(receipt.revision);
        if !state.unsaved {
            state.base_revision = receipt.revision;
        }
        overwrote_unseen
    }

    /// Record a failed write; the content counts as unsaved again unless
    /// newer edits already replaced it
    pub(crate) fn fail_write(&self) {
        let mut state = self.state();
        state.in_flight = None;
        state.unsaved = state.local != state.last_saved;
    }

    /// Decide what a content change observed on the store means here
    pub(crate) fn reconcile_remote(&self, content: &str, revision: u64) -> Reconcile {
        let mut state = self.state();

        if content == state.last_saved || state.in_flight.as_deref() == Some(content) {
            state.seen_revision = state.seen_revision.max(revision);
            return Reconcile::Echo;
        }

        if revision <= state.seen_revision {
            return Reconcile::Stale;
        }

        state.seen_revision = revision;
        state.last_saved = content.to_string();
        if state.unsaved {
            return Reconcile::Applied {
                local_replaced: false,
            };
        }

        state.local = content.to_string();
        state.base_revision = revision;
        Reconcile::Applied {
            local_replaced: true,
        }
    }

    pub(crate) fn track_listener(&self, handle: JoinHandle<()>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|listener| !listener.is_finished());
        listeners.push(handle);
    }

    pub(crate) fn abort_listeners(&self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.drain(..) {
            listener.abort();
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.abort_listeners();
    }
}
