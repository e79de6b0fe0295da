use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{EditSession, Reconcile};
use super::timer::TimerKind;
use super::writer::{DocumentWriter, WriteReceipt};
use super::SyncNotice;
use crate::config::CoeditConfig;
use crate::document::DocumentStore;
use crate::presence::{PresenceRecord, PresenceTracker};
use crate::protocol::Change;
use crate::version::{RestoreOutcome, Version, VersionStore, AUTO_SAVE_REASON};
use crate::{CoeditError, CoeditResult};

const NOTICE_CAPACITY: usize = 64;

/// Another writer's content, as delivered to [`SyncEngine::on_remote_change`]
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteChange {
    pub document_id: String,
    pub content: String,
    pub revision: u64,
    pub edited_by: String,
    pub edited_at: DateTime<Utc>,
    /// Set when the change came from restoring this version
    pub restored_from: Option<String>,
    /// False when unsaved local edits were kept over the remote content
    pub local_replaced: bool,
}

/// Handle to an open editing session
///
/// Cheap to clone; every clone drives the same session. Call
/// [`SyncEngine::close`] to write pending edits and release presence.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    session: EditSession,
    store: Arc<DocumentStore>,
    writer: Arc<dyn DocumentWriter>,
    versions: VersionStore,
    presence: PresenceTracker,
    config: CoeditConfig,
    notice_tx: broadcast::Sender<SyncNotice>,
    /// Held across a write or restore so revisions land in edit order
    write_lock: Mutex<()>,
}

impl SyncEngine {
    /// Open a session that writes straight to `store`
    pub fn open(
        session: EditSession,
        store: Arc<DocumentStore>,
        config: CoeditConfig,
    ) -> CoeditResult<Self> {
        let writer: Arc<dyn DocumentWriter> = store.clone();
        Self::open_with_writer(session, store, writer, config)
    }

    /// Open a session whose content writes go through `writer`
    pub fn open_with_writer(
        session: EditSession,
        store: Arc<DocumentStore>,
        writer: Arc<dyn DocumentWriter>,
        config: CoeditConfig,
    ) -> CoeditResult<Self> {
        let document = store.document(session.document_id())?;
        document.require_participant(&session.user().user_id, "open")?;

        let (content, revision) = document.read(|record| (record.content.clone(), record.revision));
        session.adopt(content, revision);

        let presence = PresenceTracker::new(store.clone(), &config);
        presence.touch(session.document_id(), session.user())?;

        let (notice_tx, _) = broadcast::channel(NOTICE_CAPACITY);
        let inner = Arc::new(EngineInner {
            versions: VersionStore::new(store.clone()),
            session,
            store,
            writer,
            presence,
            config,
            notice_tx,
            write_lock: Mutex::new(()),
        });
        inner.start_heartbeat();

        info!(
            "User {} opened document {} at revision {}",
            inner.session.user().user_id,
            inner.session.document_id(),
            revision
        );
        Ok(Self { inner })
    }

    pub fn document_id(&self) -> &str {
        self.inner.session.document_id()
    }

    pub fn session(&self) -> &EditSession {
        &self.inner.session
    }

    /// Content as the user currently sees it
    pub fn content(&self) -> String {
        self.inner.session.content()
    }

    /// Whether an edit is waiting to be written or still being written
    pub fn is_save_pending(&self) -> bool {
        let session = &self.inner.session;
        session.has_unsaved()
            || session.is_writing()
            || session.timers().is_pending(TimerKind::Debounce)
    }

    /// Status notices for this session
    pub fn notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notice_tx.subscribe()
    }

    /// Record an edit; it is written once the debounce window passes quietly
    pub fn apply_local_edit(&self, content: impl Into<String>) -> CoeditResult<()> {
        self.ensure_open()?;
        let session = &self.inner.session;
        self.inner
            .store
            .document(session.document_id())?
            .require_participant(&session.user().user_id, "edit")?;

        session.stage_edit(content.into());
        // A newer edit supersedes the snapshot armed by the previous write
        session.timers().cancel(TimerKind::AutoSnapshot);
        self.inner.schedule_write();
        Ok(())
    }

    /// Write any pending edit now, returning the new revision if one was written
    ///
    /// Waits for a write already in progress before starting its own.
    pub async fn flush(&self) -> CoeditResult<Option<u64>> {
        self.ensure_open()?;
        self.inner.session.timers().cancel(TimerKind::Debounce);
        Ok(self
            .inner
            .write_unsaved()
            .await?
            .map(|receipt| receipt.revision))
    }

    /// Deliver other writers' content changes to `callback`
    ///
    /// The session's own writes are never delivered back.
    pub fn on_remote_change<F>(&self, callback: F) -> CoeditResult<()>
    where
        F: Fn(RemoteChange) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let mut change_rx = self.inner.store.subscribe_to_changes();
        let weak = Arc::downgrade(&self.inner);
        let document_id = self.document_id().to_string();

        let handle = tokio::spawn(async move {
            loop {
                match change_rx.recv().await {
                    Ok(event) if event.document_id == document_id => {
                        let Some(inner) = weak.upgrade() else { break };
                        match event.change {
                            Change::Content {
                                content,
                                revision,
                                edited_by,
                                edited_at,
                                restored_from,
                            } => {
                                let local_replaced =
                                    match inner.session.reconcile_remote(&content, revision) {
                                        Reconcile::Applied { local_replaced } => local_replaced,
                                        Reconcile::Echo | Reconcile::Stale => continue,
                                    };
                                debug!(
                                    "Remote revision {} of document {} from {}",
                                    revision, document_id, edited_by
                                );
                                callback(RemoteChange {
                                    document_id: document_id.clone(),
                                    content,
                                    revision,
                                    edited_by,
                                    edited_at,
                                    restored_from,
                                    local_replaced,
                                });
                            }
                            Change::Deleted => {
                                inner.notify(SyncNotice::DocumentDeleted);
                                break;
                            }
                            _ => {}
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Remote change listener for document {} lagged, skipped {} changes",
                            document_id, skipped
                        );
                        let Some(inner) = weak.upgrade() else { break };
                        if let Some(change) = inner.resync(&document_id) {
                            callback(change);
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.inner.session.track_listener(handle);
        Ok(())
    }

    /// Deliver the set of active users now and whenever it changes
    pub fn on_presence_change<F>(&self, callback: F) -> CoeditResult<()>
    where
        F: Fn(Vec<PresenceRecord>) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let subscription = self.inner.presence.subscribe(self.document_id(), callback)?;
        if let Some(handle) = subscription.into_task() {
            self.inner.session.track_listener(handle);
        }
        Ok(())
    }

    /// Record a labelled version of the current local content
    pub fn checkpoint(&self, message: &str) -> CoeditResult<Version> {
        self.ensure_open()?;
        let session = &self.inner.session;
        self.inner.versions.checkpoint(
            session.document_id(),
            session.user(),
            &session.content(),
            message,
        )
    }

    /// Restore a historical version, discarding unsaved local edits
    pub async fn restore(&self, version_id: &str) -> CoeditResult<RestoreOutcome> {
        self.ensure_open()?;
        let inner = &self.inner;
        let session = &inner.session;
        session.timers().cancel(TimerKind::Debounce);
        let _guard = inner.write_lock.lock().await;

        let result = inner
            .versions
            .get(session.document_id(), version_id)
            .and_then(|target| {
                // The store announces the restore before it returns
                session.expect_content(target.content);
                inner.versions.restore(
                    session.document_id(),
                    version_id,
                    &session.user().user_id,
                    &session.user().display_name,
                )
            });
        match result {
            Ok(outcome) => {
                session.timers().cancel(TimerKind::AutoSnapshot);
                session.adopt(outcome.restored.content.clone(), outcome.revision);
                info!(
                    "Session of {} restored document {} to version {}",
                    session.user().user_id,
                    session.document_id(),
                    version_id
                );
                Ok(outcome)
            }
            Err(e) => {
                session.clear_expected();
                if session.has_unsaved() {
                    inner.schedule_write();
                }
                Err(e)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }

    /// End the session
    ///
    /// A pending edit is written first. Timers and listeners stop, and the
    /// presence record is released; a failed release only gets logged since
    /// the record expires on its own.
    pub async fn close(&self) {
        let inner = &self.inner;
        let session = &inner.session;
        if !session.mark_closed() {
            return;
        }

        session.timers().cancel(TimerKind::Debounce);
        if let Err(e) = inner.write_unsaved().await {
            warn!(
                "Final write for document {} failed: {}",
                session.document_id(),
                e
            );
        }

        session.timers().cancel_all();
        session.abort_listeners();

        if let Err(e) = inner
            .presence
            .release(session.document_id(), &session.user().user_id)
        {
            warn!(
                "Could not release presence of {} in document {}: {}",
                session.user().user_id,
                session.document_id(),
                e
            );
        }
        info!(
            "User {} closed document {}",
            session.user().user_id,
            session.document_id()
        );
    }

    fn ensure_open(&self) -> CoeditResult<()> {
        if self.inner.session.is_closed() {
            return Err(CoeditError::SessionClosed {
                document_id: self.document_id().to_string(),
            });
        }
        Ok(())
    }
}

impl EngineInner {
    fn notify(&self, notice: SyncNotice) {
        // Nobody listening is fine
        let _ = self.notice_tx.send(notice);
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.session.timers().schedule_every(
            TimerKind::Heartbeat,
            self.config.heartbeat_interval,
            move || {
                let weak = weak.clone();
                async move { heartbeat(&weak) }
            },
        );
    }

    /// Arm the debounce timer for the unsaved content
    fn schedule_write(self: &Arc<Self>) {
        let inner = self.clone();
        self.session
            .timers()
            .schedule(TimerKind::Debounce, self.config.debounce, async move {
                // Detached so that rearming the debounce cannot abort a started write
                tokio::spawn(async move {
                    let _ = inner.write_unsaved().await;
                });
            });
    }

    /// Hand unsaved content to the writer
    async fn write_unsaved(self: &Arc<Self>) -> CoeditResult<Option<WriteReceipt>> {
        let _guard = self.write_lock.lock().await;
        let Some(content) = self.session.take_unsaved() else {
            return Ok(None);
        };
        let document_id = self.session.document_id();
        let user_id = &self.session.user().user_id;

        match self.writer.write_content(document_id, user_id, &content).await {
            Ok(receipt) => {
                if self.session.complete_write(&content, &receipt) {
                    warn!(
                        "Write by {} to document {} replaced revision {} by {:?}",
                        user_id, document_id, receipt.replaced_revision, receipt.replaced_by
                    );
                    self.notify(SyncNotice::ConcurrentOverwrite {
                        overwritten_revision: receipt.replaced_revision,
                        overwritten_by: receipt.replaced_by.clone(),
                    });
                }
                self.notify(SyncNotice::Saved {
                    revision: receipt.revision,
                });
                self.arm_auto_snapshot();
                Ok(Some(receipt))
            }
            Err(e) => {
                self.session.fail_write();
                warn!(
                    "Write by {} to document {} failed: {}",
                    user_id, document_id, e
                );
                self.notify(SyncNotice::SaveFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn arm_auto_snapshot(self: &Arc<Self>) {
        if self.session.is_closed() {
            return;
        }
        let weak = Arc::downgrade(self);
        self.session.timers().schedule(
            TimerKind::AutoSnapshot,
            self.config.auto_snapshot_delay,
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.auto_snapshot();
                }
            },
        );
    }

    fn auto_snapshot(&self) {
        let session = &self.session;
        let document_id = session.document_id();
        let result = self.store.document(document_id).and_then(|document| {
            let title = document.read(|record| record.title.clone());
            self.versions.snapshot(
                document_id,
                &session.user().user_id,
                &session.user().display_name,
                &session.last_saved(),
                &title,
                AUTO_SAVE_REASON,
            )
        });

        match result {
            Ok(version) => self.notify(SyncNotice::SnapshotSaved {
                version_id: version.id,
            }),
            Err(e) => {
                warn!("Auto-save snapshot of document {} failed: {}", document_id, e);
                self.notify(SyncNotice::SnapshotFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Catch up after missed change events by reading the record directly
    fn resync(&self, document_id: &str) -> Option<RemoteChange> {
        let document = self.store.document(document_id).ok()?;
        let record = document.record();
        match self.session.reconcile_remote(&record.content, record.revision) {
            Reconcile::Applied { local_replaced } => Some(RemoteChange {
                document_id: document_id.to_string(),
                content: record.content,
                revision: record.revision,
                edited_by: record.last_edited_by.unwrap_or_default(),
                edited_at: record.last_edited_at,
                restored_from: record.restored.map(|stamp| stamp.restored_from),
                local_replaced,
            }),
            Reconcile::Echo | Reconcile::Stale => None,
        }
    }
}

fn heartbeat(weak: &Weak<EngineInner>) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let session = &inner.session;
    let result = inner
        .store
        .document(session.document_id())
        .and_then(|document| document.require_participant(&session.user().user_id, "open"))
        .and_then(|_| inner.presence.touch(session.document_id(), session.user()));
    match result {
        Ok(_) => true,
        Err(CoeditError::DocumentNotFound { .. }) => {
            debug!(
                "Stopping heartbeat, document {} is gone",
                session.document_id()
            );
            false
        }
        Err(CoeditError::AccessDenied { .. }) => {
            info!(
                "Stopping heartbeat, {} no longer takes part in document {}",
                session.user().user_id,
                session.document_id()
            );
            false
        }
        Err(e) => {
            warn!("Heartbeat for document {} failed: {}", session.document_id(), e);
            true
        }
    }
}
