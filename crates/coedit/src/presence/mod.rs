//! Who currently has a document open.
//!
//! Sessions `touch` their record on a fixed heartbeat and `release` it on a
//! clean close. A crashed or abandoned session never releases, so readers
//! derive liveness from the age of the last heartbeat instead of trusting
//! the record's existence.

mod record;

pub use record::PresenceRecord;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CoeditConfig;
use crate::document::{DocumentStore, UserProfile};
use crate::protocol::Change;
use crate::CoeditResult;

/// Tracks presence records and filters out stale ones on every read
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<DocumentStore>,
    staleness_threshold: Duration,
    recheck_interval: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<DocumentStore>, config: &CoeditConfig) -> Self {
        Self {
            store,
            staleness_threshold: config.staleness_threshold,
            recheck_interval: config.presence_recheck_interval,
        }
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold
    }

    /// Upsert the caller's record as active and seen now
    pub fn touch(&self, document_id: &str, profile: &UserProfile) -> CoeditResult<PresenceRecord> {
        self.touch_at(document_id, profile, Utc::now())
    }

    pub fn touch_at(
        &self,
        document_id: &str,
        profile: &UserProfile,
        seen_at: DateTime<Utc>,
    ) -> CoeditResult<PresenceRecord> {
        let document = self.store.document(document_id)?;
        let record = PresenceRecord::new(document_id, profile, seen_at);
        document.upsert_presence(record.clone());

        debug!(
            "Presence of {} in document {} refreshed",
            profile.user_id, document_id
        );
        document.emit(Change::Presence);
        Ok(record)
    }

    /// Delete the caller's record; returns whether one existed
    pub fn release(&self, document_id: &str, user_id: &str) -> CoeditResult<bool> {
        let document = self.store.document(document_id)?;
        let removed = document.remove_presence(user_id);

        if removed {
            info!("User {} left document {}", user_id, document_id);
            document.emit(Change::Presence);
        }
        Ok(removed)
    }

    pub fn active_users(&self, document_id: &str) -> CoeditResult<Vec<PresenceRecord>> {
        self.active_users_at(document_id, Utc::now())
    }

    /// Active, non-stale records as of `now`, ordered by display name
    pub fn active_users_at(
        &self,
        document_id: &str,
        now: DateTime<Utc>,
    ) -> CoeditResult<Vec<PresenceRecord>> {
        let document = self.store.document(document_id)?;
        let mut users: Vec<PresenceRecord> = document
            .presence_records()
            .into_iter()
            .filter(|record| record.is_visible_at(now, self.staleness_threshold))
            .collect();
        users.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(users)
    }

    /// Drop records that are stale as of `now`, returning how many went
    pub fn sweep(&self, document_id: &str, now: DateTime<Utc>) -> CoeditResult<usize> {
        let document = self.store.document(document_id)?;
        let threshold = self.staleness_threshold;
        let mut removed = 0;
        document.retain_presence(|_, record| {
            let keep = !record.is_stale_at(now, threshold);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(
                "Swept {} stale presence records from document {}",
                removed, document_id
            );
            document.emit(Change::Presence);
        }
        Ok(removed)
    }

    /// Call `callback` with the active users now and whenever they change
    ///
    /// The set is recomputed on every presence write and additionally every
    /// recheck interval, so a user whose heartbeat silently stops disappears
    /// without waiting for somebody else's write.
    pub fn subscribe<F>(&self, document_id: &str, callback: F) -> CoeditResult<PresenceSubscription>
    where
        F: Fn(Vec<PresenceRecord>) + Send + Sync + 'static,
    {
        let mut change_rx = self.store.subscribe_to_changes();
        let initial = self.active_users(document_id)?;
        let mut last_delivered = user_ids(&initial);
        callback(initial);

        let tracker = self.clone();
        let document_id = document_id.to_string();

        let handle = tokio::spawn(async move {
            let mut recheck = tokio::time::interval(tracker.recheck_interval);
            recheck.set_missed_tick_behavior(MissedTickBehavior::Skip);
            recheck.tick().await;

            loop {
                let force = tokio::select! {
                    event = change_rx.recv() => match event {
                        Ok(event) if event.document_id == document_id => match event.change {
                            Change::Presence | Change::Participants => true,
                            Change::Deleted => {
                                callback(Vec::new());
                                break;
                            }
                            _ => continue,
                        },
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                "Presence subscriber for document {} lagged, skipped {} changes",
                                document_id, skipped
                            );
                            true
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = recheck.tick() => false,
                };

                let users = match tracker.active_users(&document_id) {
                    Ok(users) => users,
                    Err(e) => {
                        debug!("Ending presence subscription: {}", e);
                        break;
                    }
                };

                let ids = user_ids(&users);
                if force || ids != last_delivered {
                    last_delivered = ids;
                    callback(users);
                }
            }

            debug!("Presence subscription for document {} ended", document_id);
        });

        Ok(PresenceSubscription {
            handle: Some(handle),
        })
    }
}

fn user_ids(users: &[PresenceRecord]) -> Vec<String> {
    users.iter().map(|u| u.user_id.clone()).collect()
}

/// Keeps a presence subscription alive; dropping it stops the listener
pub struct PresenceSubscription {
    handle: Option<JoinHandle<()>>,
}

impl PresenceSubscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Hand the listener task to an owner that aborts it explicitly
    pub(crate) fn into_task(mut self) -> Option<JoinHandle<()>> {
        self.handle.take()
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn setup(config: &CoeditConfig) -> (Arc<DocumentStore>, PresenceTracker, String) {
        let store = Arc::new(DocumentStore::new());
        let owner = UserProfile::new("owner", "Owner", "owner@example.com");
        let doc = store.create_document(&owner, None);
        let tracker = PresenceTracker::new(store.clone(), config);
        (store, tracker, doc.id().to_string())
    }

    fn profile(id: &str, name: &str) -> UserProfile {
        UserProfile::new(id, name, format!("{}@example.com", id))
    }

    #[tokio::test]
    async fn test_touch_is_idempotent() {
        let (_store, tracker, doc) = setup(&CoeditConfig::default());
        let ada = profile("ada", "Ada");

        tracker.touch(&doc, &ada).unwrap();
        tracker.touch(&doc, &ada).unwrap();

        let users = tracker.active_users(&doc).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "ada");
        assert!(users[0].is_active);
    }

    #[tokio::test]
    async fn test_staleness_filtering() {
        let (_store, tracker, doc) = setup(&CoeditConfig::default());
        let now = Utc::now();

        tracker
            .touch_at(&doc, &profile("old", "Old"), now - chrono::Duration::seconds(31))
            .unwrap();
        tracker
            .touch_at(&doc, &profile("fresh", "Fresh"), now - chrono::Duration::seconds(29))
            .unwrap();

        let ids: Vec<_> = tracker
            .active_users_at(&doc, now)
            .unwrap()
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_release_and_missing_release() {
        let (_store, tracker, doc) = setup(&CoeditConfig::default());
        tracker.touch(&doc, &profile("ada", "Ada")).unwrap();

        assert!(tracker.release(&doc, "ada").unwrap());
        assert!(!tracker.release(&doc, "ada").unwrap());
        assert!(tracker.active_users(&doc).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_stale() {
        let (_store, tracker, doc) = setup(&CoeditConfig::default());
        let now = Utc::now();
        tracker
            .touch_at(&doc, &profile("old", "Old"), now - chrono::Duration::seconds(60))
            .unwrap();
        tracker.touch_at(&doc, &profile("new", "New"), now).unwrap();

        assert_eq!(tracker.sweep(&doc, now).unwrap(), 1);
        assert_eq!(tracker.sweep(&doc, now).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_and_updates() {
        let (_store, tracker, doc) = setup(&CoeditConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _subscription = tracker
            .subscribe(&doc, move |users| {
                let _ = tx.send(users);
            })
            .unwrap();

        let initial = rx.recv().await.unwrap();
        assert!(initial.is_empty());

        tracker.touch(&doc, &profile("ada", "Ada")).unwrap();
        let update = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Should receive presence update")
            .unwrap();
        assert_eq!(update.len(), 1);

        tracker.release(&doc, "ada").unwrap();
        let update = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Should receive presence update")
            .unwrap();
        assert!(update.is_empty());
    }

    #[tokio::test]
    async fn test_recheck_expires_silent_users() {
        let config = CoeditConfig {
            staleness_threshold: Duration::from_millis(200),
            presence_recheck_interval: Duration::from_millis(20),
            ..CoeditConfig::default()
        };
        let (_store, tracker, doc) = setup(&config);
        tracker
            .touch_at(
                &doc,
                &profile("ada", "Ada"),
                Utc::now() - chrono::Duration::milliseconds(100),
            )
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = tracker
            .subscribe(&doc, move |users| {
                let _ = tx.send(users);
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().len(), 1);

        // No further writes happen; the recheck alone must hide the record
        let expired = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("Stale user should disappear")
            .unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_unknown_document() {
        let (_store, tracker, _doc) = setup(&CoeditConfig::default());
        assert!(tracker.subscribe("missing", |_| {}).is_err());
    }

    #[tokio::test]
    async fn test_dropping_subscription_stops_listener() {
        let (_store, tracker, doc) = setup(&CoeditConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = tracker
            .subscribe(&doc, move |users| {
                let _ = tx.send(users);
            })
            .unwrap();
        rx.recv().await.unwrap();

        subscription.unsubscribe();
        tracker.touch(&doc, &profile("ada", "Ada")).unwrap();

        // The sender lived in the aborted task, so the channel closes
        let next = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(next.is_none());
    }
}
