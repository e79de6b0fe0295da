use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use super::diff::{diff, LineDiff};
use super::{Version, VersionDraft, VersionSummary};
use crate::document::{DocumentStore, RestoreStamp, UserProfile};
use crate::protocol::Change;
use crate::{CoeditError, CoeditResult};

/// Result of a restore: the backup of the replaced state and the marker
/// version recording the restored state
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub backup: Version,
    pub restored: Version,
    /// Content revision written by the restore
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStats {
    pub total_versions: usize,
    pub total_backups: usize,
    pub total_restores: usize,
    /// Distinct author names, sorted
    pub contributors: Vec<String>,
    pub oldest: Option<VersionSummary>,
    pub newest: Option<VersionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub version: VersionSummary,
    /// Difference from the next older version, if there is one
    pub diff: Option<LineDiff>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub first: VersionSummary,
    pub second: VersionSummary,
    pub first_content: String,
    pub second_content: String,
    pub diff: LineDiff,
}

/// Version history operations over the documents of a [`DocumentStore`]
#[derive(Clone)]
pub struct VersionStore {
    store: Arc<DocumentStore>,
}

impl VersionStore {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Append a version. Never touches existing versions.
    pub fn snapshot(
        &self,
        document_id: &str,
        author_id: &str,
        author_name: &str,
        content: &str,
        title: &str,
        reason: &str,
    ) -> CoeditResult<Version> {
        let document = self.store.document(document_id)?;
        let draft = VersionDraft::new(author_id, author_name, content, title, reason);
        let version = document.update_versions(|log| log.append(document_id, draft));

        info!(
            "Recorded version {} of document {} ({})",
            version.id, document_id, version.reason
        );
        document.emit(Change::VersionAdded {
            version_id: version.id.clone(),
            reason: version.reason.clone(),
        });
        Ok(version)
    }

    /// Record a user-labelled version of `content`
    pub fn checkpoint(
        &self,
        document_id: &str,
        author: &UserProfile,
        content: &str,
        message: &str,
    ) -> CoeditResult<Version> {
        let message = message.trim();
        if message.is_empty() {
            return Err(CoeditError::validation("checkpoint message must not be empty"));
        }

        let document = self.store.document(document_id)?;
        document.require_participant(&author.user_id, "checkpoint")?;
        let title = document.read(|record| record.title.clone());

        self.snapshot(
            document_id,
            &author.user_id,
            &author.display_name,
            content,
            &title,
            &format!("Checkpoint: {}", message),
        )
    }

    /// All versions, newest first
    pub fn list(&self, document_id: &str) -> CoeditResult<Vec<Version>> {
        let document = self.store.document(document_id)?;
        Ok(document.read_versions(|log| log.newest_first().cloned().collect()))
    }

    /// A bounded page of versions older than `before`, newest first
    pub fn page(
        &self,
        document_id: &str,
        before: Option<u64>,
        limit: usize,
    ) -> CoeditResult<Vec<Version>> {
        let document = self.store.document(document_id)?;
        Ok(document.read_versions(|log| log.page(before, limit)))
    }

    pub fn get(&self, document_id: &str, version_id: &str) -> CoeditResult<Version> {
        let document = self.store.document(document_id)?;
        document
            .read_versions(|log| log.get(version_id).cloned())
            .ok_or_else(|| CoeditError::VersionNotFound {
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
            })
    }

    /// Replace the live content with a historical version
    ///
    /// Backs up the current state, overwrites content and title, stamps the
    /// restore and records the restored state, all while holding the
    /// document's record and version locks. Either every step happens or
    /// none does.
    pub fn restore(
        &self,
        document_id: &str,
        version_id: &str,
        acting_user_id: &str,
        acting_user_name: &str,
    ) -> CoeditResult<RestoreOutcome> {
        let document = self.store.document(document_id)?;
        document.require_participant(acting_user_id, "restore")?;

        let (outcome, title_changed) = document.transact(|record, log| {
            let target = log
                .get(version_id)
                .cloned()
                .ok_or_else(|| CoeditError::VersionNotFound {
                    document_id: document_id.to_string(),
                    version_id: version_id.to_string(),
                })?;

            let backup = log.append(
                document_id,
                VersionDraft::new(
                    acting_user_id,
                    acting_user_name,
                    record.content.clone(),
                    record.title.clone(),
                    format!("Backup before restore to version {}", version_id),
                )
                .backup(),
            );

            let title_changed = record.title != target.title;
            let revision = record.write_content(target.content.clone(), acting_user_id);
            record.title = target.title.clone();
            record.restored = Some(RestoreStamp {
                restored_from: version_id.to_string(),
                restored_by: acting_user_id.to_string(),
                restored_at: Utc::now(),
            });

            let restored = log.append(
                document_id,
                VersionDraft::new(
                    acting_user_id,
                    acting_user_name,
                    target.content,
                    target.title,
                    format!("Restored from version {}", version_id),
                )
                .restore_of(version_id),
            );

            Ok::<_, CoeditError>((
                RestoreOutcome {
                    backup,
                    restored,
                    revision,
                },
                title_changed,
            ))
        })?;

        info!(
            "User {} restored document {} to version {}",
            acting_user_id, document_id, version_id
        );

        let edited_at = document.read(|record| record.last_edited_at);
        document.emit(Change::Content {
            content: outcome.restored.content.clone(),
            revision: outcome.revision,
            edited_by: acting_user_id.to_string(),
            edited_at,
            restored_from: Some(version_id.to_string()),
        });
        if title_changed {
            document.emit(Change::Title {
                title: outcome.restored.title.clone(),
            });
        }
        for version in [&outcome.backup, &outcome.restored] {
            document.emit(Change::VersionAdded {
                version_id: version.id.clone(),
                reason: version.reason.clone(),
            });
        }

        Ok(outcome)
    }

    /// Delete all but the `keep_count` most recent versions in one batch
    pub fn prune(&self, document_id: &str, keep_count: usize) -> CoeditResult<usize> {
        let document = self.store.document(document_id)?;
        let removed = document.update_versions(|log| log.prune(keep_count));

        if removed > 0 {
            info!(
                "Pruned {} versions of document {} (kept {})",
                removed, document_id, keep_count
            );
            document.emit(Change::VersionsPruned { removed });
        }
        Ok(removed)
    }

    pub fn stats(&self, document_id: &str) -> CoeditResult<VersionStats> {
        let document = self.store.document(document_id)?;
        Ok(document.read_versions(|log| {
            let contributors: BTreeSet<String> = log
                .newest_first()
                .filter(|v| !v.author_name.is_empty())
                .map(|v| v.author_name.clone())
                .collect();

            VersionStats {
                total_versions: log.len(),
                total_backups: log.newest_first().filter(|v| v.is_backup).count(),
                total_restores: log.newest_first().filter(|v| v.is_restore).count(),
                contributors: contributors.into_iter().collect(),
                oldest: log.newest_first().last().map(Version::summary),
                newest: log.newest_first().next().map(Version::summary),
            }
        }))
    }

    /// Every version, newest first, with its difference from the one before
    pub fn timeline(&self, document_id: &str) -> CoeditResult<Vec<TimelineEntry>> {
        let versions = self.list(document_id)?;

        Ok(versions
            .iter()
            .enumerate()
            .map(|(index, version)| TimelineEntry {
                version: version.summary(),
                diff: versions
                    .get(index + 1)
                    .map(|older| diff(&older.content, &version.content)),
            })
            .collect())
    }

    pub fn compare(
        &self,
        document_id: &str,
        first_id: &str,
        second_id: &str,
    ) -> CoeditResult<VersionComparison> {
        let first = self.get(document_id, first_id)?;
        let second = self.get(document_id, second_id)?;

        Ok(VersionComparison {
            first: first.summary(),
            second: second.summary(),
            diff: diff(&first.content, &second.content),
            first_content: first.content,
            second_content: second.content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionKind;

    struct Fixture {
        store: Arc<DocumentStore>,
        versions: VersionStore,
        document_id: String,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(DocumentStore::new());
        let owner = UserProfile::new("owner", "Owner", "owner@example.com");
        let doc = store.create_document(&owner, Some("Notes".to_string()));
        Fixture {
            versions: VersionStore::new(store.clone()),
            document_id: doc.id().to_string(),
            store,
        }
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let f = fixture();
        let version = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "hello world", "Notes", "Auto-save")
            .unwrap();
        assert_eq!(version.word_count, 2);
        assert_eq!(version.character_count, 11);

        let empty = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "", "Notes", "Auto-save")
            .unwrap();
        assert_eq!(empty.word_count, 0);
        assert_eq!(empty.character_count, 0);
    }

    #[tokio::test]
    async fn test_snapshot_missing_document() {
        let f = fixture();
        let result = f
            .versions
            .snapshot("missing", "owner", "Owner", "x", "t", "Auto-save");
        assert!(matches!(result, Err(CoeditError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let f = fixture();
        for content in ["one", "two", "three"] {
            f.versions
                .snapshot(&f.document_id, "owner", "Owner", content, "Notes", "Auto-save")
                .unwrap();
        }

        let contents: Vec<_> = f
            .versions
            .list(&f.document_id)
            .unwrap()
            .into_iter()
            .map(|v| v.content)
            .collect();
        assert_eq!(contents, vec!["three", "two", "one"]);
    }

    #[tokio::test]
    async fn test_checkpoint_validation_and_reason() {
        let f = fixture();
        let owner = UserProfile::new("owner", "Owner", "owner@example.com");

        let empty = f.versions.checkpoint(&f.document_id, &owner, "text", "   ");
        assert!(matches!(empty, Err(CoeditError::Validation { .. })));
        assert!(f.versions.list(&f.document_id).unwrap().is_empty());

        let version = f
            .versions
            .checkpoint(&f.document_id, &owner, "text", " Final draft ")
            .unwrap();
        assert_eq!(version.reason, "Checkpoint: Final draft");
        assert_eq!(version.title, "Notes");

        let stranger = UserProfile::new("stranger", "S", "s@example.com");
        let denied = f
            .versions
            .checkpoint(&f.document_id, &stranger, "text", "mine");
        assert!(matches!(denied, Err(CoeditError::AccessDenied { .. })));
    }

    #[tokio::test]
    async fn test_restore_creates_backup_and_marker() {
        let f = fixture();
        f.store
            .write_content(&f.document_id, "owner", "first draft")
            .unwrap();
        let target = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "first draft", "Old title", "Auto-save")
            .unwrap();
        f.store
            .write_content(&f.document_id, "owner", "second draft")
            .unwrap();

        let before = f.versions.list(&f.document_id).unwrap().len();
        let outcome = f
            .versions
            .restore(&f.document_id, &target.id, "owner", "Owner")
            .unwrap();
        let after = f.versions.list(&f.document_id).unwrap();

        assert_eq!(after.len(), before + 2);
        assert_eq!(outcome.backup.content, "second draft");
        assert_eq!(outcome.backup.kind(), VersionKind::Backup);
        assert_eq!(
            outcome.backup.reason,
            format!("Backup before restore to version {}", target.id)
        );
        assert_eq!(outcome.restored.kind(), VersionKind::Restore);
        assert_eq!(
            outcome.restored.restored_from_version.as_deref(),
            Some(target.id.as_str())
        );
        assert_eq!(after[0].id, outcome.restored.id);
        assert_eq!(after[1].id, outcome.backup.id);

        let record = f.store.get_document(&f.document_id).unwrap().record();
        assert_eq!(record.content, "first draft");
        assert_eq!(record.title, "Old title");
        assert_eq!(record.revision, outcome.revision);
        let stamp = record.restored.unwrap();
        assert_eq!(stamp.restored_from, target.id);
        assert_eq!(stamp.restored_by, "owner");
    }

    #[tokio::test]
    async fn test_restore_unknown_version_changes_nothing() {
        let f = fixture();
        f.store.write_content(&f.document_id, "owner", "live").unwrap();

        let result = f
            .versions
            .restore(&f.document_id, "missing", "owner", "Owner");
        assert!(matches!(result, Err(CoeditError::VersionNotFound { .. })));
        assert!(f.versions.list(&f.document_id).unwrap().is_empty());
        assert_eq!(
            f.store.get_document(&f.document_id).unwrap().content(),
            "live"
        );
    }

    #[tokio::test]
    async fn test_restore_requires_participant() {
        let f = fixture();
        let target = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "x", "Notes", "Auto-save")
            .unwrap();

        let result = f
            .versions
            .restore(&f.document_id, &target.id, "stranger", "Stranger");
        assert!(matches!(result, Err(CoeditError::AccessDenied { .. })));
        assert_eq!(f.versions.list(&f.document_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_broadcasts_content() {
        let f = fixture();
        let target = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "old", "Notes", "Auto-save")
            .unwrap();
        let mut rx = f.store.subscribe_to_changes();

        f.versions
            .restore(&f.document_id, &target.id, "owner", "Owner")
            .unwrap();

        let event = rx.recv().await.unwrap();
        match event.change {
            Change::Content {
                content,
                restored_from,
                ..
            } => {
                assert_eq!(content, "old");
                assert_eq!(restored_from, Some(target.id.clone()));
            }
            other => panic!("Expected content change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_prune_keeps_most_recent() {
        let f = fixture();
        for i in 0..5 {
            f.versions
                .snapshot(&f.document_id, "owner", "Owner", &format!("v{}", i), "Notes", "Auto-save")
                .unwrap();
        }

        assert_eq!(f.versions.prune(&f.document_id, 2).unwrap(), 3);
        let remaining: Vec<_> = f
            .versions
            .list(&f.document_id)
            .unwrap()
            .into_iter()
            .map(|v| v.content)
            .collect();
        assert_eq!(remaining, vec!["v4", "v3"]);
        assert_eq!(f.versions.prune(&f.document_id, 2).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats_and_timeline() {
        let f = fixture();
        let first = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "a\nb\nc", "Notes", "Auto-save")
            .unwrap();
        f.versions
            .snapshot(&f.document_id, "guest", "Guest", "a\nx\nc\nd", "Notes", "Auto-save")
            .unwrap();
        f.versions
            .restore(&f.document_id, &first.id, "owner", "Owner")
            .unwrap();

        let stats = f.versions.stats(&f.document_id).unwrap();
        assert_eq!(stats.total_versions, 4);
        assert_eq!(stats.total_backups, 1);
        assert_eq!(stats.total_restores, 1);
        assert_eq!(stats.contributors, vec!["Guest", "Owner"]);
        assert_eq!(stats.oldest.unwrap().id, first.id);

        let timeline = f.versions.timeline(&f.document_id).unwrap();
        assert_eq!(timeline.len(), 4);
        assert!(timeline[3].diff.is_none());
        let second_diff = timeline[2].diff.unwrap();
        assert_eq!(second_diff.changed, 1);
        assert_eq!(second_diff.added, 1);
    }

    #[tokio::test]
    async fn test_compare() {
        let f = fixture();
        let a = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "a\nb\nc", "Notes", "Auto-save")
            .unwrap();
        let b = f
            .versions
            .snapshot(&f.document_id, "owner", "Owner", "a\nb", "Notes", "Auto-save")
            .unwrap();

        let comparison = f.versions.compare(&f.document_id, &a.id, &b.id).unwrap();
        assert_eq!(comparison.diff.removed, 1);
        assert_eq!(comparison.first_content, "a\nb\nc");

        let missing = f.versions.compare(&f.document_id, &a.id, "nope");
        assert!(matches!(missing, Err(CoeditError::VersionNotFound { .. })));
    }
}
