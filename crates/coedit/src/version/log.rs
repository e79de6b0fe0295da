use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{character_count, word_count, Version, VersionDraft};

/// Append-only version history of a single document
///
/// Entries are kept in append order, so the newest version is always last.
/// The only removal is [`VersionLog::prune`], which drops the oldest entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionLog {
    entries: Vec<Version>,
    next_sequence: u64,
}

impl VersionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, document_id: &str, draft: VersionDraft) -> Version {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let version = Version {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            sequence,
            word_count: word_count(&draft.content),
            character_count: character_count(&draft.content),
            content: draft.content,
            title: draft.title,
            reason: draft.reason,
            author_id: draft.author_id,
            author_name: draft.author_name,
            created_at: Utc::now(),
            is_backup: draft.is_backup,
            is_restore: draft.is_restore,
            restored_from_version: draft.restored_from_version,
        };

        self.entries.push(version.clone());
        version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, version_id: &str) -> Option<&Version> {
        self.entries.iter().find(|v| v.id == version_id)
    }

    /// Iterate newest first
    pub fn newest_first(&self) -> impl Iterator<Item = &Version> {
        self.entries.iter().rev()
    }

    /// At most `limit` versions older than `before` (a sequence), newest first
    pub fn page(&self, before: Option<u64>, limit: usize) -> Vec<Version> {
        self.newest_first()
            .filter(|v| before.map_or(true, |cursor| v.sequence < cursor))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Keep only the `keep` most recent versions, returning how many were dropped
    pub(crate) fn prune(&mut self, keep: usize) -> usize {
        let excess = self.entries.len().saturating_sub(keep);
        self.entries.drain(..excess);
        excess
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(content: &str) -> VersionDraft {
        VersionDraft::new("u1", "Ada", content, "Title", "Auto-save")
    }

    #[test]
    fn test_append_assigns_sequence_and_counts() {
        let mut log = VersionLog::new();
        let first = log.append("doc", draft("hello world"));
        let second = log.append("doc", draft(""));

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.word_count, 2);
        assert_eq!(first.character_count, 11);
        assert_eq!(second.word_count, 0);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_newest_first_and_paging() {
        let mut log = VersionLog::new();
        for i in 0..5 {
            log.append("doc", draft(&format!("v{}", i)));
        }

        let contents: Vec<_> = log.newest_first().map(|v| v.content.as_str()).collect();
        assert_eq!(contents, vec!["v4", "v3", "v2", "v1", "v0"]);

        let first_page = log.page(None, 2);
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[1].content, "v3");

        let second_page = log.page(Some(first_page[1].sequence), 2);
        let contents: Vec<_> = second_page.iter().map(|v| v.content.as_str()).collect();
        assert_eq!(contents, vec!["v2", "v1"]);
    }

    #[test]
    fn test_prune_keeps_newest() {
        let mut log = VersionLog::new();
        for i in 0..5 {
            log.append("doc", draft(&format!("v{}", i)));
        }

        assert_eq!(log.prune(2), 3);
        let contents: Vec<_> = log.newest_first().map(|v| v.content.as_str()).collect();
        assert_eq!(contents, vec!["v4", "v3"]);
        assert_eq!(log.prune(10), 0);

        // Sequences keep growing after a prune
        assert_eq!(log.append("doc", draft("v5")).sequence, 5);
    }
}
