use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const AUTO_SAVE_REASON: &str = "Auto-save";

/// An immutable snapshot of a document's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub document_id: String,
    /// Position in the document's log; later versions have larger sequences
    pub sequence: u64,
    pub content: String,
    pub title: String,
    pub reason: String,
    pub author_id: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub word_count: usize,
    pub character_count: usize,
    #[serde(default)]
    pub is_backup: bool,
    #[serde(default)]
    pub is_restore: bool,
    #[serde(default)]
    pub restored_from_version: Option<String>,
}

impl Version {
    pub fn kind(&self) -> VersionKind {
        if self.is_restore {
            VersionKind::Restore
        } else if self.is_backup {
            VersionKind::Backup
        } else {
            VersionKind::Manual
        }
    }

    /// Metadata without the content body, for history listings
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            id: self.id.clone(),
            sequence: self.sequence,
            title: self.title.clone(),
            reason: self.reason.clone(),
            author_id: self.author_id.clone(),
            author_name: self.author_name.clone(),
            created_at: self.created_at,
            word_count: self.word_count,
            character_count: self.character_count,
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    Manual,
    Backup,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSummary {
    pub id: String,
    pub sequence: u64,
    pub title: String,
    pub reason: String,
    pub author_id: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub word_count: usize,
    pub character_count: usize,
    pub kind: VersionKind,
}

/// Everything a caller supplies for a new version; the log assigns the rest
#[derive(Debug, Clone)]
pub struct VersionDraft {
    pub content: String,
    pub title: String,
    pub reason: String,
    pub author_id: String,
    pub author_name: String,
    pub is_backup: bool,
    pub is_restore: bool,
    pub restored_from_version: Option<String>,
}

impl VersionDraft {
    pub fn new(
        author_id: impl Into<String>,
        author_name: impl Into<String>,
        content: impl Into<String>,
        title: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            title: title.into(),
            reason: reason.into(),
            author_id: author_id.into(),
            author_name: author_name.into(),
            is_backup: false,
            is_restore: false,
            restored_from_version: None,
        }
    }

    pub(crate) fn backup(mut self) -> Self {
        self.is_backup = true;
        self
    }

    pub(crate) fn restore_of(mut self, version_id: &str) -> Self {
        self.is_restore = true;
        self.restored_from_version = Some(version_id.to_string());
        self
    }
}

/// Whitespace-delimited tokens, empty tokens excluded
pub fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

pub fn character_count(content: &str) -> usize {
    content.chars().count()
}
