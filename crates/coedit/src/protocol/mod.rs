use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Role, UserProfile};
use crate::presence::PresenceRecord;
use crate::sync::SyncNotice;
use crate::version::VersionSummary;

/// Messages sent from client to server
///
/// The first message on a connection must be `Open`; everything after it
/// applies to the document that was opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start an editing session on a document
    Open {
        document_id: String,
        user: UserProfile,
    },
    /// The complete new content of the document
    Edit { content: String },
    /// Record a labelled version of the current content
    Checkpoint { message: String },
    /// Replace the live content with a historical version
    Restore { version_id: String },
    /// Request the version history
    ListVersions,
    /// Write any pending edit immediately
    Flush,
    /// End the session
    Close,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Session opened; carries the current persisted state
    Opened {
        document_id: String,
        title: String,
        content: String,
        revision: u64,
        role: Role,
    },
    /// Another writer changed the content
    ///
    /// When `local_replaced` is false the session kept this client's unsaved
    /// edits, which replace `content` on the next save; the client should
    /// keep showing its own text.
    RemoteChange {
        document_id: String,
        content: String,
        revision: u64,
        edited_by: String,
        restored_from: Option<String>,
        local_replaced: bool,
    },
    /// Current set of active users
    Presence {
        document_id: String,
        users: Vec<PresenceRecord>,
    },
    /// Transient status notification (saved, failed, overwritten...)
    Notice { notice: SyncNotice },
    /// Version history, newest first
    Versions {
        document_id: String,
        versions: Vec<VersionSummary>,
    },
    /// A checkpoint was recorded
    VersionCreated { version_id: String, reason: String },
    /// The document was restored
    Restored {
        version_id: String,
        backup_version_id: String,
        restore_version_id: String,
        content: String,
    },
    /// Error message
    Error { message: String },
    /// The preceding `Flush` or `Close` completed
    Ack,
}

/// A change to a document observed by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Change {
    Created,
    /// The content was overwritten, either by an edit or by a restore
    Content {
        content: String,
        revision: u64,
        edited_by: String,
        edited_at: DateTime<Utc>,
        restored_from: Option<String>,
    },
    Title { title: String },
    Participants,
    Presence,
    VersionAdded { version_id: String, reason: String },
    VersionsPruned { removed: usize },
    Deleted,
}

/// A change tagged with the document it happened to, as broadcast by the store
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub document_id: String,
    pub change: Change,
}

/// Encode a message using lib0 format
pub fn encode_message<T: Serialize>(message: &T) -> crate::CoeditResult<Vec<u8>> {
    let json = serde_json::to_string(message)?;
    let mut encoder = Vec::new();
    lib0::encoding::Write::write_string(&mut encoder, &json);
    Ok(encoder)
}

/// Decode a message from lib0 format
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> crate::CoeditResult<T> {
    let mut decoder = lib0::decoding::Cursor::new(data);
    let json = lib0::decoding::Read::read_string(&mut decoder).map_err(|e| {
        crate::CoeditError::Protocol {
            message: format!("Failed to decode lib0 string: {}", e),
        }
    })?;

    let message = serde_json::from_str(json)?;
    Ok(message)
}
