//! Client-side editing sessions.
//!
//! A [`SyncEngine`] binds one [`EditSession`] to a document: local edits are
//! debounced into whole-content writes, each successful write arms an
//! auto-snapshot, other writers' changes are delivered back with the
//! session's own echoes filtered out, and a heartbeat keeps the user's
//! presence record fresh until the session closes.

mod engine;
mod session;
mod timer;
mod writer;

pub use engine::{RemoteChange, SyncEngine};
pub use session::{EditSession, Reconcile};
pub use timer::{SessionTimers, TimerKind};
pub use writer::{DocumentWriter, WriteReceipt};

use serde::{Deserialize, Serialize};

/// Transient status a session reports to its user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SyncNotice {
    Saved {
        revision: u64,
    },
    /// The write failed; local content is kept and the next edit retries
    SaveFailed {
        message: String,
    },
    SnapshotSaved {
        version_id: String,
    },
    SnapshotFailed {
        message: String,
    },
    /// A write replaced another user's revision this session had not built on
    ConcurrentOverwrite {
        overwritten_revision: u64,
        overwritten_by: Option<String>,
    },
    DocumentDeleted,
}
