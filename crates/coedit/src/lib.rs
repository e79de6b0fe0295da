//! # coedit - collaborative document editing core
//!
//! Shared plain-text documents edited concurrently by several users.
//!
//! A [`DocumentStore`] holds every document together with its version log and
//! presence records. Each user edits through a [`SyncEngine`], which debounces
//! local edits into whole-content writes, takes automatic snapshots, filters
//! its own echoes out of the change stream and keeps the user's presence
//! fresh. Concurrent writes resolve last-writer-wins, and a session is told
//! when its write replaced work it had never seen.

pub mod config;
pub mod document;
pub mod error;
pub mod presence;
pub mod protocol;
pub mod sync;
pub mod transform;
pub mod version;

#[cfg(feature = "persistence")]
pub mod persistence;

#[cfg(feature = "axum")]
pub mod axum;

pub use config::CoeditConfig;
pub use document::{
    Document, DocumentHandle, DocumentRecord, DocumentStore, Participant, Role, UserProfile,
};
pub use error::{CoeditError, CoeditResult};
pub use presence::{PresenceRecord, PresenceSubscription, PresenceTracker};
pub use protocol::{Change, ChangeEvent, ClientMessage, ServerMessage};
pub use sync::{DocumentWriter, EditSession, RemoteChange, SyncEngine, SyncNotice, WriteReceipt};
pub use transform::{EditHistory, TextTransform, TextTransformer, Tone, TransformOperation};
pub use version::{
    ExportFormat, LineDiff, RestoreOutcome, Version, VersionKind, VersionStore, VersionSummary,
};

#[cfg(feature = "axum")]
pub use axum::{router_with_coedit, CoeditState, WebSocketHandler};

#[cfg(feature = "persistence")]
pub use persistence::PersistenceManager;
