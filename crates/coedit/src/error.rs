use thiserror::Error;

/// Result type for coedit operations
pub type CoeditResult<T> = Result<T, CoeditError>;

/// Errors that can occur in coedit operations
#[derive(Error, Debug)]
pub enum CoeditError {
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Version not found: {version_id} in document {document_id}")]
    VersionNotFound {
        document_id: String,
        version_id: String,
    },

    #[error("Access denied: user {user_id} may not {action} document {document_id}")]
    AccessDenied {
        document_id: String,
        user_id: String,
        action: &'static str,
    },

    /// A store write failed; the caller keeps its in-memory state and may retry.
    #[error("Failed to persist: {message}")]
    PersistFailed { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Editing session for document {document_id} is closed")]
    SessionClosed { document_id: String },

    #[error("Failed to apply {operation}: {message}")]
    Transform { operation: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[cfg(feature = "persistence")]
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoeditError {
    pub(crate) fn not_found(id: &str) -> Self {
        Self::DocumentNotFound { id: id.to_string() }
    }

    pub(crate) fn denied(document_id: &str, user_id: &str, action: &'static str) -> Self {
        Self::AccessDenied {
            document_id: document_id.to_string(),
            user_id: user_id.to_string(),
            action,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether the failure is worth retrying on the next edit
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PersistFailed { .. })
    }
}
