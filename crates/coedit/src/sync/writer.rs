use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoeditResult;

/// What a content write replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    /// Revision created by this write
    pub revision: u64,
    /// Revision that was live immediately before the write
    pub replaced_revision: u64,
    /// Author of the replaced revision, if it was ever written
    pub replaced_by: Option<String>,
    pub edited_at: DateTime<Utc>,
}

/// Destination of debounced content writes
///
/// [`crate::DocumentStore`] is the production writer. The seam exists so a
/// session can be pointed at a store that is slow, remote or failing. The
/// session keeps accepting edits while a write is pending.
#[async_trait]
pub trait DocumentWriter: Send + Sync {
    async fn write_content(
        &self,
        document_id: &str,
        author_id: &str,
        content: &str,
    ) -> CoeditResult<WriteReceipt>;
}
