pub mod diff;
pub mod export;
pub mod log;
pub mod model;
pub mod store;

pub use diff::{diff, LineDiff};
pub use export::{export, ExportFormat, ExportedFile};
pub use log::VersionLog;
pub use model::{Version, VersionDraft, VersionKind, VersionSummary, AUTO_SAVE_REASON};
pub use store::{RestoreOutcome, TimelineEntry, VersionComparison, VersionStats, VersionStore};
