pub mod doc;
pub mod join_code;
pub mod record;
pub mod store;

pub use doc::{Document, DocumentHandle, PersistedDocument};
pub use record::{DocumentRecord, Participant, RestoreStamp, Role, UserProfile, DEFAULT_TITLE};
pub use store::DocumentStore;
