use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default title given to newly created documents
pub const DEFAULT_TITLE: &str = "Untitled Document";

/// A participant's role in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Collaborator,
}

impl Role {
    /// Whether this role may change content or restore versions
    pub fn can_edit(self) -> bool {
        match self {
            Role::Owner | Role::Collaborator => true,
        }
    }

    /// Whether this role may delete the document or change roles
    pub fn can_manage(self) -> bool {
        match self {
            Role::Owner => true,
            Role::Collaborator => false,
        }
    }
}

/// Identity of a user as handed over by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl UserProfile {
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            email: email.into(),
            photo_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub role: Role,
    pub email: String,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub(crate) fn from_profile(profile: &UserProfile, role: Role, joined_at: DateTime<Utc>) -> Self {
        Self {
            role,
            email: profile.email.clone(),
            display_name: profile.display_name.clone(),
            joined_at,
        }
    }
}

/// Marker left on a document whose content was replaced by a restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreStamp {
    pub restored_from: String,
    pub restored_by: String,
    pub restored_at: DateTime<Utc>,
}

/// The persisted state of a shared document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub participants: HashMap<String, Participant>,
    pub join_code: String,
    pub content: String,
    /// Incremented on every content write
    pub revision: u64,
    pub last_edited_at: DateTime<Utc>,
    #[serde(default)]
    pub last_edited_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub restored: Option<RestoreStamp>,
}

impl DocumentRecord {
    pub(crate) fn new(id: String, owner: &UserProfile, title: String, join_code: String) -> Self {
        let now = Utc::now();
        let mut participants = HashMap::new();
        participants.insert(
            owner.user_id.clone(),
            Participant::from_profile(owner, Role::Owner, now),
        );

        Self {
            id,
            title,
            owner_id: owner.user_id.clone(),
            participants,
            join_code,
            content: String::new(),
            revision: 0,
            last_edited_at: now,
            last_edited_by: None,
            created_at: now,
            restored: None,
        }
    }

    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.participants.get(user_id).map(|p| p.role)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.contains_key(user_id)
    }

    /// Overwrite the content and bump the revision
    pub(crate) fn write_content(&mut self, content: String, author_id: &str) -> u64 {
        self.content = content;
        self.revision += 1;
        self.last_edited_at = Utc::now();
        self.last_edited_by = Some(author_id.to_string());
        self.revision
    }
}
