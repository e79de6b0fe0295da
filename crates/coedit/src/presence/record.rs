use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::document::UserProfile;

/// Ephemeral marker that a user has a document open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub document_id: String,
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub is_active: bool,
}

impl PresenceRecord {
    pub(crate) fn new(document_id: &str, profile: &UserProfile, seen_at: DateTime<Utc>) -> Self {
        let display_name = if profile.display_name.trim().is_empty() {
            "Anonymous".to_string()
        } else {
            profile.display_name.clone()
        };

        Self {
            document_id: document_id.to_string(),
            user_id: profile.user_id.clone(),
            display_name,
            email: profile.email.clone(),
            photo_url: profile.photo_url.clone(),
            last_seen_at: seen_at,
            is_active: true,
        }
    }

    /// Staleness is derived on every read and never stored
    pub fn is_stale_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        let age = now.signed_duration_since(self.last_seen_at);
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => age > threshold,
            Err(_) => false,
        }
    }

    pub fn is_visible_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.is_active && !self.is_stale_at(now, threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_seen(seconds_ago: i64, now: DateTime<Utc>) -> PresenceRecord {
        let profile = UserProfile::new("u1", "Ada", "ada@example.com");
        PresenceRecord::new("doc", &profile, now - chrono::Duration::seconds(seconds_ago))
    }

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let threshold = Duration::from_secs(30);

        assert!(record_seen(31, now).is_stale_at(now, threshold));
        assert!(!record_seen(29, now).is_stale_at(now, threshold));
        assert!(!record_seen(30, now).is_stale_at(now, threshold));
    }

    #[test]
    fn test_blank_display_name_is_anonymous() {
        let profile = UserProfile::new("u1", "  ", "ada@example.com");
        let record = PresenceRecord::new("doc", &profile, Utc::now());
        assert_eq!(record.display_name, "Anonymous");
    }
}
