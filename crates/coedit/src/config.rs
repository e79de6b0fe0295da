use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::{CoeditError, CoeditResult};

/// Tunables for editing sessions, presence and persistence
///
/// Every duration is independent. In particular the heartbeat interval and
/// the staleness threshold are not derived from each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoeditConfig {
    /// Quiet period before a burst of local edits is written
    #[serde(rename = "debounce_ms", with = "millis")]
    pub debounce: Duration,
    /// Delay after a successful write before an "Auto-save" version is taken
    #[serde(rename = "auto_snapshot_delay_ms", with = "millis")]
    pub auto_snapshot_delay: Duration,
    /// How often an open session refreshes its presence record
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,
    /// Maximum heartbeat age before a presence record is treated as absent
    #[serde(rename = "staleness_threshold_ms", with = "millis")]
    pub staleness_threshold: Duration,
    /// How often presence subscribers re-filter without a triggering write
    #[serde(rename = "presence_recheck_interval_ms", with = "millis")]
    pub presence_recheck_interval: Duration,
    /// Capacity of the store's change broadcast channel
    pub change_channel_capacity: usize,
    /// Interval between persistence passes over dirty documents
    #[serde(rename = "persist_interval_ms", with = "millis")]
    pub persist_interval: Duration,
}

impl Default for CoeditConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            auto_snapshot_delay: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            staleness_threshold: Duration::from_secs(30),
            presence_recheck_interval: Duration::from_secs(5),
            change_channel_capacity: 1000,
            persist_interval: Duration::from_secs(10),
        }
    }
}

impl CoeditConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json_str(json: &str) -> CoeditResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub async fn load(path: impl AsRef<Path>) -> CoeditResult<Self> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&json)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> CoeditResult<()> {
        let durations = [
            ("debounce", self.debounce),
            ("auto_snapshot_delay", self.auto_snapshot_delay),
            ("heartbeat_interval", self.heartbeat_interval),
            ("staleness_threshold", self.staleness_threshold),
            ("presence_recheck_interval", self.presence_recheck_interval),
            ("persist_interval", self.persist_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(CoeditError::validation(format!("{} must be non-zero", name)));
            }
        }

        if self.change_channel_capacity == 0 {
            return Err(CoeditError::validation(
                "change_channel_capacity must be non-zero",
            ));
        }

        if self.heartbeat_interval >= self.staleness_threshold {
            warn!(
                "Heartbeat interval {:?} is not shorter than staleness threshold {:?}; open sessions will flicker out of presence",
                self.heartbeat_interval, self.staleness_threshold
            );
        }

        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
