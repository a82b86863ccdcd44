use serde::{Deserialize, Serialize};

/// Tunables shared by every client of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Number of fixed room slots scanned during matching.
    pub slot_count: usize,
    pub room_prefix: String,
    pub heartbeat_interval_ms: u64,
    /// A heartbeat older than this marks its owner as gone.
    pub stale_after_ms: u64,
    /// How long a finished room lingers before White removes it.
    pub finish_grace_ms: u64,
    pub notice_ttl_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            slot_count: 10,
            room_prefix: "rooms/".to_string(),
            heartbeat_interval_ms: 3_000,
            stale_after_ms: 15_000,
            finish_grace_ms: 5_000,
            notice_ttl_ms: 4_000,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON object; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn slot_path(&self, slot: usize) -> String {
        format!("{}{}", self.room_prefix, slot)
    }
}
