use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is playing on this device. Tokens are not guaranteed unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub display_name: String,
    pub device_token: String,
}

impl Identity {
    pub fn new(display_name: impl Into<String>, device_token: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            device_token: device_token.into(),
        }
    }

    /// Mints a fresh random token for a device that has none yet.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self::new(display_name, Uuid::new_v4().to_string())
    }

    pub fn is_usable(&self) -> bool {
        !self.device_token.trim().is_empty()
    }
}
