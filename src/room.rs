//! The persisted room record and the partial updates each participant writes.
//!
//! White owns `white`, `whiteHeartbeat` and deletion; Black owns `black` and
//! `blackHeartbeat`. `snapshot`, `checksum` and `phase` are written by whoever
//! completed the latest transition.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Identity;
use crate::presence::is_stale;
use crate::types::{GameSnapshot, Side};

/// Lifecycle of a room. Ordered so observers can refuse to move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Waiting,
    Active,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupant {
    pub display_name: String,
    pub device_token: String,
}

impl From<&Identity> for Occupant {
    fn from(identity: &Identity) -> Self {
        Self {
            display_name: identity.display_name.clone(),
            device_token: identity.device_token.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub slot: usize,
    pub white: Option<Occupant>,
    #[serde(default)]
    pub black: Option<Occupant>,
    #[serde(default)]
    pub white_heartbeat: u64,
    #[serde(default)]
    pub black_heartbeat: u64,
    pub phase: Phase,
    pub snapshot: GameSnapshot,
    pub checksum: u32,
}

impl RoomRecord {
    /// A freshly claimed room: `host` plays White and waits for an opponent.
    pub fn open(slot: usize, host: &Identity, now_ms: u64) -> Result<Self, serde_json::Error> {
        let snapshot = GameSnapshot::initial();
        let checksum = snapshot.checksum()?;
        Ok(Self {
            slot,
            white: Some(Occupant::from(host)),
            black: None,
            white_heartbeat: now_ms,
            black_heartbeat: 0,
            phase: Phase::Waiting,
            snapshot,
            checksum,
        })
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// False when `snapshot` and `checksum` come from different writes.
    pub fn verify_checksum(&self) -> bool {
        self.snapshot
            .checksum()
            .is_ok_and(|checksum| checksum == self.checksum)
    }

    pub fn occupant(&self, side: Side) -> Option<&Occupant> {
        match side {
            Side::White => self.white.as_ref(),
            Side::Black => self.black.as_ref(),
        }
    }

    pub fn heartbeat(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_heartbeat,
            Side::Black => self.black_heartbeat,
        }
    }

    /// Free, or held by a first occupant who stopped heartbeating.
    pub fn is_claimable(&self, now_ms: u64, stale_after_ms: u64) -> bool {
        self.white.is_none() || is_stale(self.white_heartbeat, now_ms, stale_after_ms)
    }

    pub fn is_joinable(&self, identity: &Identity, now_ms: u64, stale_after_ms: u64) -> bool {
        let Some(host) = &self.white else {
            return false;
        };
        self.phase == Phase::Waiting
            && self.black.is_none()
            && !is_stale(self.white_heartbeat, now_ms, stale_after_ms)
            && host.device_token != identity.device_token
    }

    /// Fields a joiner merges to take the Black seat and start the match.
    pub fn join_fields(joiner: &Occupant, now_ms: u64) -> Result<Map<String, Value>, serde_json::Error> {
        let mut fields = Map::new();
        fields.insert("black".into(), serde_json::to_value(joiner)?);
        fields.insert("blackHeartbeat".into(), Value::from(now_ms));
        fields.insert("phase".into(), serde_json::to_value(Phase::Active)?);
        Ok(fields)
    }

    /// Reverses [`RoomRecord::join_fields`], reopening the room for joiners.
    pub fn vacate_black_fields() -> Result<Map<String, Value>, serde_json::Error> {
        let mut fields = Map::new();
        fields.insert("black".into(), Value::Null);
        fields.insert("blackHeartbeat".into(), Value::from(0u64));
        fields.insert("phase".into(), serde_json::to_value(Phase::Waiting)?);
        Ok(fields)
    }

    pub fn heartbeat_fields(side: Side, now_ms: u64) -> Map<String, Value> {
        let key = match side {
            Side::White => "whiteHeartbeat",
            Side::Black => "blackHeartbeat",
        };
        let mut fields = Map::new();
        fields.insert(key.into(), Value::from(now_ms));
        fields
    }

    /// Snapshot, its checksum and the phase, written together after a transition.
    pub fn snapshot_fields(
        snapshot: &GameSnapshot,
        phase: Phase,
    ) -> Result<Map<String, Value>, serde_json::Error> {
        let mut fields = Map::new();
        fields.insert("snapshot".into(), serde_json::to_value(snapshot)?);
        fields.insert("checksum".into(), Value::from(snapshot.checksum()?));
        fields.insert("phase".into(), serde_json::to_value(phase)?);
        Ok(fields)
    }
}
