//! Heartbeats and disconnect detection.

use web_time::{SystemTime, UNIX_EPOCH};

use crate::config::SyncConfig;
use crate::room::RoomRecord;
use crate::store::{KeyValueStore, StoreError};
use crate::types::Side;

/// Milliseconds since the Unix epoch, on native and wasm32 alike.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

pub fn is_stale(last_heartbeat: u64, now_ms: u64, stale_after_ms: u64) -> bool {
    now_ms.saturating_sub(last_heartbeat) > stale_after_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Absent,
    Alive { age_ms: u64 },
    Stale { age_ms: u64 },
}

/// Heartbeat schedule for one seat of one room.
#[derive(Debug, Clone)]
pub struct Presence {
    side: Side,
    interval_ms: u64,
    stale_after_ms: u64,
    last_beat: Option<u64>,
}

impl Presence {
    pub fn new(side: Side, config: &SyncConfig) -> Self {
        Self {
            side,
            interval_ms: config.heartbeat_interval_ms,
            stale_after_ms: config.stale_after_ms,
            last_beat: None,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_beat
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.interval_ms)
    }

    /// Records a beat that was written by other means (e.g. the claim itself).
    pub fn mark(&mut self, now_ms: u64) {
        self.last_beat = Some(now_ms);
    }

    /// Merges our own heartbeat field; nothing else in the room is touched.
    pub fn beat<S: KeyValueStore>(&mut self, store: &S, path: &str, now_ms: u64) -> Result<(), StoreError> {
        store.merge(path, RoomRecord::heartbeat_fields(self.side, now_ms))?;
        self.mark(now_ms);
        Ok(())
    }

    /// `peer_heartbeat` is `None` while the opposite seat is empty.
    pub fn peer_status(&self, peer_heartbeat: Option<u64>, now_ms: u64) -> PeerStatus {
        match peer_heartbeat {
            None => PeerStatus::Absent,
            Some(beat) => {
                let age_ms = now_ms.saturating_sub(beat);
                if is_stale(beat, now_ms, self.stale_after_ms) {
                    PeerStatus::Stale { age_ms }
                } else {
                    PeerStatus::Alive { age_ms }
                }
            }
        }
    }

    /// The winner to record if the peer has gone quiet, i.e. our own side.
    pub fn detect_abandonment(&self, peer_heartbeat: Option<u64>, now_ms: u64) -> Option<Side> {
        match self.peer_status(peer_heartbeat, now_ms) {
            PeerStatus::Stale { .. } => Some(self.side),
            _ => None,
        }
    }
}
