//! Slot scanning and seat claiming.
//!
//! Matching is client driven: every client scans the same fixed slots and
//! writes directly. Two joiners racing for one slot can both succeed locally;
//! the later write wins the record and the earlier joiner learns it was
//! displaced from its next observation.

use log::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::room::{Occupant, Phase, RoomRecord};
use crate::store::KeyValueStore;
use crate::types::Side;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchPlan {
    /// Write a fresh room and wait as White.
    Claim { slot: usize },
    /// Take the Black seat of a waiting room.
    Join { slot: usize, record: RoomRecord },
}

impl MatchPlan {
    pub fn slot(&self) -> usize {
        match self {
            MatchPlan::Claim { slot } | MatchPlan::Join { slot, .. } => *slot,
        }
    }
}

/// Result of a committed plan: where we sit and the room as we wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTicket {
    pub slot: usize,
    pub path: String,
    pub role: Side,
    pub record: RoomRecord,
}

pub struct RoomDirectory<'a, S: KeyValueStore> {
    store: &'a S,
    config: &'a SyncConfig,
}

impl<'a, S: KeyValueStore> RoomDirectory<'a, S> {
    pub fn new(store: &'a S, config: &'a SyncConfig) -> Self {
        Self { store, config }
    }

    /// Reads every slot and picks one without writing anything.
    ///
    /// The first joinable room wins over any claimable one. Records that do not
    /// decode are treated as free.
    pub fn survey(&self, identity: &Identity, now_ms: u64) -> Result<MatchPlan> {
        let stale_after = self.config.stale_after_ms;
        let mut claimable = None;

        for slot in 0..self.config.slot_count {
            let path = self.config.slot_path(slot);
            let Some(value) = self.store.read(&path)? else {
                claimable = claimable.or(Some(slot));
                continue;
            };
            let record = match RoomRecord::from_value(value) {
                Ok(record) => record,
                Err(err) => {
                    debug!("slot {slot} holds an unreadable record ({err}); treating it as free");
                    claimable = claimable.or(Some(slot));
                    continue;
                }
            };

            if record.is_joinable(identity, now_ms, stale_after) {
                return Ok(MatchPlan::Join { slot, record });
            }
            if claimable.is_none() && record.is_claimable(now_ms, stale_after) {
                claimable = Some(slot);
            }
        }

        claimable
            .map(|slot| MatchPlan::Claim { slot })
            .ok_or(Error::CapacityExceeded {
                slots: self.config.slot_count,
            })
    }

    pub fn commit(&self, plan: MatchPlan, identity: &Identity, now_ms: u64) -> Result<MatchTicket> {
        match plan {
            MatchPlan::Claim { slot } => {
                let path = self.config.slot_path(slot);
                let record = RoomRecord::open(slot, identity, now_ms)?;
                self.store.write(&path, record.to_value()?)?;
                info!("{} claimed slot {slot} as white", identity.display_name);
                Ok(MatchTicket {
                    slot,
                    path,
                    role: Side::White,
                    record,
                })
            }
            MatchPlan::Join { slot, mut record } => {
                let path = self.config.slot_path(slot);
                let occupant = Occupant::from(identity);
                self.store
                    .merge(&path, RoomRecord::join_fields(&occupant, now_ms)?)?;
                info!("{} joined slot {slot} as black", identity.display_name);
                record.black = Some(occupant);
                record.black_heartbeat = now_ms;
                record.phase = Phase::Active;
                Ok(MatchTicket {
                    slot,
                    path,
                    role: Side::Black,
                    record,
                })
            }
        }
    }

    pub fn find_match(&self, identity: Option<&Identity>, now_ms: u64) -> Result<MatchTicket> {
        let identity = identity
            .filter(|identity| identity.is_usable())
            .ok_or(Error::IdentityMissing)?;
        let plan = self.survey(identity, now_ms)?;
        self.commit(plan, identity, now_ms)
    }
}
