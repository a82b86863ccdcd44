//! Errors surfaced by the matching and sync layers.

use thiserror::Error;

use crate::game::GameError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    /// No usable device token was supplied to matching
    #[error("an identity with a device token is required to play")]
    IdentityMissing,

    /// Every slot is held by a live player
    #[error("all {slots} rooms are occupied")]
    CapacityExceeded { slots: usize },

    /// The key-value store failed or is unreachable
    #[error("transport failure: {0}")]
    Transport(#[from] StoreError),

    /// The local rules engine refused the requested transition
    #[error("illegal move requested: {0}")]
    IllegalMoveRequested(#[from] GameError),

    /// The side to move belongs to the other player
    #[error("it is not your turn")]
    NotYourTurn,

    /// The room has no second player yet
    #[error("waiting for an opponent to join")]
    WaitingForOpponent,

    /// A newer snapshot arrived after the local game had already ended
    #[error("snapshot at ply {ply} arrived after the game ended")]
    StaleSnapshotObserved { ply: u32 },

    /// A room record could not be encoded or decoded
    #[error("malformed room record: {0}")]
    Codec(#[from] serde_json::Error),

    /// The session has left its room
    #[error("session is closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
