use wasm_bindgen::prelude::*;

pub mod bindings;
pub mod board;
pub mod config;
pub mod directory;
pub mod error;
pub mod game;
pub mod identity;
pub mod notice;
pub mod presence;
pub mod room;
mod rules;
pub mod session;
pub mod store;
pub mod types;

pub use board::Board;
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use game::{Game, GameError};
pub use identity::Identity;
pub use session::{Session, SessionEvent};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{GameSnapshot, GameStatus, Move, Piece, PieceKind, Position, Side};

#[wasm_bindgen]
pub fn wasm_ready() -> bool {
    true
}
