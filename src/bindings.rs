//! Stateless JS entry points. Snapshots travel as plain objects and every call
//! re-validates the snapshot it is given.

use std::fmt::Display;

use serde::Serialize;
use serde_wasm_bindgen::Serializer;
use wasm_bindgen::prelude::*;

use crate::game::Game;
use crate::types::{GameSnapshot, Move, PieceKind, Position};

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(JsValue::from)
}

fn error_to_js(err: impl Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn game_from_js(snapshot: JsValue) -> Result<Game, JsValue> {
    let snapshot: GameSnapshot = serde_wasm_bindgen::from_value(snapshot)?;
    Game::from_snapshot(snapshot).map_err(error_to_js)
}

fn square(row: u8, col: u8) -> Result<Position, JsValue> {
    Position::new(row, col).ok_or_else(|| JsValue::from_str("square is off the board"))
}

#[wasm_bindgen(js_name = newSnapshot)]
pub fn new_snapshot() -> Result<JsValue, JsValue> {
    to_js(&GameSnapshot::initial())
}

#[wasm_bindgen(js_name = legalDestinations)]
pub fn legal_destinations(snapshot: JsValue, row: u8, col: u8) -> Result<JsValue, JsValue> {
    let game = game_from_js(snapshot)?;
    to_js(&game.legal_moves(square(row, col)?))
}

/// Returns the next snapshot, or throws with the reason the move was refused.
#[wasm_bindgen(js_name = playMove)]
pub fn play_move(
    snapshot: JsValue,
    from_row: u8,
    from_col: u8,
    to_row: u8,
    to_col: u8,
) -> Result<JsValue, JsValue> {
    let mut game = game_from_js(snapshot)?;
    let mv = Move::new(square(from_row, from_col)?, square(to_row, to_col)?);
    game.play(mv).map_err(error_to_js)?;
    to_js(game.snapshot())
}

#[wasm_bindgen(js_name = choosePromotion)]
pub fn choose_promotion(snapshot: JsValue, kind: &str) -> Result<JsValue, JsValue> {
    let mut game = game_from_js(snapshot)?;
    let kind = PieceKind::from_name(kind)
        .ok_or_else(|| JsValue::from_str(&format!("unknown piece kind {kind:?}")))?;
    game.promote(kind).map_err(error_to_js)?;
    to_js(game.snapshot())
}

#[wasm_bindgen(js_name = snapshotChecksum)]
pub fn snapshot_checksum(snapshot: JsValue) -> Result<u32, JsValue> {
    let snapshot: GameSnapshot = serde_wasm_bindgen::from_value(snapshot)?;
    snapshot.checksum().map_err(error_to_js)
}
