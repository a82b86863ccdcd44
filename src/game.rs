use thiserror::Error;

use crate::board::Board;
use crate::types::{GameSnapshot, GameStatus, Move, PieceKind, Position, Side};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("game is already over")]
    GameOver,
    #[error("promotion on {square} must be resolved first")]
    PromotionPending { square: Position },
    #[error("no promotion is pending")]
    NoPromotionPending,
    #[error("{0:?} is not a valid promotion")]
    InvalidPromotionKind(PieceKind),
    #[error("illegal move {mv}")]
    IllegalMove { mv: Move },
    #[error("snapshot rejected: {0}")]
    InvalidSnapshot(&'static str),
}

/// Turn order and terminal-state bookkeeping over a [`GameSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    snapshot: GameSnapshot,
}

impl Game {
    pub fn new() -> Self {
        Self {
            snapshot: GameSnapshot::initial(),
        }
    }

    /// Adopts a snapshot received from a peer.
    ///
    /// Terminal snapshots are frozen and taken as-is. Otherwise the status is
    /// recomputed from the board, so a peer's claimed status is never trusted
    /// when it can be derived.
    pub fn from_snapshot(snapshot: GameSnapshot) -> Result<Self, GameError> {
        if snapshot.status.is_terminal() {
            return Ok(Self { snapshot });
        }
        if !snapshot.board.has_both_kings() {
            return Err(GameError::InvalidSnapshot("each side needs exactly one king"));
        }

        let mut snapshot = snapshot;
        snapshot.abandonment = false;
        match snapshot.pending_promotion {
            Some(square) => {
                let owned = snapshot
                    .board
                    .get(square)
                    .is_some_and(|piece| piece.side == snapshot.side_to_move);
                if !owned || !snapshot.board.awaits_promotion(square) {
                    return Err(GameError::InvalidSnapshot(
                        "pending promotion square holds no promotable pawn",
                    ));
                }
                snapshot.status = GameStatus::Promotion;
                snapshot.winner = None;
            }
            None => {
                let (status, winner) = derive_status(
                    &snapshot.board,
                    snapshot.side_to_move,
                    snapshot.last_move,
                );
                snapshot.status = status;
                snapshot.winner = winner;
            }
        }
        Ok(Self { snapshot })
    }

    pub fn snapshot(&self) -> &GameSnapshot {
        &self.snapshot
    }

    pub fn board(&self) -> &Board {
        &self.snapshot.board
    }

    pub fn status(&self) -> GameStatus {
        self.snapshot.status
    }

    pub fn side_to_move(&self) -> Side {
        self.snapshot.side_to_move
    }

    pub fn winner(&self) -> Option<Side> {
        self.snapshot.winner
    }

    pub fn is_over(&self) -> bool {
        self.snapshot.status.is_terminal()
    }

    pub fn pending_promotion(&self) -> Option<Position> {
        self.snapshot.pending_promotion
    }

    /// Destinations for the piece on `from` if it belongs to the side to move.
    pub fn legal_moves(&self, from: Position) -> Vec<Position> {
        if self.is_over() || self.snapshot.pending_promotion.is_some() {
            return Vec::new();
        }
        self.snapshot
            .board
            .legal_moves(from, self.snapshot.side_to_move, self.snapshot.last_move)
    }

    pub fn all_legal_moves(&self) -> Vec<Move> {
        if self.is_over() || self.snapshot.pending_promotion.is_some() {
            return Vec::new();
        }
        self.snapshot
            .board
            .all_legal_moves(self.snapshot.side_to_move, self.snapshot.last_move)
    }

    /// Plays a move for the side to move.
    ///
    /// Returns [`GameStatus::Promotion`] when the mover must still choose a
    /// piece; the turn does not pass until [`Game::promote`] is called.
    pub fn play(&mut self, mv: Move) -> Result<GameStatus, GameError> {
        if self.is_over() {
            return Err(GameError::GameOver);
        }
        if let Some(square) = self.snapshot.pending_promotion {
            return Err(GameError::PromotionPending { square });
        }
        if !self.legal_moves(mv.from).contains(&mv.to) {
            return Err(GameError::IllegalMove { mv });
        }

        let board = self.snapshot.board.apply(mv);
        self.snapshot.board = board;
        self.snapshot.last_move = Some(mv);
        self.snapshot.ply += 1;

        if board.awaits_promotion(mv.to) {
            self.snapshot.status = GameStatus::Promotion;
            self.snapshot.pending_promotion = Some(mv.to);
            return Ok(GameStatus::Promotion);
        }

        Ok(self.pass_turn())
    }

    /// Resolves a pending promotion and completes the ply.
    pub fn promote(&mut self, kind: PieceKind) -> Result<GameStatus, GameError> {
        if self.is_over() {
            return Err(GameError::GameOver);
        }
        let square = self
            .snapshot
            .pending_promotion
            .ok_or(GameError::NoPromotionPending)?;
        if !kind.is_promotion_target() {
            return Err(GameError::InvalidPromotionKind(kind));
        }

        self.snapshot.board = self.snapshot.board.promote(square, kind);
        self.snapshot.pending_promotion = None;
        self.snapshot.ply += 1;
        Ok(self.pass_turn())
    }

    /// Ends the game in `winner`'s favour after the opponent disappeared.
    /// Returns `false` when the game had already ended.
    pub fn abandon(&mut self, winner: Side) -> bool {
        if self.is_over() {
            return false;
        }
        self.snapshot.status = GameStatus::Checkmate;
        self.snapshot.winner = Some(winner);
        self.snapshot.pending_promotion = None;
        self.snapshot.abandonment = true;
        self.snapshot.ply += 1;
        true
    }

    fn pass_turn(&mut self) -> GameStatus {
        let next = self.snapshot.side_to_move.opponent();
        let (status, winner) = derive_status(&self.snapshot.board, next, self.snapshot.last_move);
        self.snapshot.side_to_move = next;
        self.snapshot.status = status;
        self.snapshot.winner = winner;
        status
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

/// Status for `to_move` about to play on `board`, plus the winner if terminal.
pub fn derive_status(board: &Board, to_move: Side, last_move: Option<Move>) -> (GameStatus, Option<Side>) {
    let in_check = board.is_in_check(to_move);
    if !board.has_legal_move(to_move, last_move) {
        return if in_check {
            (GameStatus::Checkmate, Some(to_move.opponent()))
        } else {
            (GameStatus::Stalemate, None)
        };
    }
    if in_check {
        (GameStatus::Check, None)
    } else {
        (GameStatus::Playing, None)
    }
}
