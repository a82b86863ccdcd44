//! Move generation and application.
//!
//! Special moves are never tagged on a [`Move`]: generation offers them from
//! board shape plus the previous move, and [`Board::apply`] re-derives them
//! from board shape alone using the same geometry.

use crate::board::{BISHOP_DIRECTIONS, Board, KING_STEPS, KNIGHT_JUMPS, ROOK_DIRECTIONS};
use crate::types::{Move, Piece, PieceKind, Position, Side};

const KING_COL: u8 = 4;

/// Rook columns and the squares that must be empty, per castling wing.
struct Wing {
    rook_col: u8,
    king_to: u8,
    rook_to: u8,
    between: &'static [u8],
}

const KING_SIDE: Wing = Wing {
    rook_col: 7,
    king_to: 6,
    rook_to: 5,
    between: &[5, 6],
};

const QUEEN_SIDE: Wing = Wing {
    rook_col: 0,
    king_to: 2,
    rook_to: 3,
    between: &[1, 2, 3],
};

impl Board {
    /// Legal destinations for the `side` piece on `from`.
    ///
    /// Empty when the square is empty or holds a piece of the other side.
    /// `last_move` is needed only to offer en passant.
    pub fn legal_moves(&self, from: Position, side: Side, last_move: Option<Move>) -> Vec<Position> {
        let Some(piece) = self.get(from) else {
            return Vec::new();
        };
        if piece.side != side {
            return Vec::new();
        }

        let mut targets = self.pseudo_legal_moves(from, piece, last_move);
        targets.retain(|&to| !self.apply(Move::new(from, to)).is_in_check(side));

        if piece.kind == PieceKind::King {
            targets.extend(self.castling_targets(from, piece));
        }
        targets
    }

    /// Every legal move of `side`, used for terminal-state detection.
    pub fn all_legal_moves(&self, side: Side, last_move: Option<Move>) -> Vec<Move> {
        self.pieces(side)
            .flat_map(|(from, _)| {
                self.legal_moves(from, side, last_move)
                    .into_iter()
                    .map(move |to| Move::new(from, to))
            })
            .collect()
    }

    pub fn has_legal_move(&self, side: Side, last_move: Option<Move>) -> bool {
        self.pieces(side)
            .any(|(from, _)| !self.legal_moves(from, side, last_move).is_empty())
    }

    /// Returns a new board with `mv` played.
    ///
    /// A pawn stepping diagonally onto an empty square captures en passant; a
    /// king moving two columns drags its rook along. A pawn reaching the far
    /// rank stays a pawn until [`Board::promote`] is called.
    pub fn apply(&self, mv: Move) -> Board {
        let mut next = *self;
        let Some(piece) = next.take(mv.from) else {
            return next;
        };

        match piece.kind {
            PieceKind::Pawn if mv.from.col != mv.to.col && next.get(mv.to).is_none() => {
                let victim = Position {
                    row: mv.from.row,
                    col: mv.to.col,
                };
                next.set(victim, None);
            }
            PieceKind::King if mv.from.col.abs_diff(mv.to.col) == 2 => {
                let wing = if mv.to.col > mv.from.col {
                    KING_SIDE
                } else {
                    QUEEN_SIDE
                };
                let row = mv.from.row;
                let rook_from = Position {
                    row,
                    col: wing.rook_col,
                };
                if let Some(rook) = next.take(rook_from) {
                    next.set(
                        Position {
                            row,
                            col: wing.rook_to,
                        },
                        Some(rook.moved()),
                    );
                }
            }
            _ => {}
        }

        next.set(mv.to, Some(piece.moved()));
        next
    }

    /// Whether the piece on `at` is a pawn waiting on its far rank.
    pub fn awaits_promotion(&self, at: Position) -> bool {
        self.get(at).is_some_and(|piece| {
            piece.kind == PieceKind::Pawn && at.row == piece.side.promotion_row()
        })
    }

    /// Replaces the pawn on `at` with `kind`. Anything else is left untouched.
    pub fn promote(&self, at: Position, kind: PieceKind) -> Board {
        let mut next = *self;
        if self.awaits_promotion(at)
            && kind.is_promotion_target()
            && let Some(pawn) = self.get(at)
        {
            next.set(
                at,
                Some(Piece {
                    kind,
                    side: pawn.side,
                    has_moved: true,
                }),
            );
        }
        next
    }

    fn pseudo_legal_moves(&self, from: Position, piece: Piece, last_move: Option<Move>) -> Vec<Position> {
        let mut targets = Vec::new();
        match piece.kind {
            PieceKind::Pawn => self.pawn_moves(from, piece.side, last_move, &mut targets),
            PieceKind::Knight => self.step_moves(from, piece.side, &KNIGHT_JUMPS, &mut targets),
            PieceKind::King => self.step_moves(from, piece.side, &KING_STEPS, &mut targets),
            PieceKind::Bishop => self.slide_moves(from, piece.side, &BISHOP_DIRECTIONS, &mut targets),
            PieceKind::Rook => self.slide_moves(from, piece.side, &ROOK_DIRECTIONS, &mut targets),
            PieceKind::Queen => {
                self.slide_moves(from, piece.side, &ROOK_DIRECTIONS, &mut targets);
                self.slide_moves(from, piece.side, &BISHOP_DIRECTIONS, &mut targets);
            }
        }
        targets
    }

    fn pawn_moves(&self, from: Position, side: Side, last_move: Option<Move>, out: &mut Vec<Position>) {
        let forward = side.forward();

        if let Some(one) = from.offset(forward, 0)
            && self.get(one).is_none()
        {
            out.push(one);
            if from.row == side.pawn_row()
                && let Some(two) = one.offset(forward, 0)
                && self.get(two).is_none()
            {
                out.push(two);
            }
        }

        let passant = self.en_passant_target(from, side, last_move);
        for d_col in [-1, 1] {
            let Some(target) = from.offset(forward, d_col) else {
                continue;
            };
            match self.get(target) {
                Some(victim) if victim.side != side => out.push(target),
                None if passant == Some(target) => out.push(target),
                _ => {}
            }
        }
    }

    /// Square behind an enemy pawn that just advanced two rows next to `from`.
    fn en_passant_target(&self, from: Position, side: Side, last_move: Option<Move>) -> Option<Position> {
        let last = last_move?;
        let pushed = self.get(last.to)?;
        let qualifies = pushed.kind == PieceKind::Pawn
            && pushed.side != side
            && last.from.col == last.to.col
            && last.from.row.abs_diff(last.to.row) == 2
            && last.to.row == from.row
            && last.to.col.abs_diff(from.col) == 1;
        if !qualifies {
            return None;
        }
        let target = last.to.offset(side.forward(), 0)?;
        self.get(target).is_none().then_some(target)
    }

    fn step_moves(&self, from: Position, side: Side, steps: &[(i8, i8)], out: &mut Vec<Position>) {
        for &(dr, dc) in steps {
            if let Some(to) = from.offset(dr, dc)
                && self.get(to).is_none_or(|other| other.side != side)
            {
                out.push(to);
            }
        }
    }

    fn slide_moves(&self, from: Position, side: Side, directions: &[(i8, i8)], out: &mut Vec<Position>) {
        for &(dr, dc) in directions {
            let mut cursor = from.offset(dr, dc);
            while let Some(to) = cursor {
                match self.get(to) {
                    None => out.push(to),
                    Some(other) => {
                        if other.side != side {
                            out.push(to);
                        }
                        break;
                    }
                }
                cursor = to.offset(dr, dc);
            }
        }
    }

    fn castling_targets(&self, from: Position, king: Piece) -> Vec<Position> {
        let side = king.side;
        let row = side.home_row();
        let enemy = side.opponent();
        if king.has_moved
            || from != (Position { row, col: KING_COL })
            || self.is_attacked(from, enemy)
        {
            return Vec::new();
        }

        [KING_SIDE, QUEEN_SIDE]
            .into_iter()
            .filter(|wing| {
                let rook_ready = self
                    .get(Position {
                        row,
                        col: wing.rook_col,
                    })
                    .is_some_and(|rook| {
                        rook.kind == PieceKind::Rook && rook.side == side && !rook.has_moved
                    });
                let path_clear = wing
                    .between
                    .iter()
                    .all(|&col| self.get(Position { row, col }).is_none());
                // The king crosses rook_to and lands on king_to.
                let path_safe = [wing.rook_to, wing.king_to]
                    .iter()
                    .all(|&col| !self.is_attacked(Position { row, col }, enemy));
                rook_ready && path_clear && path_safe
            })
            .map(|wing| Position {
                row,
                col: wing.king_to,
            })
            .collect()
    }
}
