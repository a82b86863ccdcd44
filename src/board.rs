use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BOARD_SIZE, Piece, PieceKind, Position, Side};

pub(crate) const ROOK_DIRECTIONS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
pub(crate) const BISHOP_DIRECTIONS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];
pub(crate) const KING_STEPS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];
pub(crate) const KNIGHT_JUMPS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];

const BACK_RANK: [PieceKind; BOARD_SIZE] = [
    PieceKind::Rook,
    PieceKind::Knight,
    PieceKind::Bishop,
    PieceKind::Queen,
    PieceKind::King,
    PieceKind::Bishop,
    PieceKind::Knight,
    PieceKind::Rook,
];

static STANDARD: Lazy<Board> = Lazy::new(|| {
    let mut board = Board::empty();
    for side in [Side::White, Side::Black] {
        for (col, kind) in BACK_RANK.iter().enumerate() {
            board.squares[side.home_row() as usize][col] = Some(Piece::new(*kind, side));
            board.squares[side.pawn_row() as usize][col] = Some(Piece::new(PieceKind::Pawn, side));
        }
    }
    board
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("expected 8 ranks, found {0}")]
    RankCount(usize),
    #[error("rank {rank} describes {width} files")]
    RankWidth { rank: usize, width: usize },
    #[error("unknown piece letter '{0}'")]
    UnknownPiece(char),
}

/// 8x8 grid of optional pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    squares: [[Option<Piece>; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    pub fn empty() -> Self {
        Self {
            squares: [[None; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    /// The standard starting position.
    pub fn standard() -> Self {
        *STANDARD
    }

    /// Parses the piece-placement field of a FEN string, first rank listed is row 0.
    ///
    /// Kings, rooks and pawns standing on their home squares are marked unmoved;
    /// everything else is marked moved.
    pub fn from_placement(placement: &str) -> Result<Self, PlacementError> {
        let ranks: Vec<&str> = placement.trim().split('/').collect();
        if ranks.len() != BOARD_SIZE {
            return Err(PlacementError::RankCount(ranks.len()));
        }

        let mut board = Self::empty();
        for (row, rank) in ranks.iter().enumerate() {
            let mut col = 0usize;
            for ch in rank.chars() {
                if let Some(skip) = ch.to_digit(10) {
                    col += skip as usize;
                    continue;
                }
                let side = if ch.is_ascii_uppercase() {
                    Side::White
                } else {
                    Side::Black
                };
                let kind = piece_kind_from_letter(ch).ok_or(PlacementError::UnknownPiece(ch))?;
                if col >= BOARD_SIZE {
                    return Err(PlacementError::RankWidth {
                        rank: row,
                        width: col + 1,
                    });
                }
                let mut piece = Piece::new(kind, side);
                piece.has_moved = !on_home_square(kind, side, row as u8, col as u8);
                board.squares[row][col] = Some(piece);
                col += 1;
            }
            if col != BOARD_SIZE {
                return Err(PlacementError::RankWidth {
                    rank: row,
                    width: col,
                });
            }
        }
        Ok(board)
    }

    /// Inverse of [`Board::from_placement`]; moved flags are not encoded.
    pub fn to_placement(&self) -> String {
        let mut out = String::with_capacity(72);
        for (row, rank) in self.squares.iter().enumerate() {
            if row > 0 {
                out.push('/');
            }
            let mut empty = 0u8;
            for cell in rank {
                match cell {
                    Some(piece) => {
                        if empty > 0 {
                            out.push((b'0' + empty) as char);
                            empty = 0;
                        }
                        out.push(piece_letter(*piece));
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                out.push((b'0' + empty) as char);
            }
        }
        out
    }

    pub fn get(&self, at: Position) -> Option<Piece> {
        self.squares[at.row as usize][at.col as usize]
    }

    pub fn set(&mut self, at: Position, piece: Option<Piece>) {
        self.squares[at.row as usize][at.col as usize] = piece;
    }

    pub(crate) fn take(&mut self, at: Position) -> Option<Piece> {
        self.squares[at.row as usize][at.col as usize].take()
    }

    /// Occupied squares of one side, row-major.
    pub fn pieces(&self, side: Side) -> impl Iterator<Item = (Position, Piece)> + '_ {
        Position::all().filter_map(move |at| {
            self.get(at)
                .filter(|piece| piece.side == side)
                .map(|piece| (at, piece))
        })
    }

    pub fn king_square(&self, side: Side) -> Option<Position> {
        self.pieces(side)
            .find(|(_, piece)| piece.kind == PieceKind::King)
            .map(|(at, _)| at)
    }

    /// True when each side has exactly one king.
    pub fn has_both_kings(&self) -> bool {
        [Side::White, Side::Black].iter().all(|side| {
            self.pieces(*side)
                .filter(|(_, piece)| piece.kind == PieceKind::King)
                .count()
                == 1
        })
    }

    /// A missing king counts as in check.
    pub fn is_in_check(&self, side: Side) -> bool {
        match self.king_square(side) {
            Some(king) => self.is_attacked(king, side.opponent()),
            None => true,
        }
    }

    /// Whether any piece of `by` attacks `target`.
    ///
    /// Rays stop at the first occupant regardless of its side, so a friendly
    /// piece of the defender shields the square.
    pub fn is_attacked(&self, target: Position, by: Side) -> bool {
        let holds = |at: Option<Position>, kinds: &[PieceKind]| {
            at.and_then(|at| self.get(at))
                .is_some_and(|piece| piece.side == by && kinds.contains(&piece.kind))
        };

        // A pawn of `by` attacks one row ahead of itself, so look one row behind.
        let pawn_row = -by.forward();
        if holds(target.offset(pawn_row, -1), &[PieceKind::Pawn])
            || holds(target.offset(pawn_row, 1), &[PieceKind::Pawn])
        {
            return true;
        }

        if KNIGHT_JUMPS
            .iter()
            .any(|&(dr, dc)| holds(target.offset(dr, dc), &[PieceKind::Knight]))
        {
            return true;
        }

        if KING_STEPS
            .iter()
            .any(|&(dr, dc)| holds(target.offset(dr, dc), &[PieceKind::King]))
        {
            return true;
        }

        let straight = [PieceKind::Rook, PieceKind::Queen];
        let diagonal = [PieceKind::Bishop, PieceKind::Queen];
        ROOK_DIRECTIONS
            .iter()
            .any(|&dir| self.ray_hits(target, dir, by, &straight))
            || BISHOP_DIRECTIONS
                .iter()
                .any(|&dir| self.ray_hits(target, dir, by, &diagonal))
    }

    fn ray_hits(&self, from: Position, (dr, dc): (i8, i8), by: Side, kinds: &[PieceKind]) -> bool {
        let mut cursor = from.offset(dr, dc);
        while let Some(at) = cursor {
            if let Some(piece) = self.get(at) {
                return piece.side == by && kinds.contains(&piece.kind);
            }
            cursor = at.offset(dr, dc);
        }
        false
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::standard()
    }
}

fn on_home_square(kind: PieceKind, side: Side, row: u8, col: u8) -> bool {
    match kind {
        PieceKind::King => row == side.home_row() && col == 4,
        PieceKind::Rook => row == side.home_row() && (col == 0 || col == 7),
        PieceKind::Pawn => row == side.pawn_row(),
        _ => false,
    }
}

fn piece_kind_from_letter(ch: char) -> Option<PieceKind> {
    match ch.to_ascii_lowercase() {
        'p' => Some(PieceKind::Pawn),
        'n' => Some(PieceKind::Knight),
        'b' => Some(PieceKind::Bishop),
        'r' => Some(PieceKind::Rook),
        'q' => Some(PieceKind::Queen),
        'k' => Some(PieceKind::King),
        _ => None,
    }
}

fn piece_letter(piece: Piece) -> char {
    let letter = match piece.kind {
        PieceKind::Pawn => 'p',
        PieceKind::Knight => 'n',
        PieceKind::Bishop => 'b',
        PieceKind::Rook => 'r',
        PieceKind::Queen => 'q',
        PieceKind::King => 'k',
    };
    match piece.side {
        Side::White => letter.to_ascii_uppercase(),
        Side::Black => letter,
    }
}
