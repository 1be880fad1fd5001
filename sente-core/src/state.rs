//! Game position: the single place the rules mutate board state.

use crate::board::Board;
use crate::moves::{Color, Move, Vertex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayError {
    #[error("illegal move {mv} for {color}")]
    Illegal { color: Color, mv: Move },
}

/// A full game position. Cheap to clone; the search clones one per descent
/// and advances the private copy, never sharing it across workers.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    to_move: Color,
    passes: u8,
    last_move: Move,
    move_num: u32,
    komi: f32,
    ko: Option<Vertex>,
    resigned: Option<Color>,
}

impl Position {
    pub fn new(size: usize, komi: f32) -> Position {
        Position {
            board: Board::new(size),
            to_move: Color::Black,
            passes: 0,
            last_move: Move::None,
            move_num: 0,
            komi,
            ko: None,
            resigned: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn size(&self) -> usize {
        self.board.size()
    }

    pub fn to_move(&self) -> Color {
        self.to_move
    }

    pub fn set_to_move(&mut self, color: Color) {
        self.to_move = color;
    }

    pub fn passes(&self) -> u8 {
        self.passes
    }

    pub fn last_move(&self) -> Move {
        self.last_move
    }

    pub fn move_num(&self) -> u32 {
        self.move_num
    }

    pub fn komi(&self) -> f32 {
        self.komi
    }

    /// Setup helper (handicap stones, test fixtures). Bypasses turn order
    /// and capture logic.
    pub fn put_stone(&mut self, color: Color, v: Vertex) {
        self.board.put_stone(color, v);
    }

    pub fn is_legal(&self, color: Color, mv: Move) -> bool {
        match mv {
            Move::Pass | Move::Resign => true,
            Move::None => false,
            Move::Vertex(v) => {
                self.board.in_bounds(v)
                    && self.board.is_empty(v)
                    && self.ko != Some(v)
                    && !self.board.is_suicide(color, v)
            }
        }
    }

    /// All intersections, for legal-move enumeration.
    pub fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.board.vertices()
    }

    /// Legal moves for the side to move: open vertices plus Pass.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves: Vec<Move> = self
            .vertices()
            .filter(|&v| self.is_legal(self.to_move, Move::Vertex(v)))
            .map(Move::Vertex)
            .collect();
        moves.push(Move::Pass);
        moves
    }

    /// Apply a move for the side to move.
    pub fn play(&mut self, mv: Move) -> Result<(), PlayError> {
        let color = self.to_move;
        if !self.is_legal(color, mv) {
            return Err(PlayError::Illegal { color, mv });
        }
        self.ko = None;
        match mv {
            Move::Vertex(v) => {
                let outcome = self.board.place(color, v);
                // Single-stone capture leaving our stone in atari marks a
                // simple ko point.
                if outcome.captured.len() == 1 && self.board.single_stone_with_one_liberty(v) {
                    self.ko = Some(outcome.captured[0]);
                }
                self.passes = 0;
            }
            Move::Pass => {
                // Saturate; beyond two the count no longer matters.
                self.passes = (self.passes + 1).min(4);
            }
            Move::Resign => {
                self.resigned = Some(color);
            }
            Move::None => unreachable!("rejected by is_legal"),
        }
        self.last_move = mv;
        self.move_num += 1;
        self.to_move = color.opponent();
        Ok(())
    }

    /// The game has ended: two consecutive passes, or a resignation.
    pub fn is_terminal(&self) -> bool {
        self.passes >= 2 || self.resigned.is_some()
    }

    /// Signed area margin from Black's perspective (komi included).
    pub fn final_score(&self) -> f32 {
        self.board.area_score(self.komi)
    }
}
