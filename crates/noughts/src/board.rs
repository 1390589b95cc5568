use std::collections::BTreeSet;

use crate::message::{Mark, Move, Squares};

/// Derives square occupancy from an ordered move log.
///
/// The projection is the only source of board state: squares are never
/// mutated independently, so a client that resumes mid-game reconstructs
/// exactly the board a continuously-connected client holds. It tolerates
/// the transport's at-least-once, possibly-reordered delivery:
/// - duplicate sequences are skipped
/// - marks come from each move's sequence parity, not from arrival order
/// - a square keeps the lowest-sequence claim if two moves ever collide
pub fn project(moves: &[Move]) -> Squares {
    let mut ordered: Vec<&Move> = moves.iter().collect();
    ordered.sort_by_key(|m| m.sequence);

    let mut seen = BTreeSet::new();
    let mut squares = Squares::new();
    for mv in ordered {
        if !seen.insert(mv.sequence) {
            continue;
        }
        squares
            .entry(mv.square)
            .or_insert_with(|| Mark::of_sequence(mv.sequence));
    }
    squares
}

/// Whether `square` is already taken in the projected board.
pub fn occupied(squares: &Squares, square: u8) -> bool {
    squares.contains_key(&square)
}
