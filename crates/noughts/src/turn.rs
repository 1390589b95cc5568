use crate::message::{Game, Mark, Player};

/// Whose turn it is, derived purely from local state.
///
/// The owner always moves first, so it is the owner's turn exactly when the
/// move count is even. Both clients compute this identically without any
/// message exchange, which is why move-log consistency is load-bearing: a
/// divergence in move count between the two views breaks turn fairness.
pub fn is_my_turn(player: &Player, game: &Game) -> bool {
    (*player == game.owner) == (game.moves.len() % 2 == 0)
}

/// The mark a participant plays with, or `None` for non-participants.
pub fn mark_of(player: &Player, game: &Game) -> Option<Mark> {
    if *player == game.owner {
        Some(Mark::X)
    } else if game.opponent.as_ref() == Some(player) {
        Some(Mark::O)
    } else {
        None
    }
}
