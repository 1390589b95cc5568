//! Game session - owns the current game's mutable state.
//!
//! Each client holds exactly one session, reconciled only through inbound
//! messages; there is no shared-memory state between the two participants.
//! The session is exclusively owned by the client event loop, so none of
//! its fields need locking.
//!
//! Inbound application is all-or-nothing: every message either fully
//! applies or fully no-ops, so the session is never left partially
//! updated. Duplicate and out-of-order deliveries are absorbed by
//! [`GameSession::apply`]; the move `sequence` is the only ordering
//! authority.

use tracing::debug;

use crate::board;
use crate::message::{Game, GameId, Move, Player, Squares};
use crate::turn;

/// How a game ended, relative to the local identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Won,
    Lost,
    Draw,
}

/// What happened to an inbound move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Appended to the log; the board projection changed.
    Applied,
    /// Redelivery or square collision; absorbed without any state change.
    Duplicate,
    /// Not addressed to the current game, or there is no current game.
    NotCurrent,
    /// The game already carries a result; late echoes are dropped.
    Finished,
}

/// Why a local move attempt was refused. These are expected application
/// outcomes, rejected as silent no-ops rather than surfaced as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendBlock {
    #[error("no game in progress")]
    NoGame,
    #[error("no opponent has joined yet")]
    NoOpponent,
    #[error("the game is over")]
    Finished,
    #[error("not your turn")]
    NotYourTurn,
    #[error("square already occupied")]
    Occupied,
    #[error("previous move not yet corroborated")]
    AwaitingEcho,
}

/// Terminal report produced when a result arrives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameOverReport {
    pub outcome: Outcome,
    pub winner: Option<Player>,
}

/// The local view of the one game this client participates in.
///
/// State transitions:
/// - [`GameSession::adopt`] installs a game (created, challenged into, or
///   resumed), atomically superseding any previous one;
/// - [`GameSession::apply`] appends corroborated moves idempotently;
/// - [`GameSession::finish`] stamps the authoritative result and freezes
///   the session;
/// - [`GameSession::reset`] discards everything except the identity.
#[derive(Debug, Default)]
pub struct GameSession {
    player: Option<Player>,
    game: Option<Game>,
    over: bool,
    /// Sequence of a published move not yet corroborated by its echo.
    in_flight: Option<u32>,
}

impl GameSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_player(&mut self, player: Player) {
        self.player = Some(player);
    }

    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    pub fn game(&self) -> Option<&Game> {
        self.game.as_ref()
    }

    pub fn game_id(&self) -> Option<&GameId> {
        self.game.as_ref().map(|g| &g.id)
    }

    pub fn is_over(&self) -> bool {
        self.over
    }

    /// Install `game` as the current game, discarding any previous state
    /// in the same step. No partial mix of old and new squares can exist.
    pub fn adopt(&mut self, game: Game) {
        self.over = game.winner.is_some();
        self.in_flight = None;
        self.game = Some(game);
    }

    /// Discard the current game (and identity stays). Used when a new
    /// game supersedes the session or a resumption attempt fails.
    pub fn reset(&mut self) {
        self.game = None;
        self.over = false;
        self.in_flight = None;
    }

    /// The projected board of the current game.
    pub fn squares(&self) -> Squares {
        self.game
            .as_ref()
            .map(|g| board::project(&g.moves))
            .unwrap_or_default()
    }

    /// Whether the local player may move right now.
    pub fn my_turn(&self) -> bool {
        match (&self.player, &self.game) {
            (Some(player), Some(game)) => {
                !self.over && game.opponent.is_some() && turn::is_my_turn(player, game)
            }
            _ => false,
        }
    }

    /// Validate a local move attempt and build the move to publish.
    ///
    /// The move is numbered with the next sequence (`moves.len()`) and is
    /// NOT applied here: under echo-corroborated apply it only enters the
    /// log when the broadcast comes back, which keeps the two clients'
    /// views from diverging optimistically.
    pub fn prepare_move(&mut self, square: u8) -> Result<Move, SendBlock> {
        let player = self.player.as_ref().ok_or(SendBlock::NoGame)?;
        let game = self.game.as_ref().ok_or(SendBlock::NoGame)?;
        if game.opponent.is_none() {
            return Err(SendBlock::NoOpponent);
        }
        if self.over {
            return Err(SendBlock::Finished);
        }
        if !turn::is_my_turn(player, game) {
            return Err(SendBlock::NotYourTurn);
        }
        if board::occupied(&board::project(&game.moves), square) {
            return Err(SendBlock::Occupied);
        }
        let sequence = game.moves.len() as u32;
        if self.in_flight == Some(sequence) {
            return Err(SendBlock::AwaitingEcho);
        }
        self.in_flight = Some(sequence);
        Ok(Move {
            game_id: game.id.clone(),
            square,
            sequence,
        })
    }

    /// Roll back [`GameSession::prepare_move`] bookkeeping for a move
    /// whose publish never left the client, so the turn is not wedged
    /// waiting for an echo that cannot arrive.
    pub fn retract_unsent(&mut self, sequence: u32) {
        if self.in_flight == Some(sequence) {
            self.in_flight = None;
        }
    }

    /// Apply a corroborated move. Idempotent: a move whose sequence is
    /// already present, or whose square is already claimed, is discarded
    /// without touching the log.
    pub fn apply(&mut self, mv: Move) -> ApplyOutcome {
        let Some(game) = self.game.as_mut() else {
            return ApplyOutcome::NotCurrent;
        };
        if game.id != mv.game_id {
            return ApplyOutcome::NotCurrent;
        }
        if self.over {
            return ApplyOutcome::Finished;
        }
        if game
            .moves
            .iter()
            .any(|m| m.sequence == mv.sequence || m.square == mv.square)
        {
            debug!(game = %game.id, sequence = mv.sequence, "duplicate move discarded");
            return ApplyOutcome::Duplicate;
        }
        if self.in_flight == Some(mv.sequence) {
            self.in_flight = None;
        }
        let at = game.moves.partition_point(|m| m.sequence < mv.sequence);
        game.moves.insert(at, mv);
        ApplyOutcome::Applied
    }

    /// Stamp the authoritative result onto the current game and freeze it.
    ///
    /// The carried move log is adopted verbatim - the server's view wins -
    /// so a client that missed a late echo still renders the full board.
    /// Results for other games (every client hears the broadcast) are
    /// ignored.
    pub fn finish(&mut self, result: Game) -> Option<GameOverReport> {
        let game = self.game.as_mut()?;
        if game.id != result.id {
            debug!(game = %result.id, "result for another game ignored");
            return None;
        }
        if self.over {
            return None;
        }
        game.moves = result.moves;
        game.winner = result.winner.clone();
        if game.opponent.is_none() {
            game.opponent = result.opponent;
        }
        self.over = true;
        self.in_flight = None;

        let outcome = match (&result.winner, &self.player) {
            (None, _) => Outcome::Draw,
            (Some(winner), Some(me)) if winner == me => Outcome::Won,
            (Some(_), _) => Outcome::Lost,
        };
        Some(GameOverReport {
            outcome,
            winner: result.winner,
        })
    }
}
