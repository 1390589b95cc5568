//! Matchmaking - discovering opponents and negotiating pairing.
//!
//! The controller consumes the game-list broadcast and drives the
//! challenge handshake. It never touches the game itself: adoption of an
//! accepted game is the session's job; this type only decides which
//! challenge messages are legal to send next.

use tracing::debug;

use crate::message::{Challenge, GameId, GameSummary, Player};

/// What to do with an inbound challenge request.
///
/// Auto-accept is the default policy; `Manual` is the human-in-the-loop
/// hook: the request is surfaced as an event and answered only when the
/// user decides. Two requests racing for one game are resolved
/// first-response-wins by the server; the loser must tolerate a
/// subsequent rejection (or silence) gracefully.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcceptPolicy {
    #[default]
    AutoAccept,
    Manual,
}

/// Disposition of an inbound challenge request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestDisposition {
    /// Publish this response immediately (auto-accept).
    Respond(Challenge),
    /// Surface the request and wait for an explicit decision.
    AwaitDecision(GameId),
}

/// Challenge negotiation state.
#[derive(Debug, Default)]
pub struct Matchmaker {
    policy: AcceptPolicy,
    /// Challenge we issued, awaiting the owner's response. While set,
    /// local game creation is disabled.
    outgoing: Option<GameId>,
    /// Inbound request awaiting a manual decision.
    incoming: Option<GameId>,
}

impl Matchmaker {
    pub fn new(policy: AcceptPolicy) -> Self {
        Self {
            policy,
            outgoing: None,
            incoming: None,
        }
    }

    /// Game creation is blocked while a challenge we issued is pending.
    pub fn can_create_game(&self) -> bool {
        self.outgoing.is_none()
    }

    /// Filter a game-list broadcast down to the games the local player may
    /// challenge: everything except their own games and the game the
    /// session currently holds.
    pub fn challengeable(
        &self,
        list: &[GameSummary],
        me: Option<&Player>,
        current: Option<&GameId>,
    ) -> Vec<GameSummary> {
        list.iter()
            .filter(|g| Some(&g.owner) != me && Some(&g.id) != current)
            .cloned()
            .collect()
    }

    /// Issue a challenge for `game_id`. Returns the request to publish, or
    /// `None` when another challenge is already in flight.
    pub fn challenge(&mut self, game_id: GameId) -> Option<Challenge> {
        if let Some(pending) = &self.outgoing {
            debug!(%pending, "challenge already pending, request dropped");
            return None;
        }
        self.outgoing = Some(game_id.clone());
        Some(Challenge::Request { game_id })
    }

    /// Handle an inbound request per the accept policy.
    pub fn on_request(&mut self, game_id: GameId) -> RequestDisposition {
        match self.policy {
            AcceptPolicy::AutoAccept => RequestDisposition::Respond(Challenge::Response {
                game_id,
                result: true,
                game: None,
            }),
            AcceptPolicy::Manual => {
                self.incoming = Some(game_id.clone());
                RequestDisposition::AwaitDecision(game_id)
            }
        }
    }

    /// Answer a request that was surfaced for a manual decision. Returns
    /// the response to publish; `None` if no such request is waiting.
    pub fn decide(&mut self, game_id: &GameId, accept: bool) -> Option<Challenge> {
        if self.incoming.as_ref() != Some(game_id) {
            debug!(game = %game_id, "no challenge awaiting a decision");
            return None;
        }
        self.incoming = None;
        Some(Challenge::Response {
            game_id: game_id.clone(),
            result: accept,
            game: None,
        })
    }

    /// A response arrived (either way): clear the matching pending
    /// challenge so creation is possible again. Keeping no state on
    /// rejection is deliberate - the player just keeps waiting.
    pub fn resolve(&mut self, game_id: &GameId) {
        if self.outgoing.as_ref() == Some(game_id) {
            self.outgoing = None;
        }
    }

    /// Drop all transient negotiation state (new game adopted, or the
    /// client navigated away).
    pub fn clear(&mut self) {
        self.outgoing = None;
        self.incoming = None;
    }
}
