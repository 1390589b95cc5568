//! Wire schemas for every channel and remote-call payload.
//!
//! These are the only shapes that cross the transport. Decoding happens at
//! the adapter boundary via [`decode`]; anything that fails to decode is a
//! protocol anomaly and never reaches a handler. The types carry no logic
//! beyond construction and identity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broadcast and service channels used by the protocol.
///
/// Clients subscribe to the inbound channels in one atomic batch. The
/// `/service/` prefixed channels are write channels: the server consumes
/// publishes on them and delivers targeted replies on the same name.
pub mod topics {
    /// Game-list broadcast (inbound).
    pub const GAMES: &str = "/games";
    /// Challenge handshake (bidirectional, session-targeted).
    pub const CHALLENGE: &str = "/service/games/challenge";
    /// Move write channel (outbound).
    pub const MOVE_WRITE: &str = "/service/games/move";
    /// Move echo broadcast (inbound).
    pub const MOVE: &str = "/games/move";
    /// Result broadcast, carried as a full game (inbound).
    pub const RESULT: &str = "/games/result";
    /// Migration: empty request outbound, `{url}` notice inbound.
    pub const MIGRATE: &str = "/service/games/migrate";

    /// Every channel a client listens on.
    pub const INBOUND: &[&str] = &[GAMES, CHALLENGE, MOVE, RESULT, MIGRATE];
}

/// Remote-call endpoints. Every reply is `{successful, data}`.
pub mod calls {
    /// Register a player identity; echoes the (sanitized) name.
    pub const PLAY: &str = "/games/play";
    /// Create a new game owned by the caller.
    pub const NEW: &str = "/games/new";
    /// Find the game a player participates in.
    pub const FIND: &str = "/games/find";
    /// Fetch a game by its identifier.
    pub const GET: &str = "/games/get";
}

/// A player, identified solely by a display name. No authentication.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Player(String);

impl Player {
    /// Create a player from a display name.
    ///
    /// Angle brackets are replaced with `_`, mirroring the server-side
    /// sanitization, so a locally-built name always equals the registered
    /// one echoed back by the `play` call.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().replace('<', "_").replace('>', "_"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cluster-unique game identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single move. Immutable once sent; redelivery must be idempotent
/// against the derived board.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    #[serde(rename = "gameId")]
    pub game_id: GameId,
    /// Target square, `0..=8`, row-major from the top-left corner.
    pub square: u8,
    /// Monotonically increasing index within the game, starting at 0.
    /// The only ordering authority: delivery order is never trusted.
    pub sequence: u32,
}

/// The shared game object. Each client holds its own copy, reconciled only
/// through inbound messages. Square occupancy is a strict function of
/// `moves` and is never carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub owner: Player,
    #[serde(default)]
    pub opponent: Option<Player>,
    /// Terminal annotation. On a complete game, `None` means draw.
    #[serde(default)]
    pub winner: Option<Player>,
    #[serde(default)]
    pub moves: Vec<Move>,
}

impl Game {
    /// A fresh game owned by `owner`, with an empty move log.
    pub fn new(id: GameId, owner: Player) -> Self {
        Self {
            id,
            owner,
            opponent: None,
            winner: None,
            moves: Vec::new(),
        }
    }

    /// Whether `player` participates in this game.
    pub fn has_player(&self, player: &Player) -> bool {
        self.owner == *player || self.opponent.as_ref() == Some(player)
    }
}

/// One entry of the game-list broadcast. The broadcast carries full game
/// objects; a summary decodes just the fields matchmaking needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub id: GameId,
    pub owner: Player,
}

/// Challenge handshake payload. Transient: exists only for the duration of
/// the exchange and is never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Challenge {
    /// An opponent asks to join the game.
    Request {
        #[serde(rename = "gameId")]
        game_id: GameId,
    },
    /// The owner's answer. An accepting response carries the game snapshot
    /// both sides adopt.
    Response {
        #[serde(rename = "gameId")]
        game_id: GameId,
        result: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game: Option<Game>,
    },
}

/// One-shot redirect target delivered when the serving node relocates the
/// session. No payload interpretation happens beyond the `url` field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationNotice {
    pub url: String,
}

/// Payload of the `play` and `find` remote calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerRef {
    pub player: Player,
}

/// Payload of the `get` remote call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameRef {
    #[serde(rename = "gameId")]
    pub game_id: GameId,
}

/// A validated inbound message, tagged by the channel it arrived on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    GameList(Vec<GameSummary>),
    Challenge(Challenge),
    Move(Move),
    Result(Game),
    Migrate(MigrationNotice),
}

/// Why an inbound payload was rejected at the boundary.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Delivery on a channel this client never subscribes to.
    #[error("no schema for channel {topic}")]
    UnknownTopic { topic: String },
    /// The payload does not match the channel's schema.
    #[error("malformed payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    /// Well-formed but out of range.
    #[error("invalid payload on {topic}: {reason}")]
    Invalid { topic: String, reason: String },
}

/// Decode an inbound payload against the schema of its channel.
///
/// This is the single validation boundary: handlers only ever see values
/// that passed it. Errors are protocol anomalies to be logged and dropped,
/// never surfaced to the user.
pub fn decode(topic: &str, payload: &Value) -> Result<Incoming, DecodeError> {
    let payload_error = |source| DecodeError::Payload {
        topic: topic.to_string(),
        source,
    };
    match topic {
        topics::GAMES => {
            let list: Vec<GameSummary> =
                serde_json::from_value(payload.clone()).map_err(payload_error)?;
            Ok(Incoming::GameList(list))
        }
        topics::CHALLENGE => {
            let challenge: Challenge =
                serde_json::from_value(payload.clone()).map_err(payload_error)?;
            Ok(Incoming::Challenge(challenge))
        }
        topics::MOVE => {
            let mv: Move = serde_json::from_value(payload.clone()).map_err(payload_error)?;
            if mv.square > 8 {
                return Err(DecodeError::Invalid {
                    topic: topic.to_string(),
                    reason: format!("square {} out of range", mv.square),
                });
            }
            Ok(Incoming::Move(mv))
        }
        topics::RESULT => {
            let game: Game = serde_json::from_value(payload.clone()).map_err(payload_error)?;
            Ok(Incoming::Result(game))
        }
        topics::MIGRATE => {
            let notice: MigrationNotice =
                serde_json::from_value(payload.clone()).map_err(payload_error)?;
            Ok(Incoming::Migrate(notice))
        }
        other => Err(DecodeError::UnknownTopic {
            topic: other.to_string(),
        }),
    }
}

/// The two marks, in first-mover order: even sequences are crosses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    /// The mark a move with the given sequence number places. The game
    /// owner always moves first, so even sequences belong to the owner.
    pub fn of_sequence(sequence: u32) -> Self {
        if sequence % 2 == 0 { Mark::X } else { Mark::O }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mark::X => "X",
            Mark::O => "O",
        })
    }
}

/// Per-square mark map derived from a move log.
pub type Squares = BTreeMap<u8, Mark>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_name_sanitized() {
        let player = Player::new("<script>alice");
        assert_eq!(player.as_str(), "_script_alice");
    }

    #[test]
    fn test_move_wire_format() {
        let mv = Move {
            game_id: GameId::new("node1_7"),
            square: 4,
            sequence: 0,
        };
        let value = serde_json::to_value(&mv).unwrap();
        assert_eq!(value, json!({"gameId": "node1_7", "square": 4, "sequence": 0}));
    }

    #[test]
    fn test_challenge_request_round_trip() {
        let value = json!({"type": "request", "gameId": "node1_1"});
        let challenge: Challenge = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(
            challenge,
            Challenge::Request {
                game_id: GameId::new("node1_1")
            }
        );
        assert_eq!(serde_json::to_value(&challenge).unwrap(), value);
    }

    #[test]
    fn test_challenge_response_carries_game() {
        let value = json!({
            "type": "response",
            "gameId": "node1_1",
            "result": true,
            "game": {"id": "node1_1", "owner": "alice", "opponent": "bob"}
        });
        match serde_json::from_value(value).unwrap() {
            Challenge::Response { result, game, .. } => {
                assert!(result);
                let game = game.unwrap();
                assert_eq!(game.opponent, Some(Player::new("bob")));
                assert!(game.moves.is_empty());
            }
            other => panic!("decoded {other:?}"),
        }
    }

    #[test]
    fn test_unknown_challenge_type_rejected() {
        let value = json!({"type": "taunt", "gameId": "node1_1"});
        let err = decode(topics::CHALLENGE, &value).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));
    }

    #[test]
    fn test_decode_rejects_out_of_range_square() {
        let value = json!({"gameId": "node1_1", "square": 9, "sequence": 0});
        let err = decode(topics::MOVE, &value).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { .. }));
    }

    #[test]
    fn test_decode_unknown_topic() {
        let err = decode("/games/chat", &json!({})).unwrap_err();
        assert!(err.to_string().contains("/games/chat"));
    }

    #[test]
    fn test_game_summary_decodes_from_full_game() {
        let game = Game::new(GameId::new("node1_3"), Player::new("alice"));
        let value = serde_json::to_value(&game).unwrap();
        let summary: GameSummary = serde_json::from_value(value).unwrap();
        assert_eq!(summary.id, GameId::new("node1_3"));
        assert_eq!(summary.owner, Player::new("alice"));
    }

    #[test]
    fn test_migration_notice_url_verbatim() {
        let notice: MigrationNotice =
            serde_json::from_value(json!({"url": "https://x/y"})).unwrap();
        assert_eq!(notice.url, "https://x/y");
    }

    #[test]
    fn test_mark_alternates_by_sequence() {
        assert_eq!(Mark::of_sequence(0), Mark::X);
        assert_eq!(Mark::of_sequence(1), Mark::O);
        assert_eq!(Mark::of_sequence(8), Mark::X);
    }
}
