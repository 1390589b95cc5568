//! Durable session identity.
//!
//! The store remembers who the local player is (and, for the by-game-id
//! resumption strategy, which game they were in) across reconnects and
//! migrations. Failures of the backing store always degrade to "absent":
//! identity loss means showing the entry form again, never an error.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::message::{GameId, Player};

/// Storage of the durable player identity and resumed game id.
///
/// `identify` on the client combines [`SessionStore::player`] with the
/// connect url's query parameter; implementations only answer for their
/// backing store.
pub trait SessionStore: Send + Sync {
    /// The remembered player, if any.
    fn player(&self) -> Option<Player>;
    fn remember(&self, player: &Player);
    fn forget(&self);

    /// The remembered game id, if any. Only consulted by the by-game-id
    /// resumption strategy.
    fn game(&self) -> Option<GameId>;
    fn remember_game(&self, id: &GameId);
    fn forget_game(&self);
}

/// Extract a `player=` identity from a url's query string.
///
/// Migration redirects carry the identity this way, so a freshly loaded
/// client can resume without any durable store at all.
pub fn player_from_query(url: &str) -> Option<Player> {
    let (_, query) = url.split_once('?')?;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key == "player" && !value.is_empty() {
            return Some(Player::new(decode_component(value)));
        }
    }
    None
}

/// Minimal percent-decoding for query components (`+` and `%XX`).
fn decode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b'%' => {
                if let (Some(hi), Some(lo)) = (
                    bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                    bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
                ) {
                    out.push((hi * 16 + lo) as u8 as char);
                    i += 3;
                } else {
                    out.push('%');
                    i += 1;
                }
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    player: Option<Player>,
    game: Option<GameId>,
}

/// In-memory store. Survives reconnects within one process; lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoredSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn player(&self) -> Option<Player> {
        self.inner.lock().unwrap().player.clone()
    }

    fn remember(&self, player: &Player) {
        self.inner.lock().unwrap().player = Some(player.clone());
    }

    fn forget(&self) {
        self.inner.lock().unwrap().player = None;
    }

    fn game(&self) -> Option<GameId> {
        self.inner.lock().unwrap().game.clone()
    }

    fn remember_game(&self, id: &GameId) {
        self.inner.lock().unwrap().game = Some(id.clone());
    }

    fn forget_game(&self) {
        self.inner.lock().unwrap().game = None;
    }
}

/// JSON-file-backed store, the durable-browser-storage analog. Every read
/// hits the file so concurrent processes see each other's writes; a
/// missing or unreadable file is simply "absent".
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> StoredSession {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "session file unreadable");
                StoredSession::default()
            }),
            Err(_) => StoredSession::default(),
        }
    }

    fn save(&self, session: &StoredSession) {
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "session not serializable");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, raw) {
            warn!(path = %self.path.display(), error = %e, "session file not writable");
        }
    }
}

impl SessionStore for JsonFileStore {
    fn player(&self) -> Option<Player> {
        self.load().player
    }

    fn remember(&self, player: &Player) {
        let mut session = self.load();
        session.player = Some(player.clone());
        self.save(&session);
    }

    fn forget(&self) {
        let mut session = self.load();
        session.player = None;
        self.save(&session);
    }

    fn game(&self) -> Option<GameId> {
        self.load().game
    }

    fn remember_game(&self, id: &GameId) {
        let mut session = self.load();
        session.game = Some(id.clone());
        self.save(&session);
    }

    fn forget_game(&self) {
        let mut session = self.load();
        session.game = None;
        self.save(&session);
    }
}
