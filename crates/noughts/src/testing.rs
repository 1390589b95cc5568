//! In-process reference cluster.
//!
//! A [`LocalCluster`] hosts one or two server nodes and hands out
//! [`Transport`] instances wired to them, so the full protocol - game
//! list, challenge handshake, move echo, result broadcast, two-node
//! migration - can be exercised without a network. The server semantics
//! here are the authoritative ones the client trusts verbatim: game-list
//! states (new, challenged, live), square-uniqueness validation, strike
//! detection over the eight lines, and live-game forwarding when a node
//! enters migration.
//!
//! Delivery is deliberately unfaithful in the way real brokers are:
//! enabling [`LocalCluster::duplicate_delivery`] sends every
//! server-to-client message twice, exercising the client's idempotent
//! apply end-to-end.
//!
//! Sessions are disposed lazily: a disconnecting client keeps its games on
//! the node so that resumption after a reconnect or migration can find
//! them, matching the production service's relaxed expiry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::message::{Challenge, Game, GameId, GameRef, Move, Player, PlayerRef, calls, topics};
use crate::transport::{CallReply, Envelope, Transport, TransportError};

/// The eight winning lines of the 3x3 board, row-major squares.
const STRIKES: [[u8; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

type SessionId = u64;

struct Subscriber {
    topics: HashSet<String>,
    sink: mpsc::UnboundedSender<Envelope>,
}

#[derive(Default)]
struct NodeState {
    next_game: u64,
    players: HashMap<Player, SessionId>,
    subscribers: HashMap<SessionId, Subscriber>,
    new_games: BTreeMap<GameId, Game>,
    challenged: BTreeMap<GameId, Game>,
    live: BTreeMap<GameId, Game>,
    /// Index of the node live games are forwarded to. Set by a migration
    /// request; acted on at the next move.
    migration: Option<usize>,
}

struct Node {
    name: String,
    url: String,
    state: Mutex<NodeState>,
}

impl Node {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: format!("local://{name}"),
            state: Mutex::new(NodeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap()
    }
}

struct ClusterShared {
    nodes: Vec<Node>,
    next_session: AtomicU64,
    duplicate_delivery: AtomicBool,
}

/// One- or two-node in-process cluster.
pub struct LocalCluster {
    shared: Arc<ClusterShared>,
}

impl LocalCluster {
    /// A single node; migration requests are ignored (nowhere to go).
    pub fn single(name: &str) -> Self {
        Self::with_nodes(vec![Node::new(name)])
    }

    /// Two nodes that migrate live games to each other.
    pub fn pair(first: &str, second: &str) -> Self {
        Self::with_nodes(vec![Node::new(first), Node::new(second)])
    }

    fn with_nodes(nodes: Vec<Node>) -> Self {
        Self {
            shared: Arc::new(ClusterShared {
                nodes,
                next_session: AtomicU64::new(1),
                duplicate_delivery: AtomicBool::new(false),
            }),
        }
    }

    /// The connect url of node `index`.
    pub fn url(&self, index: usize) -> String {
        self.shared.nodes[index].url.clone()
    }

    /// Deliver every server-to-client message twice.
    pub fn duplicate_delivery(&self, enabled: bool) {
        self.shared
            .duplicate_delivery
            .store(enabled, Ordering::Relaxed);
    }

    /// A fresh transport (one per client).
    pub fn transport(&self) -> Arc<dyn Transport> {
        let session = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        Arc::new(LocalTransport {
            shared: Arc::clone(&self.shared),
            session,
            connected: Mutex::new(None),
        })
    }
}

/// Client-side endpoint of the cluster. Created by
/// [`LocalCluster::transport`].
pub struct LocalTransport {
    shared: Arc<ClusterShared>,
    session: SessionId,
    connected: Mutex<Option<usize>>,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        match self.shared.node_index(url) {
            Some(index) => {
                *self.connected.lock().unwrap() = Some(index);
                Ok(())
            }
            None => Err(TransportError::Connect {
                url: url.to_string(),
                reason: "no such node".into(),
            }),
        }
    }

    async fn subscribe(
        &self,
        subscribed: &[&str],
        sink: mpsc::UnboundedSender<Envelope>,
    ) -> Result<(), TransportError> {
        let node = self.node()?;
        let mut state = self.shared.nodes[node].lock();
        state.subscribers.insert(
            self.session,
            Subscriber {
                topics: subscribed.iter().map(|t| t.to_string()).collect(),
                sink,
            },
        );
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError> {
        let node = self.node()?;
        match topic {
            topics::CHALLENGE => self.shared.handle_challenge(node, self.session, payload),
            topics::MOVE_WRITE => self.shared.handle_move(node, payload),
            topics::MIGRATE => self.shared.handle_migrate_request(node),
            other => debug!(topic = other, "publish on unhandled channel dropped"),
        }
        Ok(())
    }

    async fn call(&self, endpoint: &str, payload: Value) -> Result<CallReply, TransportError> {
        let node = self.node()?;
        Ok(self.shared.handle_call(node, self.session, endpoint, payload))
    }

    async fn close(&self) {
        let Some(node) = self.connected.lock().unwrap().take() else {
            return;
        };
        let mut state = self.shared.nodes[node].lock();
        state.subscribers.remove(&self.session);
        state.players.retain(|_, session| *session != self.session);
    }
}

impl LocalTransport {
    fn node(&self) -> Result<usize, TransportError> {
        (*self.connected.lock().unwrap()).ok_or(TransportError::NotConnected)
    }
}

impl ClusterShared {
    /// Resolve a connect url (query string and all) to a node.
    fn node_index(&self, url: &str) -> Option<usize> {
        let base = url.split('?').next().unwrap_or(url);
        self.nodes.iter().position(|n| n.url == base)
    }

    fn deliver(&self, sink: &mpsc::UnboundedSender<Envelope>, topic: &str, payload: Value) {
        let envelope = Envelope {
            topic: topic.to_string(),
            payload,
        };
        let copies = if self.duplicate_delivery.load(Ordering::Relaxed) {
            2
        } else {
            1
        };
        for _ in 0..copies {
            let _ = sink.send(envelope.clone());
        }
    }

    fn broadcast(&self, state: &NodeState, topic: &str, payload: Value) {
        for subscriber in state.subscribers.values() {
            if subscriber.topics.contains(topic) {
                self.deliver(&subscriber.sink, topic, payload.clone());
            }
        }
    }

    fn deliver_to_player(&self, state: &NodeState, player: &Player, topic: &str, payload: Value) {
        let Some(subscriber) = state
            .players
            .get(player)
            .and_then(|session| state.subscribers.get(session))
        else {
            debug!(%player, topic, "no session to deliver to");
            return;
        };
        if subscriber.topics.contains(topic) {
            self.deliver(&subscriber.sink, topic, payload);
        }
    }

    fn broadcast_game_list(&self, state: &NodeState) {
        let games: Vec<&Game> = state.new_games.values().collect();
        let payload = serde_json::to_value(&games).unwrap_or(Value::Null);
        self.broadcast(state, topics::GAMES, payload);
    }

    fn player_of(state: &NodeState, session: SessionId) -> Option<Player> {
        state
            .players
            .iter()
            .find(|(_, s)| **s == session)
            .map(|(player, _)| player.clone())
    }

    fn handle_call(
        &self,
        node: usize,
        session: SessionId,
        endpoint: &str,
        payload: Value,
    ) -> CallReply {
        match endpoint {
            calls::PLAY => self.play(node, session, payload),
            calls::NEW => self.new_game(node, session),
            calls::FIND => self.find_game(node, payload),
            calls::GET => self.get_game(node, payload),
            other => CallReply::failure(json!(format!("unknown endpoint {other}"))),
        }
    }

    fn play(&self, node: usize, session: SessionId, payload: Value) -> CallReply {
        let Ok(PlayerRef { player }) = serde_json::from_value(payload) else {
            return CallReply::failure(json!("missing player"));
        };
        let player = Player::new(player.as_str());
        let state = &mut *self.nodes[node].lock();
        state.players.insert(player.clone(), session);
        self.broadcast_game_list(state);
        CallReply::ok(json!(player))
    }

    fn new_game(&self, node: usize, session: SessionId) -> CallReply {
        let (migration, player, caller_sink) = {
            let state = self.nodes[node].lock();
            let Some(player) = Self::player_of(&state, session) else {
                return CallReply::failure(json!("player not registered"));
            };
            let sink = state
                .subscribers
                .get(&session)
                .map(|s| s.sink.clone());
            (state.migration, player, sink)
        };

        match migration {
            None => {
                let state = &mut *self.nodes[node].lock();
                let id = GameId::new(format!(
                    "{}_{}",
                    self.nodes[node].name,
                    next_game_number(state)
                ));
                let game = Game::new(id.clone(), player);
                state.new_games.insert(id, game.clone());
                self.broadcast_game_list(state);
                CallReply::ok(serde_json::to_value(&game).unwrap_or(Value::Null))
            }
            Some(peer) => {
                // forward the creation, then relocate the caller
                let game = {
                    let state = &mut *self.nodes[peer].lock();
                    let id = GameId::new(format!(
                        "{}_{}",
                        self.nodes[peer].name,
                        next_game_number(state)
                    ));
                    let game = Game::new(id.clone(), player.clone());
                    state.new_games.insert(id, game.clone());
                    self.broadcast_game_list(state);
                    game
                };
                if let Some(sink) = caller_sink {
                    let url = self.migration_url(peer, &player);
                    self.deliver(&sink, topics::MIGRATE, json!({ "url": url }));
                }
                CallReply::ok(serde_json::to_value(&game).unwrap_or(Value::Null))
            }
        }
    }

    fn find_game(&self, node: usize, payload: Value) -> CallReply {
        let Ok(PlayerRef { player }) = serde_json::from_value(payload) else {
            return CallReply::failure(json!("missing player"));
        };
        let state = &*self.nodes[node].lock();
        let found = state
            .new_games
            .values()
            .chain(state.challenged.values())
            .chain(state.live.values())
            .find(|game| game.has_player(&player))
            .cloned();
        match found {
            Some(game) => {
                self.broadcast_game_list(state);
                CallReply::ok(serde_json::to_value(&game).unwrap_or(Value::Null))
            }
            None => CallReply::failure(json!(player)),
        }
    }

    fn get_game(&self, node: usize, payload: Value) -> CallReply {
        let Ok(GameRef { game_id: id }) = serde_json::from_value(payload) else {
            return CallReply::failure(json!("missing gameId"));
        };
        let state = &*self.nodes[node].lock();
        let found = state
            .new_games
            .get(&id)
            .or_else(|| state.challenged.get(&id))
            .or_else(|| state.live.get(&id))
            .cloned();
        match found {
            Some(game) => CallReply::ok(serde_json::to_value(&game).unwrap_or(Value::Null)),
            None => CallReply::failure(json!(id)),
        }
    }

    fn handle_challenge(&self, node: usize, session: SessionId, payload: Value) {
        let challenge: Challenge = match serde_json::from_value(payload) {
            Ok(challenge) => challenge,
            Err(e) => {
                warn!(error = %e, "malformed challenge dropped");
                return;
            }
        };
        match challenge {
            Challenge::Request { game_id } => self.challenge_request(node, session, game_id),
            Challenge::Response {
                game_id,
                result: true,
                ..
            } => self.challenge_accepted(node, game_id),
            Challenge::Response {
                game_id,
                result: false,
                ..
            } => self.challenge_rejected(node, game_id),
        }
    }

    fn challenge_request(&self, node: usize, session: SessionId, game_id: GameId) {
        let state = &mut *self.nodes[node].lock();
        let Some(challenger) = Self::player_of(state, session) else {
            warn!("challenge from unregistered session dropped");
            return;
        };
        let Some(mut game) = state.new_games.remove(&game_id) else {
            debug!(game = %game_id, "challenge for unknown game dropped");
            return;
        };
        game.opponent = Some(challenger);
        let owner = game.owner.clone();
        state.challenged.insert(game_id.clone(), game);
        let request = Challenge::Request { game_id };
        self.deliver_to_player(
            state,
            &owner,
            topics::CHALLENGE,
            serde_json::to_value(&request).unwrap_or(Value::Null),
        );
        self.broadcast_game_list(state);
    }

    fn challenge_accepted(&self, node: usize, game_id: GameId) {
        let state = &mut *self.nodes[node].lock();
        let Some(game) = state.challenged.remove(&game_id) else {
            debug!(game = %game_id, "acceptance for unknown challenge dropped");
            return;
        };
        state.live.insert(game_id.clone(), game.clone());
        let response = Challenge::Response {
            game_id,
            result: true,
            game: Some(game.clone()),
        };
        let payload = serde_json::to_value(&response).unwrap_or(Value::Null);
        self.deliver_to_player(state, &game.owner, topics::CHALLENGE, payload.clone());
        if let Some(opponent) = &game.opponent {
            self.deliver_to_player(state, opponent, topics::CHALLENGE, payload);
        }
    }

    fn challenge_rejected(&self, node: usize, game_id: GameId) {
        let state = &mut *self.nodes[node].lock();
        let Some(mut game) = state.challenged.remove(&game_id) else {
            debug!(game = %game_id, "rejection for unknown challenge dropped");
            return;
        };
        let challenger = game.opponent.take();
        state.new_games.insert(game_id.clone(), game);
        if let Some(challenger) = challenger {
            let response = Challenge::Response {
                game_id,
                result: false,
                game: None,
            };
            self.deliver_to_player(
                state,
                &challenger,
                topics::CHALLENGE,
                serde_json::to_value(&response).unwrap_or(Value::Null),
            );
        }
        self.broadcast_game_list(state);
    }

    fn handle_move(&self, node: usize, payload: Value) {
        let mv: Move = match serde_json::from_value(payload) {
            Ok(mv) => mv,
            Err(e) => {
                warn!(error = %e, "malformed move dropped");
                return;
            }
        };

        enum Applied {
            Echo(Game, Move),
            Forward(usize, Game, Vec<(mpsc::UnboundedSender<Envelope>, String)>),
        }

        let applied = {
            let state = &mut *self.nodes[node].lock();
            let Some(game) = state.live.get_mut(&mv.game_id) else {
                debug!(game = %mv.game_id, "move for unknown live game dropped");
                return;
            };
            let taken = game
                .moves
                .iter()
                .any(|m| m.square == mv.square || m.sequence == mv.sequence);
            if taken || mv.square > 8 {
                debug!(game = %game.id, square = mv.square, "invalid move dropped");
                return;
            }
            game.moves.push(mv.clone());

            match state.migration {
                None => {
                    let game = state.live.get(&mv.game_id).cloned();
                    match game {
                        Some(game) => Applied::Echo(game, mv),
                        None => return,
                    }
                }
                Some(peer) => {
                    let Some(game) = state.live.remove(&mv.game_id) else {
                        return;
                    };
                    let mut redirects = Vec::new();
                    for player in
                        std::iter::once(&game.owner).chain(game.opponent.iter())
                    {
                        if let Some(subscriber) = state
                            .players
                            .get(player)
                            .and_then(|session| state.subscribers.get(session))
                        {
                            redirects.push((
                                subscriber.sink.clone(),
                                self.migration_url(peer, player),
                            ));
                        }
                    }
                    Applied::Forward(peer, game, redirects)
                }
            }
        };

        match applied {
            Applied::Echo(mut game, mv) => {
                let state = &mut *self.nodes[node].lock();
                self.broadcast(
                    state,
                    topics::MOVE,
                    serde_json::to_value(&mv).unwrap_or(Value::Null),
                );
                let winner = winner_of(&game);
                let complete = winner.is_some() || game.moves.len() == 9;
                if complete {
                    game.winner = winner;
                    state.live.insert(game.id.clone(), game.clone());
                    self.broadcast(
                        state,
                        topics::RESULT,
                        serde_json::to_value(&game).unwrap_or(Value::Null),
                    );
                }
            }
            Applied::Forward(peer, game, redirects) => {
                self.nodes[peer].lock().live.insert(game.id.clone(), game);
                for (sink, url) in redirects {
                    self.deliver(&sink, topics::MIGRATE, json!({ "url": url }));
                }
            }
        }
    }

    fn handle_migrate_request(&self, node: usize) {
        if self.nodes.len() < 2 {
            debug!("migration requested with no peer node");
            return;
        }
        let peer = (node + 1) % self.nodes.len();
        self.nodes[node].lock().migration = Some(peer);
        debug!(from = %self.nodes[node].name, to = %self.nodes[peer].name, "migration armed");
    }

    fn migration_url(&self, peer: usize, player: &Player) -> String {
        format!(
            "{}?player={}",
            self.nodes[peer].url,
            encode_component(player.as_str())
        )
    }
}

fn next_game_number(state: &mut NodeState) -> u64 {
    state.next_game += 1;
    state.next_game
}

/// The strike winner, if any. Even-parity strikes belong to the owner.
fn winner_of(game: &Game) -> Option<Player> {
    let board: HashMap<u8, u32> = game
        .moves
        .iter()
        .map(|m| (m.square, m.sequence % 2))
        .collect();
    for line in STRIKES {
        if let (Some(a), Some(b), Some(c)) =
            (board.get(&line[0]), board.get(&line[1]), board.get(&line[2]))
        {
            if a == b && b == c {
                return if *a == 0 {
                    Some(game.owner.clone())
                } else {
                    game.opponent.clone()
                };
            }
        }
    }
    None
}

/// Minimal percent-encoding for url query components.
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
