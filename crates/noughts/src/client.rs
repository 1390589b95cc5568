//! The game client: one cooperative event loop per tab.
//!
//! A [`Client`] is a cheap-clone command handle onto a background task that
//! exclusively owns the [`GameSession`] and [`Matchmaker`]. Handlers run to
//! completion on that single task, so session state needs no locking; the
//! only suspension points are the network boundaries.
//!
//! Lifecycle: `connect` performs the transport handshake, registers every
//! inbound channel in one atomic batch, and runs one resumption attempt -
//! in that order, so no inbound message can be dispatched before
//! subscription completes. A migration notice repeats the same sequence
//! against the carried url.

use std::ops::ControlFlow;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::config::{Config, MoveApply, ResumeStrategy};
use crate::error::ClientError;
use crate::matchmaking::{Matchmaker, RequestDisposition};
use crate::message::{
    self, Challenge, Game, GameId, GameRef, GameSummary, Incoming, Player, PlayerRef, Squares,
    calls, topics,
};
use crate::migration::Migrator;
use crate::session::{ApplyOutcome, GameSession, Outcome};
use crate::store::{self, SessionStore};
use crate::transport::{Envelope, Transport};

/// Commands accepted by the client handle.
#[derive(Clone, Debug)]
enum Command {
    SetPlayer(String),
    NewGame,
    Challenge(GameId),
    RespondChallenge { game_id: GameId, accept: bool },
    PlaySquare(u8),
    ScheduleMigration,
    Shutdown,
}

/// A renderable snapshot of the current game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoardView {
    pub game_id: GameId,
    pub squares: Squares,
    pub my_turn: bool,
}

/// Everything the UI layer needs to observe. Events are dropped with a
/// warning when the consumer lags; the terminal events (`GameOver`,
/// `Closed`) are always delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Subscriptions are registered; resumption is about to run.
    Ready,
    /// No identity could be restored: present the entry form.
    IdentityRequired,
    /// The player registered with the server.
    Identified(Player),
    /// Challengeable games (own and current games already filtered out).
    GameList(Vec<GameSummary>),
    /// A challenge request awaits a manual decision.
    ChallengeReceived(GameId),
    /// A game was created, challenged into, or resumed.
    GameStarted(Game),
    BoardUpdated(BoardView),
    GameOver {
        outcome: Outcome,
        winner: Option<Player>,
    },
    /// A migration notice arrived; the client is navigating to `url`.
    Migrated { url: String },
    Closed,
}

/// Command handle onto a running client. Cloning is cheap.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
}

impl Client {
    /// Handshake with the configured server, subscribe, run one resumption
    /// attempt, and hand back the command handle plus the event stream.
    ///
    /// A failed handshake is returned to the caller, whose fallback is the
    /// default "start a new game" surface against another url.
    pub async fn connect(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> Result<(Client, mpsc::Receiver<Event>), ClientError> {
        transport.connect(&config.url).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        // replaced by the real delivery channel in `establish`
        let (_closed, placeholder) = mpsc::unbounded_channel();

        let mut worker = Worker {
            url: config.url.clone(),
            migrator: Migrator::new(Arc::clone(&transport), config.migration_delay_ms.clone()),
            matchmaker: Matchmaker::new(config.accept_policy),
            session: GameSession::new(),
            config,
            transport,
            store,
            events: event_tx,
            commands: command_rx,
            inbound: placeholder,
        };
        worker.establish().await?;
        tokio::spawn(worker.run());

        Ok((
            Client {
                commands: command_tx,
            },
            event_rx,
        ))
    }

    /// Submit the entry form: adopt `name` as the local identity.
    pub fn set_player(&self, name: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::SetPlayer(name.into()))
    }

    /// Create a new game owned by the local player, superseding any
    /// current one.
    pub fn new_game(&self) -> Result<(), ClientError> {
        self.send(Command::NewGame)
    }

    /// Challenge a game from the list.
    pub fn challenge(&self, game_id: GameId) -> Result<(), ClientError> {
        self.send(Command::Challenge(game_id))
    }

    /// Answer a challenge surfaced by the manual accept policy.
    pub fn respond_challenge(&self, game_id: GameId, accept: bool) -> Result<(), ClientError> {
        self.send(Command::RespondChallenge { game_id, accept })
    }

    /// Attempt to move on `square` (0..=8, row-major).
    pub fn play_square(&self, square: u8) -> Result<(), ClientError> {
        self.send(Command::PlaySquare(square))
    }

    /// Arm the randomized migration request timer.
    pub fn schedule_migration(&self) -> Result<(), ClientError> {
        self.send(Command::ScheduleMigration)
    }

    /// Stop the event loop and close the transport.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

/// Infallible for the wire types this crate defines.
fn encode<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

struct Worker {
    config: Config,
    /// Current server url; replaced when a migration notice arrives.
    url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    session: GameSession,
    matchmaker: Matchmaker,
    migrator: Migrator,
    events: mpsc::Sender<Event>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedReceiver<Envelope>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                envelope = self.inbound.recv() => match envelope {
                    Some(envelope) => {
                        if self.handle_envelope(envelope).await.is_break() {
                            // navigation failed; Closed already emitted
                            return;
                        }
                    }
                    None => {
                        warn!("transport delivery ended");
                        break;
                    }
                },
            }
        }
        self.migrator.cancel();
        self.transport.close().await;
        self.emit_terminal(Event::Closed).await;
    }

    /// Register every inbound channel as one atomic batch, then run a
    /// resumption attempt. The subscribe call is the ready barrier: it
    /// completes before any message can be dispatched.
    async fn establish(&mut self) -> Result<(), ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.transport.subscribe(topics::INBOUND, tx).await?;
        self.inbound = rx;
        self.emit(Event::Ready);
        self.resume().await;
        Ok(())
    }

    /// One resumption attempt: durable identity, then the connect url's
    /// query parameter, else the entry form. Exactly one path runs.
    async fn resume(&mut self) {
        let identity = self
            .store
            .player()
            .or_else(|| store::player_from_query(&self.url));
        match identity {
            Some(player) => self.identify(player).await,
            None => self.emit(Event::IdentityRequired),
        }
    }

    /// Register `player` with the server, then look for a game to resume.
    async fn identify(&mut self, player: Player) {
        let reply = self
            .transport
            .call(
                calls::PLAY,
                encode(&PlayerRef {
                    player: player.clone(),
                }),
            )
            .await;
        match reply {
            Ok(reply) if reply.successful => {
                let registered = reply.decode::<Player>().unwrap_or(player);
                self.store.remember(&registered);
                self.session.set_player(registered.clone());
                self.emit(Event::Identified(registered));
                self.resume_game().await;
            }
            Ok(_) => {
                warn!(%player, "registration unsuccessful");
                self.emit(Event::IdentityRequired);
            }
            Err(e) => {
                warn!(%player, error = %e, "registration call failed");
                self.emit(Event::IdentityRequired);
            }
        }
    }

    /// Look up the game to resume, per the configured strategy. Every
    /// failure path lands in the default "start a new game" state.
    async fn resume_game(&mut self) {
        let lookup = match self.config.resume {
            ResumeStrategy::ByPlayer => {
                let Some(player) = self.session.player().cloned() else {
                    return;
                };
                self.transport
                    .call(calls::FIND, encode(&PlayerRef { player }))
                    .await
            }
            ResumeStrategy::ByGameId => {
                let Some(id) = self.store.game() else {
                    debug!("no stored game to resume");
                    return;
                };
                self.transport
                    .call(calls::GET, encode(&GameRef { game_id: id }))
                    .await
            }
        };
        match lookup {
            Ok(reply) if reply.successful => match reply.decode::<Game>() {
                Ok(game) => {
                    info!(game = %game.id, "session resumed");
                    self.adopt_game(game);
                }
                Err(e) => warn!(error = %e, "resumed game payload malformed"),
            },
            Ok(_) => {
                debug!("no game to resume");
                if self.config.resume == ResumeStrategy::ByGameId {
                    self.store.forget_game();
                }
            }
            Err(e) => warn!(error = %e, "resume lookup failed"),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetPlayer(name) => self.identify(Player::new(name)).await,
            Command::NewGame => self.new_game().await,
            Command::Challenge(game_id) => {
                if let Some(request) = self.matchmaker.challenge(game_id) {
                    self.publish_challenge(request).await;
                }
            }
            Command::RespondChallenge { game_id, accept } => {
                if let Some(response) = self.matchmaker.decide(&game_id, accept) {
                    self.publish_challenge(response).await;
                }
            }
            Command::PlaySquare(square) => self.play_square(square).await,
            Command::ScheduleMigration => self.migrator.schedule(),
            // consumed by the run loop
            Command::Shutdown => {}
        }
    }

    async fn new_game(&mut self) {
        if !self.matchmaker.can_create_game() {
            debug!("game creation disabled while a challenge is pending");
            return;
        }
        let Some(player) = self.session.player().cloned() else {
            debug!("no identity yet; cannot create a game");
            return;
        };
        let reply = self
            .transport
            .call(calls::NEW, encode(&PlayerRef { player }))
            .await;
        match reply {
            Ok(reply) if reply.successful => match reply.decode::<Game>() {
                Ok(game) => self.adopt_game(game),
                Err(e) => warn!(error = %e, "created game payload malformed"),
            },
            Ok(_) => warn!("game creation unsuccessful"),
            Err(e) => warn!(error = %e, "game creation call failed"),
        }
    }

    async fn play_square(&mut self, square: u8) {
        match self.session.prepare_move(square) {
            Ok(mv) => {
                if let Err(e) = self.transport.publish(topics::MOVE_WRITE, encode(&mv)).await {
                    warn!(error = %e, "move not published");
                    self.session.retract_unsent(mv.sequence);
                } else if self.config.move_apply == MoveApply::Optimistic
                    && self.session.apply(mv) == ApplyOutcome::Applied
                {
                    self.emit_board();
                }
            }
            Err(block) => debug!(square, %block, "move refused"),
        }
    }

    async fn publish_challenge(&mut self, challenge: Challenge) {
        if let Err(e) = self
            .transport
            .publish(topics::CHALLENGE, encode(&challenge))
            .await
        {
            warn!(error = %e, "challenge not published");
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> ControlFlow<()> {
        let incoming = match message::decode(&envelope.topic, &envelope.payload) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(topic = %envelope.topic, error = %e, "inbound message dropped");
                return ControlFlow::Continue(());
            }
        };
        match incoming {
            Incoming::GameList(list) => {
                let visible = self.matchmaker.challengeable(
                    &list,
                    self.session.player(),
                    self.session.game_id(),
                );
                self.emit(Event::GameList(visible));
            }
            Incoming::Challenge(challenge) => self.handle_challenge(challenge).await,
            Incoming::Move(mv) => {
                if self.session.apply(mv) == ApplyOutcome::Applied {
                    self.emit_board();
                }
            }
            Incoming::Result(game) => {
                if let Some(report) = self.session.finish(game) {
                    self.migrator.cancel();
                    self.emit_board();
                    self.emit_terminal(Event::GameOver {
                        outcome: report.outcome,
                        winner: report.winner,
                    })
                    .await;
                }
            }
            Incoming::Migrate(notice) => return self.navigate(notice.url).await,
        }
        ControlFlow::Continue(())
    }

    async fn handle_challenge(&mut self, challenge: Challenge) {
        match challenge {
            Challenge::Request { game_id } => match self.matchmaker.on_request(game_id) {
                RequestDisposition::Respond(response) => self.publish_challenge(response).await,
                RequestDisposition::AwaitDecision(game_id) => {
                    self.emit(Event::ChallengeReceived(game_id));
                }
            },
            Challenge::Response {
                game_id,
                result: true,
                game: Some(game),
            } => {
                self.matchmaker.resolve(&game_id);
                // pairing happens exactly once per game: the owner's local
                // copy has no opponent until the accepting snapshot lands,
                // while a redelivered acceptance finds the game already
                // paired and would only roll the board back
                let already_paired = self
                    .session
                    .game()
                    .is_some_and(|g| g.id == game.id && g.opponent.is_some());
                if already_paired {
                    debug!(game = %game.id, "duplicate challenge acceptance ignored");
                } else {
                    self.adopt_game(game);
                }
            }
            Challenge::Response {
                game_id,
                result: true,
                game: None,
            } => {
                warn!(game = %game_id, "accepting response carried no game");
                self.matchmaker.resolve(&game_id);
            }
            Challenge::Response {
                game_id,
                result: false,
                ..
            } => {
                debug!(game = %game_id, "challenge rejected; waiting");
                self.matchmaker.resolve(&game_id);
            }
        }
    }

    /// Install a game (created, challenged into, or resumed) and surface
    /// it.
    fn adopt_game(&mut self, game: Game) {
        if self.config.resume == ResumeStrategy::ByGameId {
            self.store.remember_game(&game.id);
        }
        self.matchmaker.clear();
        self.session.adopt(game.clone());
        self.emit(Event::GameStarted(game));
        self.emit_board();
    }

    /// Navigate to the migration target: tear the connection down, forget
    /// all in-memory game state (the hop is effectively a full reload),
    /// and replay handshake, subscription, and resumption against the new
    /// url. The Session Store is what carries identity across.
    async fn navigate(&mut self, url: String) -> ControlFlow<()> {
        info!(%url, "migration notice received");
        self.migrator.cancel();
        self.transport.close().await;
        self.session = GameSession::new();
        self.matchmaker.clear();
        self.emit(Event::Migrated { url: url.clone() });
        self.url = url;

        let reconnect = async {
            self.transport
                .connect(&self.url)
                .await
                .map_err(ClientError::from)?;
            self.establish().await
        };
        if let Err(e) = reconnect.await {
            warn!(error = %e, "reconnect after migration failed");
            self.emit_terminal(Event::Closed).await;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn emit_board(&self) {
        if let Some(game) = self.session.game() {
            self.emit(Event::BoardUpdated(BoardView {
                game_id: game.id.clone(),
                squares: self.session.squares(),
                my_turn: self.session.my_turn(),
            }));
        }
    }

    fn emit(&self, event: Event) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "event dropped; consumer is lagging");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Deliver a terminal event (`GameOver`, `Closed`) on the guaranteed
    /// path: wait for channel capacity instead of dropping.
    async fn emit_terminal(&self, event: Event) {
        let _ = self.events.send(event).await;
    }
}
