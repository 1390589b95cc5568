//! # noughts
//!
//! Client-side session synchronization for a two-player
//! noughts-and-crosses game whose only communication channel is an
//! asynchronous publish/subscribe transport with at-least-once,
//! possibly-reordered delivery, plus a unary remote-call facility.
//!
//! The crate keeps two independently-running clients' views of one shared
//! game consistent with no locking and no visible server state:
//!
//! - turn arbitration is derived, never transmitted ([`turn`])
//! - square occupancy is a projection of the move log, never mutated
//!   independently ([`board`])
//! - inbound application is idempotent against duplicates and reordering
//!   ([`session`])
//! - opponents are discovered and paired over a challenge handshake
//!   ([`matchmaking`])
//! - a server-initiated relocation ("migration") survives as a
//!   reconnect-plus-resume, with identity carried by the [`store`]
//!
//! Everything runs on one cooperative event loop ([`client`]) behind a
//! [`transport::Transport`] implementation. [`testing`] provides an
//! in-process reference cluster so the whole protocol can be exercised
//! without a network:
//!
//! ```text
//! let cluster = testing::LocalCluster::single("alpha");
//! let store = Arc::new(store::MemoryStore::new());
//! let config = config::Config::new(cluster.url(0));
//! let (client, mut events) = client::Client::connect(config, cluster.transport(), store).await?;
//!
//! client.set_player("alice")?;
//! client.new_game()?;
//! while let Some(event) = events.recv().await {
//!     // render
//! }
//! ```

pub mod board;
pub mod client;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod message;
pub mod migration;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod testing;
pub mod transport;
pub mod turn;

/// Prelude module for convenient glob imports.
pub mod prelude {
    pub use crate::client::{BoardView, Client, Event};
    pub use crate::config::{Config, MoveApply, ResumeStrategy};
    pub use crate::error::ClientError;
    pub use crate::matchmaking::AcceptPolicy;
    pub use crate::message::{Challenge, Game, GameId, GameSummary, Mark, Move, Player};
    pub use crate::session::Outcome;
    pub use crate::store::{JsonFileStore, MemoryStore, SessionStore};
    pub use crate::transport::{CallReply, Envelope, Transport, TransportError};
}
