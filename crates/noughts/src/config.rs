//! Client configuration.

use std::ops::RangeInclusive;

use crate::matchmaking::AcceptPolicy;
use crate::migration;

/// Which lookup restores a session after a reconnect or migration.
///
/// Both strategies exist in the wild; exactly one path executes per
/// resumption attempt. By-player is the documented default - it is the
/// lookup the server actually serves across migrations (the redirect url
/// carries the player, not the game). By-game-id is kept for deployments
/// that persist the game identifier instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResumeStrategy {
    #[default]
    ByPlayer,
    ByGameId,
}

/// When a locally attempted move becomes visible on the local board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MoveApply {
    /// Apply only when the server echoes the move on the public channel.
    /// The two clients' views can never diverge optimistically.
    #[default]
    AwaitEcho,
    /// Apply immediately; the echo reconciles as a duplicate no-op.
    Optimistic,
}

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a game client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Url handed to the transport handshake. A migration notice replaces
    /// it for the lifetime of the client.
    pub url: String,
    pub resume: ResumeStrategy,
    pub move_apply: MoveApply,
    pub accept_policy: AcceptPolicy,
    /// Delay window for a scheduled migration request, in milliseconds.
    pub migration_delay_ms: RangeInclusive<u64>,
    /// Capacity of the bounded event channel. When the consumer lags,
    /// events are dropped with a warning; the terminal events (`GameOver`,
    /// `Closed`) are always delivered.
    pub event_capacity: usize,
}

impl Config {
    /// A configuration with default policies for the given server url.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resume: ResumeStrategy::default(),
            move_apply: MoveApply::default(),
            accept_policy: AcceptPolicy::default(),
            migration_delay_ms: migration::DEFAULT_DELAY_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_resume(mut self, resume: ResumeStrategy) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn with_move_apply(mut self, move_apply: MoveApply) -> Self {
        self.move_apply = move_apply;
        self
    }

    #[must_use]
    pub fn with_accept_policy(mut self, policy: AcceptPolicy) -> Self {
        self.accept_policy = policy;
        self
    }

    #[must_use]
    pub fn with_migration_delay_ms(mut self, window: RangeInclusive<u64>) -> Self {
        self.migration_delay_ms = window;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("local://alpha");
        assert_eq!(config.url, "local://alpha");
        assert_eq!(config.resume, ResumeStrategy::ByPlayer);
        assert_eq!(config.move_apply, MoveApply::AwaitEcho);
        assert_eq!(config.accept_policy, AcceptPolicy::AutoAccept);
        assert_eq!(config.migration_delay_ms, 2_000..=12_000);
    }

    #[test]
    fn test_builders() {
        let config = Config::new("local://alpha")
            .with_resume(ResumeStrategy::ByGameId)
            .with_move_apply(MoveApply::Optimistic)
            .with_accept_policy(AcceptPolicy::Manual)
            .with_migration_delay_ms(100..=200)
            .with_event_capacity(0);
        assert_eq!(config.resume, ResumeStrategy::ByGameId);
        assert_eq!(config.move_apply, MoveApply::Optimistic);
        assert_eq!(config.accept_policy, AcceptPolicy::Manual);
        assert_eq!(config.migration_delay_ms, 100..=200);
        assert_eq!(config.event_capacity, 1);
    }
}
