//! Error taxonomy.
//!
//! Three tiers, handled differently by design:
//! - transport-level failures ([`TransportError`]) recover locally by
//!   falling back to the default "start a new game" state, never fatal;
//! - protocol anomalies ([`crate::message::DecodeError`], duplicate or
//!   out-of-order moves) are logged and discarded;
//! - application outcomes (occupied square, not your turn) are silent
//!   no-ops and never errors at all.

use crate::transport::TransportError;

/// Failures surfaced through the client API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport adapter failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The client event loop has shut down; commands can no longer be
    /// delivered.
    #[error("client is closed")]
    Closed,
}
