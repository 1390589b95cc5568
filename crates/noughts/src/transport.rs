//! Transport adapter boundary.
//!
//! Wraps handshake, subscription, publish, and unary remote calls around
//! whatever pub/sub implementation carries the protocol. Everything else in
//! this crate depends on [`Transport`]; nothing depends on the components
//! behind it. The transport owns its own reconnection and retry policy;
//! the client only observes a successful [`Transport::connect`] as the
//! boundary event that triggers (re-)subscription and identity resumption.
//!
//! Delivery guarantees are deliberately weak: at-least-once, possibly
//! reordered. Consumers must be idempotent; nothing here deduplicates.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

/// An inbound message as delivered by the transport: raw payload plus the
/// channel it arrived on. Typed decoding happens immediately after, at
/// [`crate::message::decode`].
#[derive(Clone, Debug)]
pub struct Envelope {
    pub topic: String,
    pub payload: Value,
}

/// Outcome of a unary remote call. Mirrors the wire shape
/// `{successful, data}`: an unsuccessful reply is an expected outcome, not
/// an error, and must be handled without throwing.
#[derive(Clone, Debug)]
pub struct CallReply {
    pub successful: bool,
    pub data: Value,
}

impl CallReply {
    pub fn ok(data: Value) -> Self {
        Self {
            successful: true,
            data,
        }
    }

    pub fn failure(data: Value) -> Self {
        Self {
            successful: false,
            data,
        }
    }

    /// Decode the reply data into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Transport-level failures. Recovered from locally; never fatal to the
/// session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("handshake with {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("not connected")]
    NotConnected,
    #[error("subscribe failed: {reason}")]
    Subscribe { reason: String },
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("remote call {endpoint} failed: {reason}")]
    Call { endpoint: String, reason: String },
}

/// The pub/sub + remote-call facade the protocol runs on.
///
/// Implementations must make [`Transport::subscribe`] atomic over its
/// batch: every topic in `topics` is registered before any message is
/// delivered to `sink`. This is the ready barrier the client relies on:
/// no inbound dispatch may precede subscription completion.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the handshake against `url`. Called again with a different
    /// url after a migration notice.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Register interest in `topics` as one atomic batch, delivering every
    /// subsequent message into `sink`. Replaces any prior registration.
    async fn subscribe(
        &self,
        topics: &[&str],
        sink: mpsc::UnboundedSender<Envelope>,
    ) -> Result<(), TransportError>;

    /// Fire-and-forget publish; no acknowledgement is surfaced.
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), TransportError>;

    /// Unary request/response exchange layered atop the transport.
    async fn call(&self, endpoint: &str, payload: Value) -> Result<CallReply, TransportError>;

    /// Tear down the connection and drop all subscriptions.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_reply_decode() {
        let reply = CallReply::ok(json!("alice"));
        assert!(reply.successful);
        let name: String = reply.decode().unwrap();
        assert_eq!(name, "alice");
    }

    #[test]
    fn test_call_reply_failure_is_not_an_error() {
        let reply = CallReply::failure(json!("alice"));
        assert!(!reply.successful);
        // data is still inspectable for fallback messaging
        let name: String = reply.decode().unwrap();
        assert_eq!(name, "alice");
    }
}
