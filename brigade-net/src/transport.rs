//! The channel-addressed pub/sub bus abstraction.
//!
//! A [`Bus`] stamps `from` and `lamport` on publish, drops loopback
//! deliveries, and merges the sender's Lamport timestamp into the local
//! clock before any handler runs. Publish is non-blocking from the caller's
//! perspective: adapters buffer outbound frames. Delivery is best-effort and
//! FIFO per `(publisher, channel)` pair.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use brigade_core::AgentId;

use crate::envelope::{CodecError, Envelope, MessageKind};

/// A subscription handler, invoked once per received message.
///
/// Handlers run on the adapter's dispatch tasks and may fire concurrently
/// across channels; they must do their own locking and log their own
/// failures.
pub type Handler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Errors surfaced by bus adapters.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to bus at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind bus relay at {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("bus is closed")]
    Closed,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A channel-addressed publish/subscribe bus.
pub trait Bus: Send + Sync {
    /// The identifier this bus stamps on published messages.
    fn agent_id(&self) -> &AgentId;

    /// Publish a message to every current subscriber of `channel`.
    ///
    /// The adapter stamps `from` with [`Bus::agent_id`] and `lamport` with a
    /// fresh clock tick, then delivers best-effort. Errors are transient: the
    /// affected event is lost and periodic behavior re-establishes state.
    fn publish(&self, channel: &str, kind: MessageKind, payload: Value) -> Result<(), BusError>;

    /// Install a handler for `channel`.
    ///
    /// The adapter drops messages whose `from` equals the local id and calls
    /// `clock.receive` with the sender's timestamp before invoking the
    /// handler. Messages that fail to decode are logged and dropped.
    fn subscribe(&self, channel: &str, handler: Handler) -> Result<(), BusError>;

    /// Stop delivery and release adapter resources.
    fn close(&self);
}

/// Convenience methods over any [`Bus`].
pub trait BusExt: Bus {
    /// Publish a typed payload.
    fn publish_payload<T: Serialize>(
        &self,
        channel: &str,
        kind: MessageKind,
        payload: &T,
    ) -> Result<(), BusError> {
        self.publish(channel, kind, serde_json::to_value(payload)?)
    }
}

impl<B: Bus + ?Sized> BusExt for B {}
