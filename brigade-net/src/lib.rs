//! Pub/sub bus and wire protocol for the brigade fleet.
//!
//! This crate provides the messaging layer every agent speaks:
//!
//! 1. **Envelope** (`envelope.rs`) - typed messages, JSON wire codec,
//!    channel taxonomy
//! 2. **Transport** (`transport.rs`) - the channel-addressed [`Bus`]
//!    abstraction with loopback suppression and clock stamping
//! 3. **Memory** (`memory.rs`) - in-process bus for tests and single-process
//!    simulation
//! 4. **Tcp** (`tcp.rs`) - relay-based TCP bus for multi-process fleets
//!
//! Delivery is best-effort and FIFO per `(publisher, channel)` pair; the bus
//! may reorder messages across publishers. Every envelope carries a Lamport
//! timestamp stamped at publish and merged into the local clock before any
//! handler runs.

pub mod channel;
pub mod envelope;
pub mod memory;
pub mod tcp;
pub mod transport;

pub use envelope::{
    BidDecisionPayload, BidPayload, Codec, CodecError, Envelope, ExtinguishedPayload,
    FireAnnouncePayload, MessageKind, TruckStatusPayload, WaterReplyPayload,
    WaterReleasePayload, WaterReqPayload, EXTINGUISHED_ACTION,
};
pub use memory::{MemoryBus, MemoryHub};
pub use tcp::{BusRelay, TcpBus};
pub use transport::{Bus, BusError, BusExt, Handler};
