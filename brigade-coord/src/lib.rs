//! Decentralized coordination protocols for the brigade fleet.
//!
//! Two protocols, both driven purely by messages and both deterministic so
//! every correct agent reaches the same conclusion from the same inputs:
//!
//! 1. **Auction** (`auction.rs`) - per-fire sealed-bid collection with a
//!    deterministic winner and a single elected announcer
//! 2. **Refill** (`refill.rs`) - Ricart-Agrawala mutual exclusion for the
//!    shared refill critical section
//!
//! The engines here are pure state machines: they never touch the bus.
//! Handlers feed them received messages and they hand back the actions to
//! publish, which keeps every protocol rule testable without a transport.

pub mod auction;
pub mod refill;

pub use auction::{AuctionBook, AuctionOutcome, Bid};
pub use refill::{RaState, RefillAction, RefillMutex};
