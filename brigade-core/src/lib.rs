//! Core types for the brigade firefighting fleet.
//!
//! This crate provides the building blocks shared by every other crate:
//!
//! 1. **Clock** (`clock.rs`) - Lamport logical clock for causal ordering
//! 2. **Identifiers** (`id.rs`) - agent and fire identifiers with total orders
//! 3. **Grid** (`grid.rs`) - the 2-D world of cells, ignition, spread, and
//!    extinguishing
//!
//! # Example
//!
//! ```
//! use brigade_core::{AgentId, FireId, LamportClock};
//!
//! let clock = LamportClock::new();
//! let t1 = clock.tick();
//! let t2 = clock.receive(10);
//! assert!(t2 > t1);
//!
//! let truck = AgentId::new("T1").unwrap();
//! let fire = FireId::new(2, 2);
//! assert_eq!(fire.manhattan(0, 0), 4);
//! assert_eq!(truck.as_str(), "T1");
//! ```

pub mod clock;
pub mod grid;
pub mod id;

pub use clock::LamportClock;
pub use grid::{Cell, CellState, FireLocation, Grid, GRID_SIZE};
pub use id::{AgentId, EmptyAgentId, FireId};
