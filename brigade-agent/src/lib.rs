//! Agent roles for the brigade fleet.
//!
//! 1. **Controller** (`controller.rs`) - the truck state machine:
//!    idle -> bidding -> en-route -> extinguishing -> refilling, tied to the
//!    auction and refill protocols over one shared Lamport clock
//! 2. **Ignition** (`ignition.rs`) - the fire-generation driver; any truck
//!    may announce fires
//! 3. **Observer** (`observer.rs`) - a passive terminal view of the fleet,
//!    which also advances fire spread and announces spread cells
//!
//! No agent is privileged: every decision about who fights which fire and
//! who refills next is reached through the protocols in `brigade-coord`.

pub mod config;
pub mod controller;
pub mod ignition;
pub mod observer;

pub use config::{spawn_position, TruckConfig};
pub use controller::{Task, Truck};
pub use observer::{Observer, ObserverConfig};
