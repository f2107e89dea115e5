//! Logical channel names for fleet coordination.
//!
//! Channel names are stable strings; adapters address subscriptions and
//! publishes by them.

/// Fire announcements, new or spread.
pub const FIRE_ALERTS: &str = "fires.alerts";

/// Bids on announced fires.
pub const FIRE_BIDS: &str = "fires.bids";

/// Winner announcements.
pub const FIRE_DECISION: &str = "fires.decision";

/// Periodic heartbeats with position and water state.
pub const TRUCK_STATUS: &str = "trucks.status";

/// Extinguish events and ancillary coordination.
pub const COORDINATION: &str = "coordination";

/// Ricart-Agrawala refill requests.
pub const WATER_REQ: &str = "water.req";

/// Ricart-Agrawala refill replies.
pub const WATER_REPLY: &str = "water.reply";

/// Ricart-Agrawala refill releases.
pub const WATER_RELEASE: &str = "water.release";
