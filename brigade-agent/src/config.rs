//! Truck configuration and spawn placement.

use std::time::Duration;

use brigade_core::{AgentId, GRID_SIZE};

/// Configuration for one truck agent.
#[derive(Debug, Clone)]
pub struct TruckConfig {
    /// Tank capacity.
    pub max_water: u32,
    /// Water on startup.
    pub initial_water: u32,
    /// At or below this level the truck seeks a refill.
    pub low_water_thresh: u32,
    /// Status heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Motion/extinguish tick while assigned.
    pub motion_interval: Duration,
    /// Bid collection window, armed on the first bid seen per fire.
    pub bid_window: Duration,
    /// Side length of the world grid.
    pub grid_size: i32,
    /// Starting position override; defaults to [`spawn_position`] by id.
    pub start: Option<(i32, i32)>,
}

impl Default for TruckConfig {
    fn default() -> Self {
        Self {
            max_water: 50,
            initial_water: 30,
            low_water_thresh: 10,
            heartbeat_interval: Duration::from_secs(2),
            motion_interval: Duration::from_millis(500),
            bid_window: Duration::from_secs(1),
            grid_size: GRID_SIZE,
            start: None,
        }
    }
}

/// Starting position for a truck by its id.
///
/// The first four trucks take the corners; anything else starts in the
/// center.
pub fn spawn_position(id: &AgentId, grid_size: i32) -> (i32, i32) {
    match id.as_str() {
        "T1" => (0, 0),
        "T2" => (grid_size - 1, grid_size - 1),
        "T3" => (0, grid_size - 1),
        "T4" => (grid_size - 1, 0),
        _ => (grid_size / 2, grid_size / 2),
    }
}
