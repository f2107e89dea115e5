//! Fire generation: any truck may announce fires.
//!
//! No privileged world process exists, so trucks take turns rolling for new
//! ignitions. The roll fires when the local view shows little activity or
//! the bus has been silent about fires for a while, capped so the fleet is
//! never swamped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::interval;
use tracing::{info, warn};

use brigade_core::{Cell, CellState, FireId};
use brigade_net::{channel, BusExt, FireAnnouncePayload, MessageKind};

use crate::controller::Truck;

/// Cadence of the ignition roll.
const IGNITION_INTERVAL: Duration = Duration::from_secs(12);

/// No fire traffic for this long counts as silence.
const SILENCE_TIMEOUT: Duration = Duration::from_secs(20);

/// Below this many active fires the quiet-world roll applies.
const LOW_ACTIVITY: usize = 2;

/// Never generate past this many active fires.
const MAX_ACTIVE_FIRES: usize = 5;

/// Chance to generate when the world is quiet.
const QUIET_CHANCE: f64 = 0.4;

/// Chance to generate after prolonged silence.
const SILENCE_CHANCE: f64 = 0.5;

impl Truck {
    /// Start the periodic ignition driver for this truck.
    pub fn spawn_ignition(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = interval(IGNITION_INTERVAL);
            loop {
                ticker.tick().await;
                self.maybe_ignite(&mut rng);
            }
        });
    }

    /// Roll once; announce a fresh fire when the roll passes.
    pub(crate) fn maybe_ignite(&self, rng: &mut StdRng) {
        let announce = {
            let mut state = self.state.lock();
            let active = state.grid.active_fire_count();
            let silent = state.last_fire_seen.elapsed() > SILENCE_TIMEOUT;

            let should = (active < LOW_ACTIVITY && rng.gen::<f64>() < QUIET_CHANCE)
                || (silent && rng.gen::<f64>() < SILENCE_CHANCE);
            if !should || active >= MAX_ACTIVE_FIRES {
                None
            } else {
                let row = rng.gen_range(0..state.grid.size());
                let col = rng.gen_range(0..state.grid.size());
                if state.grid.cell(row, col).state == CellState::Fire {
                    None
                } else {
                    let intensity = rng.gen_range(2..=4);
                    state.grid.set_cell(row, col, Cell::fire(intensity));
                    state.last_fire_seen = Instant::now();
                    Some(FireAnnouncePayload::new(
                        FireId::new(row, col),
                        intensity,
                        None,
                    ))
                }
            }
        };

        if let Some(payload) = announce {
            info!(
                fire = %payload.fire(),
                intensity = payload.intensity,
                "igniting a new fire"
            );
            if let Err(err) = self.bus.publish_payload(
                channel::FIRE_ALERTS,
                MessageKind::FireAnnounce,
                &payload,
            ) {
                warn!(error = %err, "failed to announce fire");
            }
        }
    }
}
