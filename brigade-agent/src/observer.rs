//! The terminal observer: a passive view of the fleet.
//!
//! The observer consumes fire announcements, truck heartbeats, and
//! extinguish events to mirror the world, and renders it to the terminal on
//! a fixed cadence. It also advances fire spread on its local grid and
//! announces newly spread cells, so fires keep the fleet busy even when no
//! truck rolls an ignition.
//!
//! The observer never publishes heartbeats, so it is invisible to the refill
//! protocol's peer discovery.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::interval;
use tracing::{debug, info, warn};

use brigade_core::{AgentId, Cell, Grid};
use brigade_net::{
    channel, Bus, BusError, BusExt, Envelope, ExtinguishedPayload, FireAnnouncePayload,
    MessageKind, TruckStatusPayload,
};

/// Configuration for the observer process.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// How often the grid view is printed.
    pub render_interval: Duration,
    /// How often fire spread is advanced and announced.
    pub spread_interval: Duration,
    /// Side length of the world grid.
    pub grid_size: i32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            render_interval: Duration::from_secs(2),
            spread_interval: Duration::from_secs(5),
            grid_size: brigade_core::GRID_SIZE,
        }
    }
}

/// The latest heartbeat seen from one truck.
#[derive(Debug, Clone)]
pub struct TruckSighting {
    pub row: i32,
    pub col: i32,
    pub water: u32,
    pub max_water: u32,
    pub task: String,
    pub last_seen: DateTime<Utc>,
}

struct ObserverState {
    grid: Grid,
    trucks: BTreeMap<AgentId, TruckSighting>,
}

/// A passive monitor of the distributed fleet.
pub struct Observer {
    id: AgentId,
    config: ObserverConfig,
    bus: Arc<dyn Bus>,
    state: Mutex<ObserverState>,
}

impl Observer {
    /// Create an observer.
    pub fn new(id: AgentId, config: ObserverConfig, bus: Arc<dyn Bus>) -> Arc<Self> {
        let state = ObserverState {
            grid: Grid::with_size(config.grid_size),
            trucks: BTreeMap::new(),
        };
        Arc::new(Self {
            id,
            config,
            bus,
            state: Mutex::new(state),
        })
    }

    /// Subscribe to fleet traffic and start the render and spread loops.
    pub fn start(self: Arc<Self>) -> Result<(), BusError> {
        let observer = Arc::clone(&self);
        self.bus.subscribe(
            channel::FIRE_ALERTS,
            Arc::new(move |env| observer.on_fire_announce(env)),
        )?;
        let observer = Arc::clone(&self);
        self.bus.subscribe(
            channel::TRUCK_STATUS,
            Arc::new(move |env| observer.on_status(env)),
        )?;
        let observer = Arc::clone(&self);
        self.bus.subscribe(
            channel::COORDINATION,
            Arc::new(move |env| observer.on_coordination(env)),
        )?;

        info!(id = %self.id, "observer watching the fleet");

        let observer = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = interval(observer.config.render_interval);
            loop {
                ticker.tick().await;
                // The one deliberate terminal surface in the fleet.
                println!("{}", observer.render());
            }
        });

        let observer = self;
        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = interval(observer.config.spread_interval);
            loop {
                ticker.tick().await;
                observer.step_spread(&mut rng);
            }
        });

        Ok(())
    }

    fn on_fire_announce(&self, env: Envelope) {
        let payload: FireAnnouncePayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed fire announcement");
                return;
            }
        };
        info!(
            fire = %payload.fire(),
            intensity = payload.intensity,
            lamport = env.lamport,
            "new fire detected"
        );
        self.state
            .lock()
            .grid
            .set_cell(payload.id_x, payload.id_y, Cell::fire(payload.intensity));
    }

    fn on_status(&self, env: Envelope) {
        let payload: TruckStatusPayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed status");
                return;
            }
        };
        let mut state = self.state.lock();
        state.trucks.insert(
            env.from,
            TruckSighting {
                row: payload.row,
                col: payload.col,
                water: payload.water,
                max_water: payload.max_water,
                task: payload.task,
                last_seen: Utc::now(),
            },
        );
    }

    fn on_coordination(&self, env: Envelope) {
        let payload: ExtinguishedPayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed coordination message");
                return;
            }
        };
        if !payload.is_extinguished() {
            return;
        }
        info!(
            row = payload.target_row,
            col = payload.target_col,
            by = %env.from,
            water_used = payload.water_used,
            "fire extinguished"
        );
        self.state
            .lock()
            .grid
            .set_cell(payload.target_row, payload.target_col, Cell::extinguished());
    }

    /// Advance fire spread and announce the newly lit cells.
    fn step_spread(&self, rng: &mut StdRng) {
        let spread = self.state.lock().grid.step_fires(rng);
        for fire in spread {
            debug!(row = fire.row, col = fire.col, "fire spread");
            let payload = FireAnnouncePayload::new(fire.id(), fire.intensity, None);
            if let Err(err) = self.bus.publish_payload(
                channel::FIRE_ALERTS,
                MessageKind::FireAnnounce,
                &payload,
            ) {
                warn!(error = %err, "failed to announce spread fire");
            }
        }
    }

    /// The current view: the grid plus one roster line per truck.
    pub fn render(&self) -> String {
        let state = self.state.lock();

        let mut overlay = HashMap::new();
        for sighting in state.trucks.values() {
            overlay.insert((sighting.row, sighting.col), 'T');
        }

        let mut view = state.grid.render(&overlay);
        for (id, truck) in &state.trucks {
            view.push_str(&format!(
                "{} at ({},{}) water {}/{} task {} seen {}\n",
                id,
                truck.row,
                truck.col,
                truck.water,
                truck.max_water,
                truck.task,
                truck.last_seen.format("%H:%M:%S"),
            ));
        }
        view
    }

    /// The latest sightings, keyed by truck id.
    pub fn roster(&self) -> BTreeMap<AgentId, TruckSighting> {
        self.state.lock().trucks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use brigade_core::LamportClock;
    use brigade_net::MemoryHub;

    fn fleet() -> (Arc<Observer>, Arc<dyn Bus>) {
        let hub = MemoryHub::new();
        let obs_id = AgentId::new("OBS").unwrap();
        let obs_bus: Arc<dyn Bus> = Arc::new(hub.attach(
            obs_id.clone(),
            Arc::new(LamportClock::new()),
        ));
        let observer = Observer::new(obs_id, ObserverConfig::default(), obs_bus);

        let truck_bus: Arc<dyn Bus> = Arc::new(hub.attach(
            AgentId::new("T1").unwrap(),
            Arc::new(LamportClock::new()),
        ));
        (observer, truck_bus)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn status_updates_the_roster() {
        let (observer, truck_bus) = fleet();
        observer.clone().start().unwrap();

        truck_bus
            .publish_payload(
                channel::TRUCK_STATUS,
                MessageKind::TruckStatus,
                &TruckStatusPayload {
                    row: 3,
                    col: 4,
                    water: 20,
                    max_water: 50,
                    task: "idle".into(),
                },
            )
            .unwrap();
        settle().await;

        let roster = observer.roster();
        let sighting = roster.get(&AgentId::new("T1").unwrap()).unwrap();
        assert_eq!((sighting.row, sighting.col), (3, 4));
        assert_eq!(sighting.water, 20);

        let view = observer.render();
        assert!(view.contains('T'));
        assert!(view.contains("T1 at (3,4) water 20/50 task idle"));
    }

    #[tokio::test]
    async fn announcements_and_extinguish_events_update_the_grid() {
        let (observer, truck_bus) = fleet();
        observer.clone().start().unwrap();

        truck_bus
            .publish_payload(
                channel::FIRE_ALERTS,
                MessageKind::FireAnnounce,
                &FireAnnouncePayload::new(brigade_core::FireId::new(2, 2), 3, None),
            )
            .unwrap();
        settle().await;
        assert!(observer.render().contains('F'));

        truck_bus
            .publish_payload(
                channel::COORDINATION,
                MessageKind::Coordination,
                &ExtinguishedPayload::new(2, 2, 14),
            )
            .unwrap();
        settle().await;

        let view = observer.render();
        assert!(!view.contains('F'));
        assert!(view.contains('E'));
    }

    #[tokio::test]
    async fn legacy_alert_shape_is_accepted() {
        let (observer, truck_bus) = fleet();
        observer.clone().start().unwrap();

        truck_bus
            .publish(
                channel::FIRE_ALERTS,
                MessageKind::FireAlert,
                serde_json::json!({ "row": 7, "col": 8, "intensity": 2 }),
            )
            .unwrap();
        settle().await;

        assert!(observer.render().contains('F'));
    }
}
