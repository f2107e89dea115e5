//! End-to-end coordination scenarios over the in-process bus.
//!
//! Every test runs real trucks: live subscriptions, live bid windows, live
//! motion ticks. Timers are shortened so a scenario settles in well under a
//! second.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use brigade_agent::{Task, Truck, TruckConfig};
use brigade_coord::RaState;
use brigade_core::{AgentId, FireId, Grid, LamportClock};
use brigade_net::{
    channel, BidDecisionPayload, Bus, BusExt, Envelope, ExtinguishedPayload,
    FireAnnouncePayload, Handler, MemoryHub, MessageKind,
};

fn fast_config() -> TruckConfig {
    TruckConfig {
        heartbeat_interval: Duration::from_millis(100),
        motion_interval: Duration::from_millis(40),
        bid_window: Duration::from_millis(150),
        ..TruckConfig::default()
    }
}

fn spawn_truck(hub: &MemoryHub, id: &str, config: TruckConfig) -> Arc<Truck> {
    let id = AgentId::new(id).unwrap();
    let clock = Arc::new(LamportClock::new());
    let bus = Arc::new(hub.attach(id.clone(), Arc::clone(&clock)));
    let truck = Truck::new(id, config, clock, bus);
    truck.clone().start().unwrap();
    truck
}

/// Record all traffic on the given channels through a silent bus handle.
fn watch(hub: &MemoryHub, channels: &[&str]) -> Arc<Mutex<Vec<(String, Envelope)>>> {
    let bus = hub.attach(
        AgentId::new("WATCH").unwrap(),
        Arc::new(LamportClock::new()),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in channels {
        let sink = Arc::clone(&seen);
        let channel_name = name.to_string();
        let handler: Handler = Arc::new(move |env| {
            sink.lock().push((channel_name.clone(), env));
        });
        bus.subscribe(name, handler).unwrap();
    }
    seen
}

fn on_channel<'a>(
    seen: &'a [(String, Envelope)],
    channel_name: &str,
) -> impl Iterator<Item = &'a Envelope> + 'a {
    let channel_name = channel_name.to_string();
    seen.iter()
        .filter(move |(name, _)| *name == channel_name)
        .map(|(_, env)| env)
}

/// Announce a fire as an external world process would.
fn announce_fire(hub: &MemoryHub, fire: FireId, intensity: u32) {
    let bus = hub.attach(
        AgentId::new("WORLD").unwrap(),
        Arc::new(LamportClock::new()),
    );
    bus.publish_payload(
        channel::FIRE_ALERTS,
        MessageKind::FireAnnounce,
        &FireAnnouncePayload::new(fire, intensity, None),
    )
    .unwrap();
}

#[tokio::test]
async fn uncontested_assignment_extinguishes_the_fire() {
    let hub = MemoryHub::new();
    let near = spawn_truck(&hub, "T1", fast_config()); // spawns at (0,0)
    let far = spawn_truck(&hub, "T2", fast_config()); // spawns at (19,19)
    let seen = watch(&hub, &[channel::FIRE_DECISION, channel::COORDINATION]);

    let fire = FireId::new(2, 2);
    announce_fire(&hub, fire, 2);
    tokio::time::sleep(Duration::from_millis(800)).await;

    // Exactly one decision, announced by the winner itself (T1 < T2).
    let seen = seen.lock();
    let decisions: Vec<&Envelope> = on_channel(&seen, channel::FIRE_DECISION).collect();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].from.as_str(), "T1");
    let decision: BidDecisionPayload = decisions[0].decode_payload().unwrap();
    assert_eq!(decision.winner.as_str(), "T1");
    assert_eq!(decision.fire(), fire);

    // The winner walked the four-step Manhattan path and put the fire out.
    assert_eq!(near.position(), (2, 2));
    assert_eq!(near.task(), Task::Idle);
    assert_eq!(near.water(), 30 - Grid::full_cost(2));

    let extinguished: Vec<ExtinguishedPayload> = on_channel(&seen, channel::COORDINATION)
        .map(|env| env.decode_payload::<ExtinguishedPayload>().unwrap())
        .filter(|p| p.is_extinguished())
        .collect();
    assert_eq!(extinguished.len(), 1);
    assert_eq!(
        (extinguished[0].target_row, extinguished[0].target_col),
        (2, 2)
    );
    assert_eq!(extinguished[0].water_used, Grid::full_cost(2));

    // The loser went back to idle and never moved.
    assert_eq!(far.position(), (19, 19));
    assert_eq!(far.assigned_fire(), None);
    assert_eq!(far.task(), Task::Idle);
}

#[tokio::test]
async fn one_decision_per_window_across_the_fleet() {
    let hub = MemoryHub::new();
    let _t1 = spawn_truck(&hub, "T1", fast_config());
    let _t3 = spawn_truck(&hub, "T3", fast_config());
    let _t5 = spawn_truck(&hub, "T5", fast_config());
    let seen = watch(&hub, &[channel::FIRE_DECISION]);

    announce_fire(&hub, FireId::new(0, 5), 2);
    tokio::time::sleep(Duration::from_millis(500)).await;

    let seen = seen.lock();
    let decisions: Vec<&Envelope> = on_channel(&seen, channel::FIRE_DECISION).collect();
    assert_eq!(decisions.len(), 1, "the fleet double-announced a decision");
    // T1 is both the closest bidder and the smallest id.
    assert_eq!(decisions[0].from.as_str(), "T1");
}

#[tokio::test]
async fn insufficient_water_refills_instead_of_bidding() {
    let hub = MemoryHub::new();
    let config = TruckConfig {
        initial_water: 1,
        ..fast_config()
    };
    let truck = spawn_truck(&hub, "T1", config);
    let seen = watch(
        &hub,
        &[
            channel::FIRE_BIDS,
            channel::FIRE_DECISION,
            channel::WATER_REQ,
            channel::WATER_RELEASE,
        ],
    );

    announce_fire(&hub, FireId::new(3, 3), 3);
    tokio::time::sleep(Duration::from_millis(400)).await;

    let seen = seen.lock();
    assert_eq!(on_channel(&seen, channel::FIRE_BIDS).count(), 0);
    assert_eq!(on_channel(&seen, channel::FIRE_DECISION).count(), 0);
    assert_eq!(on_channel(&seen, channel::WATER_REQ).count(), 1);

    // Alone in the fleet the request grants vacuously: tank refilled,
    // section released.
    assert_eq!(on_channel(&seen, channel::WATER_RELEASE).count(), 1);
    assert_eq!(truck.water(), 50);
    assert_eq!(truck.ra_state(), RaState::Idle);
    assert_eq!(truck.task(), Task::Idle);
}

#[tokio::test]
async fn concurrent_refills_serialize_without_double_entry() {
    let hub = MemoryHub::new();
    let config_a = TruckConfig {
        initial_water: 5,
        ..fast_config()
    };
    let config_b = TruckConfig {
        initial_water: 6,
        ..fast_config()
    };
    let a = spawn_truck(&hub, "T1", config_a);
    let b = spawn_truck(&hub, "T2", config_b);
    let seen = watch(&hub, &[channel::WATER_RELEASE]);

    // Let the heartbeats introduce the trucks to each other first.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.peer_count(), 1);
    assert_eq!(b.peer_count(), 1);

    // Sample both protocol states while the contention plays out.
    let violations = Arc::new(Mutex::new(0u32));
    let sampler = {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        let violations = Arc::clone(&violations);
        tokio::spawn(async move {
            loop {
                if a.ra_state() == RaState::Held && b.ra_state() == RaState::Held {
                    *violations.lock() += 1;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    };

    // A fire neither truck can afford sends both to the water source.
    announce_fire(&hub, FireId::new(9, 9), 40);
    tokio::time::sleep(Duration::from_millis(600)).await;
    sampler.abort();

    assert_eq!(*violations.lock(), 0, "both trucks held the refill section");
    assert_eq!(a.water(), 50);
    assert_eq!(b.water(), 50);
    assert_eq!(a.ra_state(), RaState::Idle);
    assert_eq!(b.ra_state(), RaState::Idle);

    let seen = seen.lock();
    assert_eq!(on_channel(&seen, channel::WATER_RELEASE).count(), 2);
}

#[tokio::test]
async fn reignition_reopens_the_auction() {
    let hub = MemoryHub::new();
    let truck = spawn_truck(&hub, "T1", fast_config());
    let seen = watch(&hub, &[channel::COORDINATION]);

    let fire = FireId::new(0, 1);
    announce_fire(&hub, fire, 1);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(truck.position(), (0, 1));
    assert_eq!(truck.water(), 30 - Grid::full_cost(1));

    // The same cell catches fire again: a fresh window, a fresh assignment.
    announce_fire(&hub, fire, 1);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(truck.water(), 30 - 2 * Grid::full_cost(1));

    let seen = seen.lock();
    let extinguished = on_channel(&seen, channel::COORDINATION)
        .map(|env| env.decode_payload::<ExtinguishedPayload>().unwrap())
        .filter(|p| p.is_extinguished())
        .count();
    assert_eq!(extinguished, 2);
}

#[tokio::test]
async fn extinguish_event_clears_a_stale_assignment() {
    let hub = MemoryHub::new();
    let config = TruckConfig {
        // Slow motion: the fire gets reported out before arrival.
        motion_interval: Duration::from_millis(400),
        ..fast_config()
    };
    let truck = spawn_truck(&hub, "T1", config);

    let fire = FireId::new(10, 10);
    announce_fire(&hub, fire, 2);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(truck.assigned_fire(), Some(fire));

    // Another agent reports the fire out while we are still en route.
    let world = hub.attach(
        AgentId::new("WORLD").unwrap(),
        Arc::new(LamportClock::new()),
    );
    world
        .publish_payload(
            channel::COORDINATION,
            MessageKind::Coordination,
            &ExtinguishedPayload::new(fire.x, fire.y, 6),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(truck.assigned_fire(), None);
    assert_eq!(truck.task(), Task::Idle);
    // Water untouched: nothing was extinguished by us.
    assert_eq!(truck.water(), 30);
}

#[tokio::test]
async fn heartbeats_build_the_peer_set() {
    let hub = MemoryHub::new();
    let a = spawn_truck(&hub, "T1", fast_config());
    let b = spawn_truck(&hub, "T2", fast_config());
    let c = spawn_truck(&hub, "T3", fast_config());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(a.peer_count(), 2);
    assert_eq!(b.peer_count(), 2);
    assert_eq!(c.peer_count(), 2);
}
