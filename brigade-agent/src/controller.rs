//! The truck controller: one agent's state machine.
//!
//! A truck reacts to bus traffic (announcements, bids, decisions, extinguish
//! events, refill protocol messages) and runs two periodic loops: a status
//! heartbeat and, while assigned, a motion/extinguish tick. All mutable
//! state sits behind a single mutex; handlers take it briefly and never
//! publish-blockingly or reentrantly.
//!
//! Failure semantics are silent tolerance: malformed messages are logged and
//! dropped, lost messages are reconciled by later traffic, and only the
//! initial bus connect is fatal (handled by the process entry point).

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use brigade_coord::{AuctionBook, Bid, RaState, RefillAction, RefillMutex};
use brigade_core::{AgentId, Cell, CellState, FireId, Grid, LamportClock};
use brigade_net::{
    channel, BidDecisionPayload, BidPayload, Bus, BusError, BusExt, Envelope,
    ExtinguishedPayload, FireAnnouncePayload, MessageKind, TruckStatusPayload,
    WaterReleasePayload, WaterReplyPayload, WaterReqPayload,
};

use crate::config::{spawn_position, TruckConfig};

/// What the truck is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Nothing to do.
    Idle,
    /// Bid published, waiting on a decision.
    Bidding,
    /// Assigned and moving toward the fire.
    EnRoute(FireId),
    /// On the fire cell, applying water.
    Extinguishing(FireId),
    /// Waiting on, or inside, the refill critical section.
    Refilling,
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Idle => write!(f, "idle"),
            Task::Bidding => write!(f, "bidding"),
            Task::EnRoute(_) => write!(f, "en_route"),
            Task::Extinguishing(_) => write!(f, "extinguishing"),
            Task::Refilling => write!(f, "refilling"),
        }
    }
}

/// One step toward a target on the open Manhattan grid.
///
/// Vertically preferred: when the row gap is at least the column gap, the
/// row advances. The result either reduces the Manhattan distance by one or
/// is the position itself when already on target.
pub fn step_toward(row: i32, col: i32, target_row: i32, target_col: i32) -> (i32, i32) {
    let dr = (target_row - row).signum();
    let dc = (target_col - col).signum();
    if (target_row - row).abs() >= (target_col - col).abs() && dr != 0 {
        (row + dr, col)
    } else if dc != 0 {
        (row, col + dc)
    } else {
        (row, col)
    }
}

pub(crate) struct TruckState {
    pub(crate) row: i32,
    pub(crate) col: i32,
    pub(crate) water: u32,
    pub(crate) task: Task,
    pub(crate) assigned: Option<FireId>,
    pub(crate) grid: Grid,
    pub(crate) auction: AuctionBook,
    pub(crate) refill: RefillMutex,
    pub(crate) last_fire_seen: Instant,
}

/// An autonomous firefighting truck.
pub struct Truck {
    id: AgentId,
    pub(crate) config: TruckConfig,
    clock: Arc<LamportClock>,
    pub(crate) bus: Arc<dyn Bus>,
    pub(crate) state: Mutex<TruckState>,
}

impl Truck {
    /// Create a truck. Position comes from the config override or the
    /// id-based spawn rule.
    pub fn new(
        id: AgentId,
        config: TruckConfig,
        clock: Arc<LamportClock>,
        bus: Arc<dyn Bus>,
    ) -> Arc<Self> {
        let (row, col) = config
            .start
            .unwrap_or_else(|| spawn_position(&id, config.grid_size));
        let state = TruckState {
            row,
            col,
            water: config.initial_water,
            task: Task::Idle,
            assigned: None,
            grid: Grid::with_size(config.grid_size),
            auction: AuctionBook::new(),
            refill: RefillMutex::new(id.clone()),
            last_fire_seen: Instant::now(),
        };
        Arc::new(Self {
            id,
            config,
            clock,
            bus,
            state: Mutex::new(state),
        })
    }

    /// Wire up subscriptions, announce ourselves, and start the heartbeat.
    pub fn start(self: Arc<Self>) -> Result<(), BusError> {
        let subscriptions: [(&str, fn(Arc<Truck>, Envelope)); 8] = [
            (channel::FIRE_ALERTS, Self::on_fire_announce),
            (channel::FIRE_BIDS, Self::on_bid),
            (channel::FIRE_DECISION, Self::on_decision),
            (channel::COORDINATION, Self::on_coordination),
            (channel::TRUCK_STATUS, Self::on_status),
            (channel::WATER_REQ, Self::on_water_req),
            (channel::WATER_REPLY, Self::on_water_reply),
            (channel::WATER_RELEASE, Self::on_water_release),
        ];
        for (name, handler) in subscriptions {
            let truck = Arc::clone(&self);
            self.bus
                .subscribe(name, Arc::new(move |env| handler(Arc::clone(&truck), env)))?;
        }

        {
            let state = self.state.lock();
            info!(
                id = %self.id,
                row = state.row,
                col = state.col,
                water = state.water,
                max_water = self.config.max_water,
                "truck on duty"
            );
        }
        self.publish_status();

        let truck = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = interval(truck.config.heartbeat_interval);
            loop {
                ticker.tick().await;
                truck.publish_status();
            }
        });

        Ok(())
    }

    /// This truck's identifier.
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Current position.
    pub fn position(&self) -> (i32, i32) {
        let state = self.state.lock();
        (state.row, state.col)
    }

    /// Current water level.
    pub fn water(&self) -> u32 {
        self.state.lock().water
    }

    /// Current task.
    pub fn task(&self) -> Task {
        self.state.lock().task
    }

    /// Current refill protocol state.
    pub fn ra_state(&self) -> RaState {
        self.state.lock().refill.state()
    }

    /// The fire this truck is committed to, if any.
    pub fn assigned_fire(&self) -> Option<FireId> {
        self.state.lock().assigned
    }

    /// Number of peers discovered from heartbeats.
    pub fn peer_count(&self) -> usize {
        self.state.lock().refill.peers().len()
    }

    // === Handlers ===

    fn on_fire_announce(self: Arc<Self>, env: Envelope) {
        let payload: FireAnnouncePayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed fire announcement");
                return;
            }
        };
        let fire = payload.fire();
        debug!(%fire, intensity = payload.intensity, from = %env.from, "fire announced");

        let mut bid = None;
        let mut opened = false;
        let mut refill_actions = Vec::new();
        {
            let mut state = self.state.lock();
            state
                .grid
                .set_cell(fire.x, fire.y, Cell::fire(payload.intensity));
            state.last_fire_seen = Instant::now();

            if state.assigned.is_some() {
                return;
            }

            if state.water >= payload.intensity {
                let score = fire.manhattan(state.row, state.col);
                let lamport = self.clock.tick();
                opened = state.auction.record(Bid {
                    fire,
                    bidder: self.id.clone(),
                    score,
                    lamport,
                });
                if state.task == Task::Idle {
                    state.task = Task::Bidding;
                }
                bid = Some(BidPayload {
                    fire_x: fire.x,
                    fire_y: fire.y,
                    bidder: self.id.clone(),
                    score,
                    lamport,
                });
            } else {
                info!(
                    water = state.water,
                    intensity = payload.intensity,
                    "insufficient water to bid, seeking refill"
                );
                refill_actions = self.start_refill_locked(&mut state);
            }
        }

        if let Some(payload) = bid {
            info!(%fire, score = payload.score, ts = payload.lamport, "bidding");
            if let Err(err) = self
                .bus
                .publish_payload(channel::FIRE_BIDS, MessageKind::Bid, &payload)
            {
                warn!(error = %err, "failed to publish bid");
            }
        }
        self.perform_refill_actions(refill_actions);
        if opened {
            self.arm_bid_window(fire);
        }
    }

    fn on_bid(self: Arc<Self>, env: Envelope) {
        let payload: BidPayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed bid");
                return;
            }
        };
        let fire = payload.fire();
        debug!(%fire, bidder = %payload.bidder, score = payload.score, "bid received");

        let opened = self.state.lock().auction.record(Bid {
            fire,
            bidder: payload.bidder,
            score: payload.score,
            lamport: payload.lamport,
        });
        if opened {
            self.arm_bid_window(fire);
        }
    }

    fn on_decision(self: Arc<Self>, env: Envelope) {
        let payload: BidDecisionPayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed decision");
                return;
            }
        };
        let fire = payload.fire();

        if payload.winner == self.id {
            info!(%fire, "assigned to fire");
            self.adopt_assignment(fire);
        } else {
            debug!(%fire, winner = %payload.winner, "assignment went elsewhere");
            let mut state = self.state.lock();
            if state.task == Task::Bidding {
                state.task = Task::Idle;
            }
        }
    }

    fn on_coordination(self: Arc<Self>, env: Envelope) {
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

        let fire = FireId::new(payload.target_row, payload.target_col);
        debug!(%fire, by = %env.from, "fire reported extinguished");

        let mut state = self.state.lock();
        state
            .grid
            .set_cell(fire.x, fire.y, Cell::extinguished());
        if state.assigned == Some(fire) {
            state.assigned = None;
            state.task = Task::Idle;
        }
    }

    fn on_status(self: Arc<Self>, env: Envelope) {
        if let Err(err) = env.decode_payload::<TruckStatusPayload>() {
            warn!(error = %err, "dropping malformed status");
            return;
        }
        let mut state = self.state.lock();
        if state.refill.observe_peer(&env.from) {
            debug!(peer = %env.from, "discovered peer");
        }
    }

    fn on_water_req(self: Arc<Self>, env: Envelope) {
        let payload: WaterReqPayload = match env.decode_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping malformed refill request");
                return;
            }
        };
        let actions = {
            let mut state = self.state.lock();
            state.refill.on_request(&env.from, payload.ts)
        };
        if actions.is_empty() {
            debug!(from = %env.from, ts = payload.ts, "deferring refill request");
        }
        self.perform_refill_actions(actions);
    }

    fn on_water_reply(self: Arc<Self>, env: Envelope) {
        let actions = {
            let mut state = self.state.lock();
            state.refill.on_reply(&env.from)
        };
        self.perform_refill_actions(actions);
    }

    fn on_water_release(self: Arc<Self>, env: Envelope) {
        let actions = {
            let mut state = self.state.lock();
            state.refill.on_release(&env.from)
        };
        self.perform_refill_actions(actions);
    }

    // === Auction plumbing ===

    fn arm_bid_window(self: Arc<Self>, fire: FireId) {
        tokio::spawn(async move {
            tokio::time::sleep(self.config.bid_window).await;
            self.close_auction(fire);
        });
    }

    fn close_auction(self: Arc<Self>, fire: FireId) {
        let outcome = self.state.lock().auction.close(fire);
        let Some(outcome) = outcome else {
            return;
        };
        debug!(
            %fire,
            winner = %outcome.winner,
            announcer = %outcome.announcer,
            bids = outcome.bids,
            "collection window closed"
        );

        if outcome.announcer != self.id {
            return;
        }

        let payload = BidDecisionPayload {
            fire_x: fire.x,
            fire_y: fire.y,
            winner: outcome.winner.clone(),
            lamport: self.clock.now(),
        };
        info!(%fire, winner = %outcome.winner, "announcing decision");
        if let Err(err) =
            self.bus
                .publish_payload(channel::FIRE_DECISION, MessageKind::BidDecision, &payload)
        {
            warn!(error = %err, "failed to publish decision");
        }

        // Loopback suppression means our own decision never comes back;
        // when the announcer is also the winner, adopt it directly.
        if outcome.winner == self.id {
            self.adopt_assignment(fire);
        }
    }

    fn adopt_assignment(self: Arc<Self>, fire: FireId) {
        {
            let mut state = self.state.lock();
            if state.assigned.is_some() {
                return;
            }
            state.assigned = Some(fire);
            state.task = Task::EnRoute(fire);
        }
        self.publish_status();
        self.spawn_assignment_loop(fire);
    }

    fn spawn_assignment_loop(self: Arc<Self>, fire: FireId) {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.motion_interval);
            loop {
                ticker.tick().await;
                if self.assignment_tick(fire) {
                    break;
                }
            }
        });
    }

    /// One motion/extinguish tick. Returns `true` when the assignment is
    /// finished.
    fn assignment_tick(&self, fire: FireId) -> bool {
        let mut extinguished = None;
        let mut changed = false;
        let mut refill_actions = Vec::new();
        let mut done = false;
        {
            let mut state = self.state.lock();
            if state.assigned != Some(fire) {
                return true;
            }

            if (state.row, state.col) != (fire.x, fire.y) {
                let (row, col) = step_toward(state.row, state.col, fire.x, fire.y);
                if (row, col) != (state.row, state.col) {
                    state.row = row;
                    state.col = col;
                    changed = true;
                    debug!(%fire, row, col, "moving toward fire");
                }
            } else if !matches!(state.task, Task::Extinguishing(_)) {
                state.task = Task::Extinguishing(fire);
                changed = true;
            } else {
                let cell = state.grid.cell(fire.x, fire.y);
                if cell.state == CellState::Fire && state.water > 0 {
                    let water = state.water;
                    let used = state.grid.extinguish(fire.x, fire.y, water);
                    state.water -= used;

                    if state.grid.cell(fire.x, fire.y).state == CellState::Extinguished {
                        info!(
                            %fire,
                            water_used = used,
                            water = state.water,
                            "fire extinguished"
                        );
                        extinguished = Some(ExtinguishedPayload::new(fire.x, fire.y, used));
                    } else {
                        // Could not afford the next intensity step. Drop the
                        // assignment so the refill protocol can run; the
                        // remaining fire is reconciled by later announcements.
                        info!(
                            %fire,
                            water_used = used,
                            water = state.water,
                            "ran low before the fire went out"
                        );
                    }
                } else if cell.state != CellState::Fire {
                    debug!(%fire, "fire already out on arrival");
                }

                state.assigned = None;
                state.task = Task::Idle;
                refill_actions = self.start_refill_locked(&mut state);
                changed = true;
                done = true;
            }
        }

        if let Some(payload) = extinguished {
            if let Err(err) =
                self.bus
                    .publish_payload(channel::COORDINATION, MessageKind::Coordination, &payload)
            {
                warn!(error = %err, "failed to publish extinguish event");
            }
        }
        if changed {
            self.publish_status();
        }
        self.perform_refill_actions(refill_actions);
        done
    }

    // === Refill plumbing ===

    fn start_refill_locked(&self, state: &mut TruckState) -> Vec<RefillAction> {
        if state.water > self.config.low_water_thresh || state.assigned.is_some() {
            return Vec::new();
        }
        let actions = state.refill.request(self.clock.tick());
        if !actions.is_empty() {
            state.task = Task::Refilling;
        }
        actions
    }

    fn perform_refill_actions(&self, actions: Vec<RefillAction>) {
        for action in actions {
            match action {
                RefillAction::BroadcastRequest { ts } => {
                    info!(ts, "requesting refill");
                    if let Err(err) = self.bus.publish_payload(
                        channel::WATER_REQ,
                        MessageKind::WaterReq,
                        &WaterReqPayload { ts },
                    ) {
                        warn!(error = %err, "failed to publish refill request");
                    }
                }
                RefillAction::Reply { to } => {
                    debug!(%to, "granting refill request");
                    if let Err(err) = self.bus.publish_payload(
                        channel::WATER_REPLY,
                        MessageKind::WaterReply,
                        &WaterReplyPayload {},
                    ) {
                        warn!(error = %err, "failed to publish refill reply");
                    }
                }
                RefillAction::EnterCs => {
                    let exit_actions = {
                        let mut state = self.state.lock();
                        state.water = self.config.max_water;
                        if state.task == Task::Refilling {
                            state.task = Task::Idle;
                        }
                        info!(water = state.water, "refilled at the water source");
                        state.refill.exit()
                    };
                    self.publish_status();
                    self.perform_refill_actions(exit_actions);
                }
                RefillAction::Release => {
                    debug!("leaving the refill section");
                    if let Err(err) = self.bus.publish_payload(
                        channel::WATER_RELEASE,
                        MessageKind::WaterRelease,
                        &WaterReleasePayload {},
                    ) {
                        warn!(error = %err, "failed to publish refill release");
                    }
                }
            }
        }
    }

    // === Status ===

    fn publish_status(&self) {
        let payload = {
            let state = self.state.lock();
            TruckStatusPayload {
                row: state.row,
                col: state.col,
                water: state.water,
                max_water: self.config.max_water,
                task: state.task.to_string(),
            }
        };
        if let Err(err) =
            self.bus
                .publish_payload(channel::TRUCK_STATUS, MessageKind::TruckStatus, &payload)
        {
            warn!(error = %err, "failed to publish status");
        }
    }
}
