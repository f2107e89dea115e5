//! Ricart-Agrawala mutual exclusion for the shared refill critical section.
//!
//! The fleet's water source admits one truck at a time, enforced purely with
//! broadcast messages: a requester stamps its request with its Lamport clock
//! and may enter once every known peer has replied. A peer holding the
//! section, or requesting with higher priority, defers its reply until it
//! exits. Priority is the lexicographic order on `(request_ts, agent_id)`,
//! so contention resolves the same way everywhere.
//!
//! [`RefillMutex`] is a pure state machine: handlers feed it received
//! messages and it returns the [`RefillAction`]s to perform. Peers are
//! learned from status heartbeats and never evicted; a crashed peer can
//! therefore block a requester forever, which is an accepted limit of this
//! design.

use std::collections::{BTreeSet, HashSet};

use brigade_core::AgentId;

/// Where an agent stands with respect to the refill critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaState {
    /// Not interested in refilling.
    Idle,
    /// Waiting on replies from every known peer.
    Requesting,
    /// Sole holder of the critical section, fleet-wide.
    Held,
}

impl std::fmt::Display for RaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaState::Idle => write!(f, "idle"),
            RaState::Requesting => write!(f, "requesting"),
            RaState::Held => write!(f, "held"),
        }
    }
}

/// An action the protocol asks the caller to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefillAction {
    /// Publish a refill request stamped with `ts`.
    BroadcastRequest { ts: u64 },
    /// Publish a reply releasing `to` to proceed.
    Reply { to: AgentId },
    /// The critical section is ours: refill now, then call
    /// [`RefillMutex::exit`].
    EnterCs,
    /// Publish a release notification.
    Release,
}

/// The per-agent Ricart-Agrawala engine.
#[derive(Debug)]
pub struct RefillMutex {
    self_id: AgentId,
    state: RaState,
    my_request_ts: u64,
    replies: HashSet<AgentId>,
    deferred: BTreeSet<AgentId>,
    peers: BTreeSet<AgentId>,
}

impl RefillMutex {
    /// Create an engine for one agent, with no peers known yet.
    pub fn new(self_id: AgentId) -> Self {
        Self {
            self_id,
            state: RaState::Idle,
            my_request_ts: 0,
            replies: HashSet::new(),
            deferred: BTreeSet::new(),
            peers: BTreeSet::new(),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> RaState {
        self.state
    }

    /// The timestamp of the outstanding request, if any.
    pub fn request_ts(&self) -> u64 {
        self.my_request_ts
    }

    /// Peers discovered so far.
    pub fn peers(&self) -> &BTreeSet<AgentId> {
        &self.peers
    }

    /// Requests currently deferred.
    pub fn deferred(&self) -> &BTreeSet<AgentId> {
        &self.deferred
    }

    /// Learn a peer from a status heartbeat. Self is never a peer.
    ///
    /// Returns `true` when the peer is new.
    pub fn observe_peer(&mut self, peer: &AgentId) -> bool {
        if *peer == self.self_id {
            return false;
        }
        self.peers.insert(peer.clone())
    }

    /// Start requesting the critical section with the given clock stamp.
    ///
    /// A request while not idle is a no-op (prevents double-request). With
    /// no peers known the request is granted vacuously and the returned
    /// actions end in [`RefillAction::EnterCs`].
    pub fn request(&mut self, ts: u64) -> Vec<RefillAction> {
        if self.state != RaState::Idle {
            return Vec::new();
        }
        self.state = RaState::Requesting;
        self.my_request_ts = ts;
        self.replies.clear();

        let mut actions = vec![RefillAction::BroadcastRequest { ts }];
        if self.has_all_replies() {
            self.state = RaState::Held;
            actions.push(RefillAction::EnterCs);
        }
        actions
    }

    /// Handle a refill request from a peer.
    ///
    /// Defers while holding the section, or while requesting with higher
    /// priority; replies immediately otherwise.
    pub fn on_request(&mut self, from: &AgentId, ts: u64) -> Vec<RefillAction> {
        let defer = match self.state {
            RaState::Held => true,
            RaState::Requesting => (self.my_request_ts, &self.self_id) < (ts, from),
            RaState::Idle => false,
        };

        if defer {
            self.deferred.insert(from.clone());
            Vec::new()
        } else {
            vec![RefillAction::Reply { to: from.clone() }]
        }
    }

    /// Handle a reply from a peer.
    ///
    /// Once every known peer has replied the section is ours and the
    /// returned actions contain [`RefillAction::EnterCs`].
    pub fn on_reply(&mut self, from: &AgentId) -> Vec<RefillAction> {
        if self.state != RaState::Requesting {
            return Vec::new();
        }
        self.replies.insert(from.clone());

        if self.has_all_replies() {
            self.state = RaState::Held;
            vec![RefillAction::EnterCs]
        } else {
            Vec::new()
        }
    }

    /// Leave the critical section after refilling.
    ///
    /// Publishes a release and flushes every deferred reply, in id order.
    pub fn exit(&mut self) -> Vec<RefillAction> {
        if self.state != RaState::Held {
            return Vec::new();
        }
        self.state = RaState::Idle;

        let mut actions = vec![RefillAction::Release];
        for peer in std::mem::take(&mut self.deferred) {
            actions.push(RefillAction::Reply { to: peer });
        }
        actions
    }

    /// Handle a release from a peer.
    ///
    /// Releases are informational: deferred replies are already flushed at
    /// the holder's exit. A deferral that somehow survived (late joiner) is
    /// flushed here so the requester converges.
    pub fn on_release(&mut self, from: &AgentId) -> Vec<RefillAction> {
        if self.deferred.remove(from) {
            vec![RefillAction::Reply { to: from.clone() }]
        } else {
            Vec::new()
        }
    }

    fn has_all_replies(&self) -> bool {
        self.peers.iter().all(|peer| self.replies.contains(peer))
    }
}
