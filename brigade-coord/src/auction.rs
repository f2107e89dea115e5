//! Per-fire sealed-bid auctions with deterministic winner selection.
//!
//! Every agent collects the bids it sees for a fire during a bounded window,
//! then derives the winner locally: no arbiter, no extra round-trip. Two
//! rules make the outcome agree everywhere:
//!
//! - the winner minimizes the lexicographic key `(score, lamport, bidder)`
//!   over the collected bids;
//! - only the **announcer** - the smallest bidder id among the collected
//!   bids - publishes the decision, so at most one decision goes out per
//!   window when delivery holds.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use brigade_core::{AgentId, FireId};

/// A proposal to fight a fire.
///
/// `score` is the bidder's Manhattan distance to the fire at bid time; lower
/// is better. `lamport` is the bidder's clock at bid time and breaks score
/// ties; bidder ids break the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub fire: FireId,
    pub bidder: AgentId,
    pub score: u32,
    pub lamport: u64,
}

impl Bid {
    /// The tie-breaking sort key. Unique per bid because bidder ids are.
    fn key(&self) -> (u32, u64, &AgentId) {
        (self.score, self.lamport, &self.bidder)
    }

    fn cmp_key(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// The derived result of one fire's collection window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionOutcome {
    /// The fire that was auctioned.
    pub fire: FireId,
    /// The agent assigned to the fire.
    pub winner: AgentId,
    /// The agent elected to publish the decision.
    pub announcer: AgentId,
    /// How many bids were evaluated.
    pub bids: usize,
}

/// Local bid collection, one table per fire with an open window.
///
/// A table opens on the first bid seen for a fire (own or remote) and is
/// consumed when the window closes. A later announcement for the same
/// `FireId` opens a fresh table.
#[derive(Debug, Default)]
pub struct AuctionBook {
    tables: HashMap<FireId, Vec<Bid>>,
}

impl AuctionBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a bid.
    ///
    /// Returns `true` when this bid opened the fire's table, which is the
    /// caller's cue to arm the collection window timer.
    pub fn record(&mut self, bid: Bid) -> bool {
        let opened = !self.tables.contains_key(&bid.fire);
        self.tables.entry(bid.fire).or_default().push(bid);
        opened
    }

    /// Whether a collection window is open for the fire.
    pub fn is_open(&self, fire: FireId) -> bool {
        self.tables.contains_key(&fire)
    }

    /// The bids collected so far for a fire.
    pub fn bids_for(&self, fire: FireId) -> &[Bid] {
        self.tables.get(&fire).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Close the fire's window and derive the outcome.
    ///
    /// The table is consumed. Returns `None` when no window was open or no
    /// bids were collected, in which case no decision is published.
    pub fn close(&mut self, fire: FireId) -> Option<AuctionOutcome> {
        let bids = self.tables.remove(&fire)?;
        evaluate(fire, &bids)
    }
}

/// Derive the winner and announcer from a bid set.
///
/// Deterministic: the same bid multiset yields the same outcome on every
/// agent, regardless of arrival order.
pub fn evaluate(fire: FireId, bids: &[Bid]) -> Option<AuctionOutcome> {
    let winner = bids.iter().min_by(|a, b| a.cmp_key(b))?.bidder.clone();
    let announcer = bids.iter().map(|b| &b.bidder).min()?.clone();
    Some(AuctionOutcome {
        fire,
        winner,
        announcer,
        bids: bids.len(),
    })
}
