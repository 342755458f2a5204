/// Aggregated Bid - Sum of Agent Bids with Provenance
///
/// An `AggregatedBid` is the element-wise sum of every contributing agent's
/// bid, together with the bid number each agent's contribution carried. The
/// provenance map is what lets a matcher answer each agent with the number of
/// the bid it actually sent.
///
/// Only `AggregatedBidBuilder` creates aggregated bids. The builder is
/// tolerant: contributions with another market basis, or a second
/// contribution for the same agent, are skipped rather than reported.

use crate::domain::bid::Bid;
use crate::domain::market_basis::MarketBasis;
use crate::domain::price::BidUpdate;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedBid {
    bid: Bid,
    agent_bid_references: HashMap<String, u64>,
    aggregate_number: u64,
}

impl AggregatedBid {
    /// The summed demand curve
    pub fn bid(&self) -> &Bid {
        &self.bid
    }

    pub fn market_basis(&self) -> &MarketBasis {
        self.bid.market_basis()
    }

    pub fn demand(&self) -> &[f64] {
        self.bid.demand()
    }

    /// agentId -> bid number of the contribution folded into this aggregate
    pub fn agent_bid_references(&self) -> &HashMap<String, u64> {
        &self.agent_bid_references
    }

    pub fn bid_number_of(&self, agent_id: &str) -> Option<u64> {
        self.agent_bid_references.get(agent_id).copied()
    }

    /// Sequence number assigned by the cache that built this aggregate
    pub fn aggregate_number(&self) -> u64 {
        self.aggregate_number
    }

    pub fn contributor_count(&self) -> usize {
        self.agent_bid_references.len()
    }
}

pub struct AggregatedBidBuilder {
    market_basis: MarketBasis,
    demand: Vec<f64>,
    agent_bid_references: HashMap<String, u64>,
}

impl AggregatedBidBuilder {
    pub fn new(market_basis: &MarketBasis) -> Self {
        Self {
            market_basis: market_basis.clone(),
            demand: vec![0.0; market_basis.price_steps()],
            agent_bid_references: HashMap::new(),
        }
    }

    /// Folds one agent's bid into the running sum.
    ///
    /// Returns `false` when the contribution was skipped.
    pub fn add_agent_bid(&mut self, agent_id: &str, update: &BidUpdate) -> bool {
        if update.bid().market_basis() != &self.market_basis {
            debug!(agent_id, "跳过市场基准不一致的出价");
            return false;
        }
        if self.agent_bid_references.contains_key(agent_id) {
            debug!(agent_id, "跳过同一代理的重复出价");
            return false;
        }

        for (sum, d) in self.demand.iter_mut().zip(update.bid().demand()) {
            *sum += d;
        }
        self.agent_bid_references
            .insert(agent_id.to_string(), update.bid_number());
        true
    }

    pub fn agent_bid(mut self, agent_id: &str, update: &BidUpdate) -> Self {
        self.add_agent_bid(agent_id, update);
        self
    }

    pub fn build(self, aggregate_number: u64) -> AggregatedBid {
        AggregatedBid {
            bid: Bid::from_sum(&self.market_basis, self.demand),
            agent_bid_references: self.agent_bid_references,
            aggregate_number,
        }
    }
}
