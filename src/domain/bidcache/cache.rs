/// Bid Cache - Latest Bid per Agent with Memoized Aggregation
///
/// The cache keeps the most recent `BidUpdate` of every agent for one market
/// basis and hands out the aggregate of all of them on demand.
///
/// ## Concurrency
/// - Writers take the bid-map write lock only for the insert/remove and bump
///   the write generation while holding it
/// - `aggregate()` first compares the generation against the memoized
///   snapshot (one atomic load); a clean cache returns the same `Arc`
/// - A dirty cache is rebuilt by one caller at a time: the bid map is cloned
///   under a read lock, folded outside any lock, then published together with
///   the generation it was read at
///
/// Callers therefore only ever see complete `AggregatedBid`s, and concurrent
/// `aggregate()` calls on the same generation converge on one snapshot.
///
/// ## Timeout
/// A cache built with `with_timeout` stamps each update with the time source
/// and `evict_expired()` drops bids older than the timeout.

use super::aggregated_bid::{AggregatedBid, AggregatedBidBuilder};
use crate::domain::market_basis::MarketBasis;
use crate::domain::price::BidUpdate;
use crate::domain::validation::{BidValidator, ValidationError};
use crate::shared::clock::TimeSource;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CachedBid {
    update: BidUpdate,
    received_at: u64,
}

struct Snapshot {
    generation: u64,
    aggregated: Arc<AggregatedBid>,
}

struct Expiry {
    timeout_millis: u64,
    clock: Arc<dyn TimeSource>,
}

pub struct BidCache {
    market_basis: MarketBasis,
    bids: RwLock<HashMap<String, CachedBid>>,
    /// 每次写入递增
    generation: AtomicU64,
    snapshot: RwLock<Option<Snapshot>>,
    rebuild_lock: Mutex<()>,
    aggregate_counter: AtomicU64,
    expiry: Option<Expiry>,
}

impl BidCache {
    pub fn new(market_basis: &MarketBasis) -> Self {
        Self {
            market_basis: market_basis.clone(),
            bids: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            aggregate_counter: AtomicU64::new(0),
            expiry: None,
        }
    }

    /// Cache whose bids expire `timeout` after they were stored
    pub fn with_timeout(
        market_basis: &MarketBasis,
        timeout: Duration,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let mut cache = Self::new(market_basis);
        cache.expiry = Some(Expiry {
            timeout_millis: timeout.as_millis() as u64,
            clock,
        });
        cache
    }

    pub fn market_basis(&self) -> &MarketBasis {
        &self.market_basis
    }

    /// Stores (or with `None` removes) the bid of an agent.
    ///
    /// A bid for another market basis is rejected and leaves the cache as it
    /// was.
    pub fn update_agent_bid(
        &self,
        agent_id: &str,
        update: Option<BidUpdate>,
    ) -> Result<(), ValidationError> {
        let Some(update) = update else {
            self.remove_bid_of_agent(agent_id);
            return Ok(());
        };
        BidValidator::new(&self.market_basis).validate_market_basis(update.bid().market_basis())?;

        let received_at = self
            .expiry
            .as_ref()
            .map_or(0, |e| e.clock.current_time_millis());

        let mut bids = self.bids.write();
        bids.insert(agent_id.to_string(), CachedBid { update, received_at });
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Removes the bid of an agent; removing an unknown agent is a no-op
    pub fn remove_bid_of_agent(&self, agent_id: &str) -> Option<BidUpdate> {
        let mut bids = self.bids.write();
        let removed = bids.remove(agent_id)?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Some(removed.update)
    }

    /// Drops every bid older than the configured timeout.
    ///
    /// Returns the ids of the agents whose bids were evicted.
    pub fn evict_expired(&self) -> Vec<String> {
        let Some(expiry) = &self.expiry else {
            return Vec::new();
        };
        let now = expiry.clock.current_time_millis();

        let mut bids = self.bids.write();
        let expired: Vec<String> = bids
            .iter()
            .filter(|(_, cached)| now.saturating_sub(cached.received_at) > expiry.timeout_millis)
            .map(|(agent_id, _)| agent_id.clone())
            .collect();
        for agent_id in &expired {
            bids.remove(agent_id);
        }
        if !expired.is_empty() {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        expired
    }

    /// Current aggregate of all cached bids
    pub fn aggregate(&self) -> Arc<AggregatedBid> {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(aggregated) = self.memoized(generation) {
            return aggregated;
        }
        self.rebuild()
    }

    /// Last published aggregate without triggering a rebuild
    pub fn last_aggregate(&self) -> Option<Arc<AggregatedBid>> {
        self.snapshot.read().as_ref().map(|s| s.aggregated.clone())
    }

    pub fn bid_of(&self, agent_id: &str) -> Option<BidUpdate> {
        self.bids.read().get(agent_id).map(|c| c.update.clone())
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.bids.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.bids.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.read().is_empty()
    }

    fn memoized(&self, generation: u64) -> Option<Arc<AggregatedBid>> {
        let snapshot = self.snapshot.read();
        match snapshot.as_ref() {
            Some(s) if s.generation == generation => Some(s.aggregated.clone()),
            _ => None,
        }
    }

    fn rebuild(&self) -> Arc<AggregatedBid> {
        let _guard = self.rebuild_lock.lock();

        // 其他线程可能刚刚完成重建
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(aggregated) = self.memoized(generation) {
            return aggregated;
        }

        let (generation, contributions) = {
            let bids = self.bids.read();
            let generation = self.generation.load(Ordering::Acquire);
            let contributions: Vec<(String, BidUpdate)> = bids
                .iter()
                .map(|(agent_id, cached)| (agent_id.clone(), cached.update.clone()))
                .collect();
            (generation, contributions)
        };

        let mut builder = AggregatedBidBuilder::new(&self.market_basis);
        for (agent_id, update) in &contributions {
            builder.add_agent_bid(agent_id, update);
        }
        let number = self.aggregate_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let aggregated = Arc::new(builder.build(number));

        *self.snapshot.write() = Some(Snapshot {
            generation,
            aggregated: aggregated.clone(),
        });
        aggregated
    }
}
