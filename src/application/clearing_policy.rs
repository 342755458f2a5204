/// Clearing Policies of the Auctioneer
///
/// The auctioneer always clears the bid a `ClearingPolicy` hands it. The
/// plain policy clears the aggregate of the cluster as is. The objective
/// policy first asks an external controller (`ObjectiveEndpoint`) for an extra
/// bid, folds it into the aggregate and tells the controller every published
/// price.

use super::endpoints::ObjectiveEndpoint;
use crate::domain::{AggregatedBid, Bid, Price};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

pub trait ClearingPolicy: Send + Sync {
    /// Bid to clear for this round
    fn prepare(&self, aggregated: &AggregatedBid) -> Bid;

    fn price_published(&self, _price: &Price) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainClearing;

impl ClearingPolicy for PlainClearing {
    fn prepare(&self, aggregated: &AggregatedBid) -> Bid {
        aggregated.bid().clone()
    }
}

/// Clearing steered by an objective agent; without one bound it behaves like
/// `PlainClearing`
#[derive(Default)]
pub struct ObjectiveClearing {
    objective: RwLock<Option<Arc<dyn ObjectiveEndpoint>>>,
}

impl ObjectiveClearing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, objective: Arc<dyn ObjectiveEndpoint>) {
        *self.objective.write() = Some(objective);
    }

    pub fn unbind(&self) {
        *self.objective.write() = None;
    }

    pub fn is_bound(&self) -> bool {
        self.objective.read().is_some()
    }

    fn current(&self) -> Option<Arc<dyn ObjectiveEndpoint>> {
        self.objective.read().clone()
    }
}

impl ClearingPolicy for ObjectiveClearing {
    fn prepare(&self, aggregated: &AggregatedBid) -> Bid {
        let base = aggregated.bid();
        let Some(objective) = self.current() else {
            return base.clone();
        };
        match objective.handle_aggregated_bid(base) {
            None => base.clone(),
            Some(extra) => base.aggregate(&extra).unwrap_or_else(|e| {
                warn!("目标代理出价被忽略: {}", e);
                base.clone()
            }),
        }
    }

    fn price_published(&self, price: &Price) {
        if let Some(objective) = self.current() {
            objective.notify_price_update(price);
        }
    }
}
