/// Monitoring Events
///
/// Agents and matchers publish an `AgentEvent` for every bid and price they
/// send or receive and for every session they gain or lose. Observers are
/// plain trait objects registered on an `ObservableAgent`; delivery is
/// synchronous and happens outside the observer-list lock.
///
/// Events are serde records, so an observer can persist or ship them in any
/// format; `TracingObserver` writes them to the log.

use crate::domain::{Bid, PriceUpdate};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEvent {
    pub cluster_id: String,
    pub agent_id: String,
    pub session_id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    IncomingBid { from_agent_id: String, bid_number: u64, demand: Vec<f64> },
    #[serde(rename_all = "camelCase")]
    OutgoingBid { bid_number: u64, demand: Vec<f64> },
    #[serde(rename_all = "camelCase")]
    IncomingPrice { price: f64, bid_number: u64 },
    #[serde(rename_all = "camelCase")]
    OutgoingPrice { price: f64, bid_number: u64 },
    Connected,
    Disconnected,
    #[serde(rename_all = "camelCase")]
    PeakShaving { price_in: f64, price_out: f64 },
}

impl EventKind {
    pub fn incoming_bid(from_agent_id: &str, bid: &Bid, bid_number: u64) -> Self {
        EventKind::IncomingBid {
            from_agent_id: from_agent_id.to_string(),
            bid_number,
            demand: bid.demand().to_vec(),
        }
    }

    pub fn outgoing_bid(bid: &Bid, bid_number: u64) -> Self {
        EventKind::OutgoingBid {
            bid_number,
            demand: bid.demand().to_vec(),
        }
    }

    pub fn incoming_price(update: &PriceUpdate) -> Self {
        EventKind::IncomingPrice {
            price: update.price().value(),
            bid_number: update.bid_number(),
        }
    }

    pub fn outgoing_price(update: &PriceUpdate) -> Self {
        EventKind::OutgoingPrice {
            price: update.price().value(),
            bid_number: update.bid_number(),
        }
    }
}

pub trait Observer: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

/// Observer list owned by each agent/matcher
#[derive(Default)]
pub struct ObservableAgent {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl ObservableAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn Observer>) {
        self.observers
            .write()
            .retain(|o| !std::ptr::addr_eq(Arc::as_ptr(o), Arc::as_ptr(observer)));
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.read().is_empty()
    }

    pub fn publish(&self, event: AgentEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }
}

/// Writes every event as one structured log line
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_event(&self, event: &AgentEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(agent_id = %event.agent_id, session_id = %event.session_id, event = %json, "agent event"),
            Err(e) => info!(agent_id = %event.agent_id, "agent event not serializable: {}", e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::CollectingObserver;
    use super::*;
    use crate::domain::{MarketBasis, Price};

    fn event(kind: EventKind) -> AgentEvent {
        AgentEvent {
            cluster_id: "DefaultCluster".into(),
            agent_id: "auctioneer".into(),
            session_id: "device-1:auctioneer".into(),
            timestamp: 1_700_000_000_000,
            kind,
        }
    }

    #[test]
    fn test_event_json_round_trip() {
        let mb = MarketBasis::new("electricity", "EUR", 3, 0.0, 1.0).unwrap();
        let bid = Bid::new(&mb, vec![0.3, 0.1, -0.7]).unwrap();
        let original = event(EventKind::incoming_bid("device-1", &bid, 12));

        let json = serde_json::to_string(&original).unwrap();
        assert!(json.contains("\"eventType\":\"INCOMING_BID\""));
        assert!(json.contains("\"fromAgentId\":\"device-1\""));
        let decoded: AgentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);

        let price = event(EventKind::outgoing_price(&PriceUpdate::new(Price::new(&mb, 0.5), 12)));
        let decoded: AgentEvent = serde_json::from_str(&serde_json::to_string(&price).unwrap()).unwrap();
        assert_eq!(decoded, price);

        let connected = event(EventKind::Connected);
        let decoded: AgentEvent = serde_json::from_str(&serde_json::to_string(&connected).unwrap()).unwrap();
        assert_eq!(decoded, connected);
    }

    #[test]
    fn test_observers_receive_events() {
        let observable = ObservableAgent::new();
        let collector = Arc::new(CollectingObserver::default());
        let as_observer: Arc<dyn Observer> = collector.clone();

        observable.add_observer(as_observer.clone());
        observable.add_observer(Arc::new(TracingObserver));
        observable.publish(event(EventKind::Connected));
        assert_eq!(collector.events.lock().len(), 1);

        observable.remove_observer(&as_observer);
        observable.publish(event(EventKind::Disconnected));
        assert_eq!(collector.events.lock().len(), 1);
        assert!(observable.has_observers());
    }
}
