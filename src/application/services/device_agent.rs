/// Device Agent - In-Process Leaf Agent
///
/// The simplest `AgentEndpoint`: it owns no devices, it only numbers and sends
/// the bids its owner hands it and keeps the latest price addressed to them.
/// Used by the simulated cluster of the binary, by the load tools and by the
/// tests.
///
/// ## Bid Numbers
/// - Every session starts a fresh sequence at 1
/// - Publishing the same curve twice in a row sends nothing, unless the last
///   send is older than the refresh interval; matchers with a bid timeout
///   would otherwise forget a steady bid
/// - Sends are serialized, so bid `n + 1` never reaches the matcher before `n`
/// - A price answering an older bid than the last one sent is stale: it is
///   counted and dropped

use crate::application::endpoints::AgentEndpoint;
use crate::application::monitoring::{AgentEvent, EventKind, ObservableAgent, Observer};
use crate::application::session::Session;
use crate::domain::{Bid, BidUpdate, MarketBasis, PriceUpdate};
use crate::shared::clock::{SystemClock, TimeSource};
use crate::shared::error::{PowerMatcherError, Result};
use crate::shared::metrics::METRICS;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 相同出价的默认重发间隔，小于默认出价超时
pub const DEFAULT_BID_REFRESH: Duration = Duration::from_secs(60);

#[derive(Default)]
struct DeviceState {
    session: Option<Arc<Session>>,
    bid_number: u64,
    last_bid: Option<Bid>,
    /// 上次发送时间（毫秒）
    last_sent_at: u64,
    last_price: Option<PriceUpdate>,
    stale_prices: u64,
}

pub struct DeviceAgent {
    agent_id: String,
    desired_parent_id: String,
    state: Mutex<DeviceState>,
    /// 保证出价编号顺序与发送顺序一致
    send_lock: Mutex<()>,
    bid_refresh: Duration,
    observable: ObservableAgent,
    clock: Arc<dyn TimeSource>,
}

impl DeviceAgent {
    pub fn new(agent_id: impl Into<String>, desired_parent_id: impl Into<String>) -> Self {
        Self::with_clock(agent_id, desired_parent_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        agent_id: impl Into<String>,
        desired_parent_id: impl Into<String>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            desired_parent_id: desired_parent_id.into(),
            state: Mutex::new(DeviceState::default()),
            send_lock: Mutex::new(()),
            bid_refresh: DEFAULT_BID_REFRESH,
            observable: ObservableAgent::new(),
            clock,
        }
    }

    /// Interval after which an unchanged bid is sent again
    pub fn with_bid_refresh(mut self, refresh: Duration) -> Self {
        self.bid_refresh = refresh;
        self
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observable.add_observer(observer);
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.is_connected())
    }

    /// Market basis agreed with the matcher, once connected
    pub fn market_basis(&self) -> Option<MarketBasis> {
        self.state.lock().session.as_ref()?.market_basis()
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.state.lock().session.clone()
    }

    /// Sends a bid upstream.
    ///
    /// Returns the numbered update that was sent, or `None` when the curve
    /// equals the previous one and that one is still fresh.
    pub fn publish_bid(&self, bid: Bid) -> Result<Option<BidUpdate>> {
        self.send(bid, false)
    }

    /// Sends the last bid again under a new number; `None` before any bid
    pub fn refresh_bid(&self) -> Result<Option<BidUpdate>> {
        let Some(bid) = self.last_bid() else {
            return Ok(None);
        };
        self.send(bid, true)
    }

    fn send(&self, bid: Bid, force: bool) -> Result<Option<BidUpdate>> {
        let _ordered = self.send_lock.lock();
        let now = self.clock.current_time_millis();
        let (session, update) = {
            let mut state = self.state.lock();
            let session = match &state.session {
                Some(s) if s.is_connected() => s.clone(),
                _ => {
                    return Err(PowerMatcherError::state(format!(
                        "agent [{}] is not connected",
                        self.agent_id
                    )))
                }
            };
            let fresh = now.saturating_sub(state.last_sent_at) < self.bid_refresh.as_millis() as u64;
            if !force && fresh && state.last_bid.as_ref() == Some(&bid) {
                return Ok(None);
            }
            state.bid_number += 1;
            (session, BidUpdate::new(bid, state.bid_number))
        };

        session.update_bid(update.clone())?;
        {
            let mut state = self.state.lock();
            state.last_bid = Some(update.bid().clone());
            state.last_sent_at = now;
        }

        if self.observable.has_observers() {
            self.publish_event(&session, EventKind::outgoing_bid(update.bid(), update.bid_number()));
        }
        Ok(Some(update))
    }

    /// Bid number of the last bid sent on the current session
    pub fn last_bid_number(&self) -> u64 {
        self.state.lock().bid_number
    }

    pub fn last_bid(&self) -> Option<Bid> {
        self.state.lock().last_bid.clone()
    }

    pub fn last_price(&self) -> Option<PriceUpdate> {
        self.state.lock().last_price.clone()
    }

    pub fn stale_price_count(&self) -> u64 {
        self.state.lock().stale_prices
    }

    /// Closes the session from the agent side
    pub fn disconnect(&self) {
        let session = self.state.lock().session.clone();
        if let Some(session) = session {
            session.disconnect();
        }
    }

    fn publish_event(&self, session: &Session, kind: EventKind) {
        self.observable.publish(AgentEvent {
            cluster_id: session.cluster_id().unwrap_or_default(),
            agent_id: self.agent_id.clone(),
            session_id: session.session_id().to_string(),
            timestamp: self.clock.current_time_millis(),
            kind,
        });
    }
}

impl AgentEndpoint for DeviceAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn desired_parent_id(&self) -> &str {
        &self.desired_parent_id
    }

    fn connect_to_matcher(&self, session: Arc<Session>) -> Result<()> {
        *self.state.lock() = DeviceState {
            session: Some(session.clone()),
            ..DeviceState::default()
        };
        debug!(agent_id = %self.agent_id, session_id = %session.session_id(), "已连接到匹配方");
        self.publish_event(&session, EventKind::Connected);
        Ok(())
    }

    fn matcher_endpoint_disconnected(&self, session: &Session) {
        {
            let mut state = self.state.lock();
            let current = state
                .session
                .as_ref()
                .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session));
            if !current {
                return;
            }
            state.session = None;
        }
        debug!(agent_id = %self.agent_id, session_id = %session.session_id(), "与匹配方断开");
        self.publish_event(session, EventKind::Disconnected);
    }

    fn handle_price_update(&self, update: PriceUpdate) -> Result<()> {
        let session = {
            let mut state = self.state.lock();
            if update.bid_number() < state.bid_number {
                state.stale_prices += 1;
                METRICS.stale_prices.with_label_values(&[&self.agent_id]).inc();
                debug!(
                    agent_id = %self.agent_id,
                    "过期价格: bidNumber {} < {}",
                    update.bid_number(),
                    state.bid_number
                );
                return Ok(());
            }
            state.last_price = Some(update.clone());
            state.session.clone()
        };

        if let Some(session) = session {
            if self.observable.has_observers() {
                self.publish_event(&session, EventKind::incoming_price(&update));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::endpoints::MatcherEndpoint;
    use crate::domain::Price;
    use crate::shared::clock::ManualClock;

    #[derive(Default)]
    struct Sink {
        bids: Mutex<Vec<BidUpdate>>,
    }

    impl MatcherEndpoint for Sink {
        fn matcher_id(&self) -> &str {
            "sink"
        }
        fn connect_to_agent(&self, _session: Arc<Session>) -> Result<()> {
            Ok(())
        }
        fn agent_endpoint_disconnected(&self, _session: &Session) {}
        fn handle_bid_update(&self, _session: &Session, update: BidUpdate) -> Result<()> {
            self.bids.lock().push(update);
            Ok(())
        }
    }

    fn mb() -> MarketBasis {
        MarketBasis::new("electricity", "EUR", 5, 0.0, 1.0).unwrap()
    }

    fn connected() -> (Arc<DeviceAgent>, Arc<Sink>, Arc<Session>) {
        let agent = Arc::new(DeviceAgent::new("fridge", "sink"));
        let sink = Arc::new(Sink::default());
        let as_agent: Arc<dyn AgentEndpoint> = agent.clone();
        let as_matcher: Arc<dyn MatcherEndpoint> = sink.clone();
        let session = Session::new(&as_agent, &as_matcher);
        session.configure("cluster", &mb());
        agent.connect_to_matcher(session.clone()).unwrap();
        (agent, sink, session)
    }

    #[test]
    fn test_publish_requires_session() {
        let agent = DeviceAgent::new("fridge", "sink");
        let err = agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap_err();
        assert!(err.is_state_error());
    }

    #[test]
    fn test_bid_numbers_and_duplicates() {
        let (agent, sink, _session) = connected();
        assert_eq!(agent.market_basis(), Some(mb()));

        let first = agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap().unwrap();
        assert_eq!(first.bid_number(), 1);
        assert!(agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap().is_none());
        let second = agent.publish_bid(Bid::flat(&mb(), 2.0).unwrap()).unwrap().unwrap();
        assert_eq!(second.bid_number(), 2);
        assert_eq!(sink.bids.lock().len(), 2);
    }

    #[test]
    fn test_stale_prices_are_dropped() {
        let (agent, _sink, _session) = connected();
        agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap();
        agent.publish_bid(Bid::flat(&mb(), 2.0).unwrap()).unwrap();

        agent.handle_price_update(PriceUpdate::new(Price::new(&mb(), 0.25), 1)).unwrap();
        assert_eq!(agent.stale_price_count(), 1);
        assert!(agent.last_price().is_none());

        agent.handle_price_update(PriceUpdate::new(Price::new(&mb(), 0.5), 2)).unwrap();
        assert_eq!(agent.last_price().unwrap().price().value(), 0.5);
    }

    #[test]
    fn test_reconnect_resets_sequence() {
        let (agent, _sink, session) = connected();
        agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap();
        session.disconnect();
        assert!(!agent.is_connected());
        assert!(agent.publish_bid(Bid::flat(&mb(), 2.0).unwrap()).is_err());

        let as_agent: Arc<dyn AgentEndpoint> = agent.clone();
        let as_matcher: Arc<dyn MatcherEndpoint> = Arc::new(Sink::default());
        let fresh = Session::new(&as_agent, &as_matcher);
        fresh.configure("cluster", &mb());
        agent.connect_to_matcher(fresh).unwrap();
        let update = agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap().unwrap();
        assert_eq!(update.bid_number(), 1);
    }

    #[test]
    fn test_unchanged_bid_is_refreshed() {
        let clock = Arc::new(ManualClock::new(0));
        let agent = Arc::new(
            DeviceAgent::with_clock("fridge", "sink", clock.clone())
                .with_bid_refresh(Duration::from_secs(30)),
        );
        let sink = Arc::new(Sink::default());
        let as_agent: Arc<dyn AgentEndpoint> = agent.clone();
        let as_matcher: Arc<dyn MatcherEndpoint> = sink.clone();
        let session = Session::new(&as_agent, &as_matcher);
        session.configure("cluster", &mb());
        agent.connect_to_matcher(session).unwrap();

        assert!(agent.refresh_bid().unwrap().is_none());
        agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap();
        clock.advance(29_000);
        assert!(agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap().is_none());

        clock.advance(1_000);
        let resent = agent.publish_bid(Bid::flat(&mb(), 1.0).unwrap()).unwrap().unwrap();
        assert_eq!(resent.bid_number(), 2);

        let forced = agent.refresh_bid().unwrap().unwrap();
        assert_eq!(forced.bid_number(), 3);
        assert_eq!(forced.bid(), resent.bid());
        assert_eq!(sink.bids.lock().len(), 3);
    }

    #[test]
    fn test_concurrent_publishers_keep_send_order() {
        let (agent, sink, _session) = connected();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let agent = agent.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let demand = (t * 100 + i) as f64;
                        agent.publish_bid(Bid::flat(&mb(), demand).unwrap()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let numbers: Vec<u64> = sink.bids.lock().iter().map(|b| b.bid_number()).collect();
        assert_eq!(numbers, (1..=200).collect::<Vec<u64>>());
        assert_eq!(agent.last_bid_number(), 200);
    }

    #[test]
    fn test_rejected_bid_is_not_remembered() {
        let (agent, _sink, _session) = connected();
        let other = MarketBasis::new("electricity", "EUR", 6, 0.0, 1.0).unwrap();
        let err = agent.publish_bid(Bid::flat(&other, 1.0).unwrap()).unwrap_err();
        assert!(err.is_argument_error());
        assert!(agent.last_bid().is_none());
    }
}
