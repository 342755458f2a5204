/// Auctioneer - Root Matcher of a Cluster
///
/// The auctioneer owns the market basis of its cluster, collects the bids of
/// its direct children in a `BidCache` and periodically clears the market:
///
/// 1. drop expired bids (when a bid timeout is configured)
/// 2. aggregate the cache
/// 3. let the `ClearingPolicy` prepare the bid to clear
/// 4. read the equilibrium price off that bid
/// 5. send every child the price tagged with the number of *its own* bid
///
/// ## Delivery
/// A failing session is logged and counted; the others still get the price.
/// Children that have no bid in the aggregate get nothing this round.

use crate::application::clearing_policy::{ClearingPolicy, PlainClearing};
use crate::application::config::AuctioneerConfig;
use crate::application::endpoints::MatcherEndpoint;
use crate::application::monitoring::{AgentEvent, EventKind, ObservableAgent, Observer};
use crate::application::scheduler::{ScheduledTask, Scheduler};
use crate::application::session::Session;
use crate::domain::clearing::determine_price;
use crate::domain::{AggregatedBid, BidCache, BidUpdate, MarketBasis, Price, PriceUpdate};
use crate::shared::clock::{SystemClock, TimeSource};
use crate::shared::error::{PowerMatcherError, Result};
use crate::shared::metrics::METRICS;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Auctioneer {
    config: AuctioneerConfig,
    market_basis: MarketBasis,
    bid_cache: BidCache,
    /// agentId -> session
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    policy: Arc<dyn ClearingPolicy>,
    last_price: RwLock<Option<Price>>,
    observable: ObservableAgent,
    clock: Arc<dyn TimeSource>,
    task: Mutex<Option<ScheduledTask>>,
}

impl Auctioneer {
    pub fn new(config: AuctioneerConfig) -> Result<Self> {
        Self::with_policy(config, Arc::new(PlainClearing), Arc::new(SystemClock))
    }

    pub fn with_policy(
        config: AuctioneerConfig,
        policy: Arc<dyn ClearingPolicy>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate()?;
        let market_basis = config.market_basis()?;
        let bid_cache = match config.bid_timeout() {
            Some(timeout) => BidCache::with_timeout(&market_basis, timeout, clock.clone()),
            None => BidCache::new(&market_basis),
        };
        info!(agent_id = %config.agent_id, "拍卖器创建: {}", market_basis);

        Ok(Self {
            config,
            market_basis,
            bid_cache,
            sessions: RwLock::new(HashMap::new()),
            policy,
            last_price: RwLock::new(None),
            observable: ObservableAgent::new(),
            clock,
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AuctioneerConfig {
        &self.config
    }

    pub fn market_basis(&self) -> &MarketBasis {
        &self.market_basis
    }

    pub fn bid_cache(&self) -> &BidCache {
        &self.bid_cache
    }

    pub fn last_price(&self) -> Option<Price> {
        self.last_price.read().clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observable.add_observer(observer);
    }

    /// Clears the market every `priceUpdateRate` seconds
    pub fn start(self: &Arc<Self>, scheduler: &dyn Scheduler) {
        let weak = Arc::downgrade(self);
        let task = scheduler.schedule_at_fixed_rate(
            self.config.price_update_period(),
            Arc::new(move || {
                if let Some(auctioneer) = weak.upgrade() {
                    auctioneer.publish_new_price();
                }
            }),
        );
        if let Some(previous) = self.task.lock().replace(task) {
            previous.cancel();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
        }
    }

    /// Runs one clearing round and returns the published price
    pub fn publish_new_price(&self) -> Price {
        let node = self.config.agent_id.as_str();
        let timer = METRICS
            .aggregation_duration
            .with_label_values(&[node])
            .start_timer();

        let expired = self.bid_cache.evict_expired();
        if !expired.is_empty() {
            debug!(agent_id = %node, "过期出价已移除: {:?}", expired);
        }
        let aggregated = self.bid_cache.aggregate();
        let cleared = self.policy.prepare(&aggregated);
        let price = determine_price(&cleared);
        timer.observe_duration();

        METRICS.aggregations.with_label_values(&[node]).inc();
        METRICS.cached_bids.with_label_values(&[node]).set(aggregated.contributor_count() as f64);
        METRICS.equilibrium_price.with_label_values(&[node]).set(price.value());

        self.deliver(&aggregated, &price);
        self.policy.price_published(&price);
        METRICS.prices_published.with_label_values(&[node]).inc();
        debug!(agent_id = %node, contributors = aggregated.contributor_count(), "出清价格: {}", price);

        *self.last_price.write() = Some(price.clone());
        price
    }

    fn deliver(&self, aggregated: &AggregatedBid, price: &Price) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        for session in sessions {
            let Some(bid_number) = aggregated.bid_number_of(session.agent_id()) else {
                debug!(session_id = %session.session_id(), "会话尚无出价，跳过");
                continue;
            };
            let update = PriceUpdate::new(price.clone(), bid_number);
            let event = self
                .observable
                .has_observers()
                .then(|| EventKind::outgoing_price(&update));
            match session.update_price(update) {
                Ok(()) => {
                    if let Some(kind) = event {
                        self.publish_event(&session, kind);
                    }
                }
                Err(e) => {
                    METRICS
                        .price_deliveries_failed
                        .with_label_values(&[&self.config.agent_id])
                        .inc();
                    warn!(session_id = %session.session_id(), "价格投递失败: {}", e);
                }
            }
        }
    }

    fn publish_event(&self, session: &Session, kind: EventKind) {
        self.observable.publish(AgentEvent {
            cluster_id: self.config.cluster_id.clone(),
            agent_id: self.config.agent_id.clone(),
            session_id: session.session_id().to_string(),
            timestamp: self.clock.current_time_millis(),
            kind,
        });
    }

    fn is_current(&self, session: &Session) -> bool {
        self.sessions
            .read()
            .get(session.agent_id())
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session))
    }

    fn update_session_gauge(&self) {
        METRICS
            .active_sessions
            .with_label_values(&[&self.config.agent_id])
            .set(self.session_count() as f64);
    }
}

impl MatcherEndpoint for Auctioneer {
    fn matcher_id(&self) -> &str {
        &self.config.agent_id
    }

    fn connect_to_agent(&self, session: Arc<Session>) -> Result<()> {
        session.configure(&self.config.cluster_id, &self.market_basis);
        self.sessions
            .write()
            .insert(session.agent_id().to_string(), session.clone());
        self.update_session_gauge();
        info!(session_id = %session.session_id(), "代理已连接");
        self.publish_event(&session, EventKind::Connected);
        Ok(())
    }

    fn agent_endpoint_disconnected(&self, session: &Session) {
        {
            let mut sessions = self.sessions.write();
            let current = sessions
                .get(session.agent_id())
                .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session));
            if !current {
                return;
            }
            sessions.remove(session.agent_id());
        }
        self.bid_cache.remove_bid_of_agent(session.agent_id());
        self.update_session_gauge();
        info!(session_id = %session.session_id(), "代理已断开");
        self.publish_event(session, EventKind::Disconnected);
    }

    fn handle_bid_update(&self, session: &Session, update: BidUpdate) -> Result<()> {
        let node = self.config.agent_id.as_str();
        if !self.is_current(session) {
            METRICS.bids_rejected.with_label_values(&[node, "state"]).inc();
            return Err(PowerMatcherError::state(format!(
                "session [{}] is not connected to [{}]",
                session.session_id(),
                node
            )));
        }

        let event = self
            .observable
            .has_observers()
            .then(|| EventKind::incoming_bid(session.agent_id(), update.bid(), update.bid_number()));
        if let Err(e) = self.bid_cache.update_agent_bid(session.agent_id(), Some(update)) {
            METRICS.bids_rejected.with_label_values(&[node, "argument"]).inc();
            return Err(e.into());
        }
        METRICS.bids_received.with_label_values(&[node]).inc();
        if let Some(kind) = event {
            self.publish_event(session, kind);
        }
        Ok(())
    }
}
