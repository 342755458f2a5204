/// Concentrator - Interior Node of the Agent Tree
///
/// Towards its parent a concentrator is an agent, towards its children it is
/// a matcher; it registers under one id for both roles. Child bids are kept
/// in a `BidCache` scoped to the market basis the parent handed out, their
/// aggregate goes upstream as one bid, and every price coming down is relayed
/// to each child with the number of the bid *that child* contributed.
///
/// ## Bid/Price Correlation
/// Every bid sent upstream gets the next outgoing bid number and the
/// aggregate it was built from is remembered (bounded history). A price for
/// outgoing bid `n` is relayed from snapshot `n`; older snapshots are dropped.
/// A price for a number no longer (or never) in the history is ignored.
///
/// ## Forwarding
/// - Periodic: every `bidUpdateRate` seconds, also evicting expired bids
/// - Eager: additionally after every accepted child bid
///
/// ## Lifecycle
/// - Children are accepted only while an upstream session exists and only if
///   the allow-list permits them
/// - Losing the upstream session disconnects every child
/// - Losing a child removes its bid

use crate::application::config::ConcentratorConfig;
use crate::application::endpoints::{AgentEndpoint, MatcherEndpoint};
use crate::application::monitoring::{AgentEvent, EventKind, ObservableAgent, Observer};
use crate::application::scheduler::{ScheduledTask, Scheduler};
use crate::application::session::Session;
use crate::domain::transform::{BidTransform, IdentityTransform, PeakShaving};
use crate::domain::{AggregatedBid, BidCache, BidUpdate, PriceUpdate};
use crate::shared::clock::{SystemClock, TimeSource};
use crate::shared::error::{PowerMatcherError, Result};
use crate::shared::metrics::METRICS;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 保留的已发送出价快照数
pub const MAX_SENT_BIDS: usize = 900;

#[derive(Clone)]
struct Upstream {
    session: Arc<Session>,
    bid_cache: Arc<BidCache>,
}

#[derive(Default)]
struct SentBids {
    last_bid_number: u64,
    history: VecDeque<(u64, Arc<AggregatedBid>)>,
}

impl SentBids {
    fn record(&mut self, aggregated: Arc<AggregatedBid>) -> u64 {
        self.last_bid_number += 1;
        self.history.push_back((self.last_bid_number, aggregated));
        while self.history.len() > MAX_SENT_BIDS {
            self.history.pop_front();
        }
        self.last_bid_number
    }

    /// Snapshot a price answers; older snapshots are discarded
    fn answered_by(&mut self, bid_number: u64) -> Option<Arc<AggregatedBid>> {
        let idx = self.history.iter().position(|(n, _)| *n == bid_number)?;
        self.history.drain(..idx);
        self.history.front().map(|(_, aggregated)| aggregated.clone())
    }
}

pub struct Concentrator {
    config: ConcentratorConfig,
    upstream: RwLock<Option<Upstream>>,
    /// agentId -> session
    children: RwLock<HashMap<String, Arc<Session>>>,
    sent: Mutex<SentBids>,
    /// 保证出价编号顺序与发送顺序一致
    forward_lock: Mutex<()>,
    transform: Arc<dyn BidTransform>,
    observable: ObservableAgent,
    clock: Arc<dyn TimeSource>,
    task: Mutex<Option<ScheduledTask>>,
}

impl Concentrator {
    /// Builds the transform from the config: peak shaving when a band is set
    pub fn new(config: ConcentratorConfig) -> Result<Self> {
        let transform: Arc<dyn BidTransform> = match config.peak_shaving {
            Some((floor, ceiling)) => Arc::new(PeakShaving::new(floor, ceiling)?),
            None => Arc::new(IdentityTransform),
        };
        Self::with_transform(config, transform, Arc::new(SystemClock))
    }

    pub fn with_transform(
        config: ConcentratorConfig,
        transform: Arc<dyn BidTransform>,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            upstream: RwLock::new(None),
            children: RwLock::new(HashMap::new()),
            sent: Mutex::new(SentBids::default()),
            forward_lock: Mutex::new(()),
            transform,
            observable: ObservableAgent::new(),
            clock,
            task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ConcentratorConfig {
        &self.config
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observable.add_observer(observer);
    }

    pub fn upstream_session(&self) -> Option<Arc<Session>> {
        self.upstream.read().as_ref().map(|u| u.session.clone())
    }

    /// Cache of the children's bids; exists only while connected upstream
    pub fn bid_cache(&self) -> Option<Arc<BidCache>> {
        self.upstream.read().as_ref().map(|u| u.bid_cache.clone())
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    pub fn last_bid_number(&self) -> u64 {
        self.sent.lock().last_bid_number
    }

    pub fn sent_history_len(&self) -> usize {
        self.sent.lock().history.len()
    }

    /// Forwards the aggregate every `bidUpdateRate` seconds
    pub fn start(self: &Arc<Self>, scheduler: &dyn Scheduler) {
        let weak = Arc::downgrade(self);
        let task = scheduler.schedule_at_fixed_rate(
            self.config.bid_update_period(),
            Arc::new(move || {
                if let Some(concentrator) = weak.upgrade() {
                    concentrator.tick();
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

    fn tick(&self) {
        if let Some(cache) = self.bid_cache() {
            let expired = cache.evict_expired();
            if !expired.is_empty() {
                debug!(agent_id = %self.config.agent_id, "过期出价已移除: {:?}", expired);
            }
        }
        if let Err(e) = self.do_bid_update() {
            warn!(agent_id = %self.config.agent_id, "向上转发出价失败: {}", e);
        }
    }

    /// Sends the (transformed) aggregate of the children upstream.
    ///
    /// Returns `None` while there is no upstream session.
    pub fn do_bid_update(&self) -> Result<Option<BidUpdate>> {
        let _ordered = self.forward_lock.lock();
        let Some(upstream) = self.upstream.read().clone() else {
            return Ok(None);
        };
        if !upstream.session.is_connected() {
            return Ok(None);
        }

        let aggregated = upstream.bid_cache.aggregate();
        let outgoing = self.transform.transform_bid(aggregated.bid())?;
        let bid_number = self.sent.lock().record(aggregated);
        let update = BidUpdate::new(outgoing, bid_number);

        upstream.session.update_bid(update.clone())?;
        if self.observable.has_observers() {
            self.publish_event(
                &upstream.session,
                EventKind::outgoing_bid(update.bid(), update.bid_number()),
            );
        }
        Ok(Some(update))
    }

    fn publish_event(&self, session: &Session, kind: EventKind) {
        self.observable.publish(AgentEvent {
            cluster_id: session.cluster_id().unwrap_or_default(),
            agent_id: self.config.agent_id.clone(),
            session_id: session.session_id().to_string(),
            timestamp: self.clock.current_time_millis(),
            kind,
        });
    }

    fn is_current_child(&self, session: &Session) -> bool {
        self.children
            .read()
            .get(session.agent_id())
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session))
    }

    fn update_session_gauge(&self) {
        METRICS
            .active_sessions
            .with_label_values(&[&self.config.agent_id])
            .set(self.child_count() as f64);
    }
}

impl AgentEndpoint for Concentrator {
    fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    fn desired_parent_id(&self) -> &str {
        &self.config.desired_parent_id
    }

    fn connect_to_matcher(&self, session: Arc<Session>) -> Result<()> {
        let market_basis = session.market_basis().ok_or_else(|| {
            PowerMatcherError::state(format!(
                "session [{}] carries no market basis",
                session.session_id()
            ))
        })?;
        let bid_cache = match self.config.bid_timeout() {
            Some(timeout) => BidCache::with_timeout(&market_basis, timeout, self.clock.clone()),
            None => BidCache::new(&market_basis),
        };
        *self.upstream.write() = Some(Upstream {
            session: session.clone(),
            bid_cache: Arc::new(bid_cache),
        });
        *self.sent.lock() = SentBids::default();

        info!(session_id = %session.session_id(), "已连接上游: {}", market_basis);
        self.publish_event(&session, EventKind::Connected);
        Ok(())
    }

    fn matcher_endpoint_disconnected(&self, session: &Session) {
        {
            let mut upstream = self.upstream.write();
            let current = upstream
                .as_ref()
                .is_some_and(|u| std::ptr::eq(Arc::as_ptr(&u.session), session));
            if !current {
                return;
            }
            *upstream = None;
        }
        *self.sent.lock() = SentBids::default();

        let children: Vec<Arc<Session>> = self.children.write().drain().map(|(_, s)| s).collect();
        info!(
            session_id = %session.session_id(),
            children = children.len(),
            "上游断开，断开所有子会话"
        );
        for child in children {
            child.disconnect();
        }
        self.update_session_gauge();
        self.publish_event(session, EventKind::Disconnected);
    }

    fn handle_price_update(&self, update: PriceUpdate) -> Result<()> {
        let node = self.config.agent_id.as_str();
        let Some(aggregated) = self.sent.lock().answered_by(update.bid_number()) else {
            warn!(agent_id = %node, bid_number = update.bid_number(), "未知出价编号的价格，忽略");
            return Ok(());
        };
        let upstream_session = self.upstream_session();

        let price = self.transform.adjust_price(update.price());
        if let Some(session) = &upstream_session {
            if self.observable.has_observers() {
                self.publish_event(session, EventKind::incoming_price(&update));
                if price != *update.price() {
                    self.publish_event(
                        session,
                        EventKind::PeakShaving {
                            price_in: update.price().value(),
                            price_out: price.value(),
                        },
                    );
                }
            }
        }

        let children: Vec<Arc<Session>> = self.children.read().values().cloned().collect();
        for child in children {
            let Some(bid_number) = aggregated.bid_number_of(child.agent_id()) else {
                debug!(session_id = %child.session_id(), "子会话不在该快照中，跳过");
                continue;
            };
            let relayed = PriceUpdate::new(price.clone(), bid_number);
            let event = self
                .observable
                .has_observers()
                .then(|| EventKind::outgoing_price(&relayed));
            match child.update_price(relayed) {
                Ok(()) => {
                    if let Some(kind) = event {
                        self.publish_event(&child, kind);
                    }
                }
                Err(e) => {
                    METRICS.price_deliveries_failed.with_label_values(&[node]).inc();
                    warn!(session_id = %child.session_id(), "价格转发失败: {}", e);
                }
            }
        }
        METRICS.prices_published.with_label_values(&[node]).inc();
        Ok(())
    }
}

impl MatcherEndpoint for Concentrator {
    fn matcher_id(&self) -> &str {
        &self.config.agent_id
    }

    fn connect_to_agent(&self, session: Arc<Session>) -> Result<()> {
        if !self.config.permits(session.agent_id()) {
            return Err(PowerMatcherError::NotPermitted {
                agent_id: session.agent_id().to_string(),
            });
        }
        let (cluster_id, market_basis) = {
            let upstream = self.upstream.read();
            let info = upstream
                .as_ref()
                .and_then(|u| Some((u.session.cluster_id()?, u.session.market_basis()?)));
            info.ok_or_else(|| {
                PowerMatcherError::state(format!(
                    "concentrator [{}] has no upstream session",
                    self.config.agent_id
                ))
            })?
        };

        session.configure(&cluster_id, &market_basis);
        self.children
            .write()
            .insert(session.agent_id().to_string(), session.clone());
        self.update_session_gauge();
        info!(session_id = %session.session_id(), "子代理已连接");
        self.publish_event(&session, EventKind::Connected);
        Ok(())
    }

    fn agent_endpoint_disconnected(&self, session: &Session) {
        {
            let mut children = self.children.write();
            let current = children
                .get(session.agent_id())
                .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session));
            if !current {
                return;
            }
            children.remove(session.agent_id());
        }
        if let Some(cache) = self.bid_cache() {
            cache.remove_bid_of_agent(session.agent_id());
        }
        self.update_session_gauge();
        info!(session_id = %session.session_id(), "子代理已断开");
        self.publish_event(session, EventKind::Disconnected);
    }

    fn handle_bid_update(&self, session: &Session, update: BidUpdate) -> Result<()> {
        let node = self.config.agent_id.as_str();
        let cache = match self.bid_cache() {
            Some(cache) if self.is_current_child(session) => cache,
            _ => {
                METRICS.bids_rejected.with_label_values(&[node, "state"]).inc();
                return Err(PowerMatcherError::state(format!(
                    "session [{}] is not a child of [{}]",
                    session.session_id(),
                    node
                )));
            }
        };

        let event = self
            .observable
            .has_observers()
            .then(|| EventKind::incoming_bid(session.agent_id(), update.bid(), update.bid_number()));
        if let Err(e) = cache.update_agent_bid(session.agent_id(), Some(update)) {
            METRICS.bids_rejected.with_label_values(&[node, "argument"]).inc();
            return Err(e.into());
        }
        METRICS.bids_received.with_label_values(&[node]).inc();
        if let Some(kind) = event {
            self.publish_event(session, kind);
        }

        if self.config.forward_eagerly {
            if let Err(e) = self.do_bid_update() {
                warn!(agent_id = %node, "立即转发失败: {}", e);
            }
        }
        Ok(())
    }
}
