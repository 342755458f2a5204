/// Session - Live Pairing of one Agent and one Matcher
///
/// A session is created by the `SessionManager`, configured by the matcher
/// (cluster id and market basis) and then handed to the agent. It is the only
/// path for bids going up and prices coming down, and it validates both
/// against the agreed market basis before forwarding.
///
/// ## Lifecycle
/// `Connected -> Disconnected`. `disconnect()` flips the state atomically, so
/// a price published after (or racing with) the flip is refused, then tells
/// the matcher (which drops the agent's bid) and the agent.
///
/// Sessions hold weak references to both endpoints; the registry owns them.

use super::endpoints::{AgentEndpoint, MatcherEndpoint};
use crate::domain::validation::BidValidator;
use crate::domain::{BidUpdate, MarketBasis, PriceUpdate};
use crate::shared::error::{PowerMatcherError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
struct SessionInfo {
    cluster_id: String,
    market_basis: MarketBasis,
}

pub struct Session {
    session_id: String,
    agent_id: String,
    matcher_id: String,
    agent: Weak<dyn AgentEndpoint>,
    matcher: Weak<dyn MatcherEndpoint>,
    info: RwLock<Option<SessionInfo>>,
    connected: AtomicBool,
}

impl Session {
    pub fn new(agent: &Arc<dyn AgentEndpoint>, matcher: &Arc<dyn MatcherEndpoint>) -> Arc<Self> {
        let agent_id = agent.agent_id().to_string();
        let matcher_id = matcher.matcher_id().to_string();
        Arc::new(Self {
            session_id: format!("{}:{}", agent_id, matcher_id),
            agent_id,
            matcher_id,
            agent: Arc::downgrade(agent),
            matcher: Arc::downgrade(matcher),
            info: RwLock::new(None),
            connected: AtomicBool::new(true),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn matcher_id(&self) -> &str {
        &self.matcher_id
    }

    pub fn cluster_id(&self) -> Option<String> {
        self.info.read().as_ref().map(|i| i.cluster_id.clone())
    }

    pub fn market_basis(&self) -> Option<MarketBasis> {
        self.info.read().as_ref().map(|i| i.market_basis.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stamps the cluster and market the matcher agreed to
    pub fn configure(&self, cluster_id: &str, market_basis: &MarketBasis) {
        *self.info.write() = Some(SessionInfo {
            cluster_id: cluster_id.to_string(),
            market_basis: market_basis.clone(),
        });
    }

    /// Sends a bid to the matcher
    pub fn update_bid(&self, update: BidUpdate) -> Result<()> {
        let market_basis = self.agreed_market_basis()?;
        BidValidator::new(&market_basis).validate_market_basis(update.bid().market_basis())?;
        let matcher = self
            .matcher
            .upgrade()
            .ok_or_else(|| PowerMatcherError::state(format!("matcher of session [{}] is gone", self.session_id)))?;
        matcher.handle_bid_update(self, update)
    }

    /// Sends a price to the agent
    pub fn update_price(&self, update: PriceUpdate) -> Result<()> {
        let market_basis = self.agreed_market_basis()?;
        BidValidator::new(&market_basis).validate_market_basis(update.price().market_basis())?;
        let agent = self
            .agent
            .upgrade()
            .ok_or_else(|| PowerMatcherError::state(format!("agent of session [{}] is gone", self.session_id)))?;
        agent.handle_price_update(update)
    }

    /// Tears the session down; later calls are no-ops
    pub fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(session_id = %self.session_id, "会话断开");
        if let Some(matcher) = self.matcher.upgrade() {
            matcher.agent_endpoint_disconnected(self);
        }
        if let Some(agent) = self.agent.upgrade() {
            agent.matcher_endpoint_disconnected(self);
        }
    }

    /// Marks a session that never became active as closed without callbacks
    pub(crate) fn abandon(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn agreed_market_basis(&self) -> Result<MarketBasis> {
        if !self.is_connected() {
            return Err(PowerMatcherError::state(format!(
                "session [{}] is disconnected",
                self.session_id
            )));
        }
        self.market_basis().ok_or_else(|| {
            PowerMatcherError::state(format!(
                "session [{}] has no market basis yet",
                self.session_id
            ))
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("connected", &self.is_connected())
            .field("info", &*self.info.read())
            .finish()
    }
}
