/// Remote Agent Proxy
///
/// Stands in for an agent living at the other end of a TCP connection. To the
/// `SessionManager` it is an ordinary `AgentEndpoint`; towards the socket it
/// exposes two outboxes that the connection task drains:
///
/// - prices: a `watch` channel, so a slow socket only ever sees the newest
///   price and publishing never waits
/// - control: cluster info for every new session, in order

use crate::application::endpoints::AgentEndpoint;
use crate::application::session::Session;
use crate::domain::{PriceUpdate, ValidationError};
use crate::infrastructure::network::messages::{BidModel, ClusterInfoModel, RegisterModel};
use crate::shared::error::{PowerMatcherError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    ClusterInfo(ClusterInfoModel),
}

/// Receiving halves owned by the connection task
pub struct ProxyOutbox {
    pub prices: watch::Receiver<Option<PriceUpdate>>,
    pub control: mpsc::UnboundedReceiver<Control>,
}

pub struct RemoteAgentProxy {
    agent_id: String,
    desired_parent_id: String,
    session: Mutex<Option<Arc<Session>>>,
    prices: watch::Sender<Option<PriceUpdate>>,
    control: mpsc::UnboundedSender<Control>,
}

impl RemoteAgentProxy {
    pub fn new(register: RegisterModel) -> (Arc<Self>, ProxyOutbox) {
        let (prices_tx, prices_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let proxy = Arc::new(Self {
            agent_id: register.agent_id,
            desired_parent_id: register.desired_parent_id,
            session: Mutex::new(None),
            prices: prices_tx,
            control: control_tx,
        });
        let outbox = ProxyOutbox {
            prices: prices_rx,
            control: control_rx,
        };
        (proxy, outbox)
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    /// Validates a bid received from the socket and sends it to the matcher
    pub fn submit_bid(&self, model: &BidModel) -> Result<()> {
        let session = self
            .session()
            .filter(|s| s.is_connected())
            .ok_or_else(|| {
                PowerMatcherError::state(format!("remote agent [{}] has no session", self.agent_id))
            })?;
        let agreed = session.market_basis().ok_or_else(|| {
            PowerMatcherError::state(format!("session [{}] has no market basis yet", session.session_id()))
        })?;
        // 先比较市场基准，再按其价格步数展开出价
        let offered = model.market_basis.to_market_basis()?;
        if offered != agreed {
            return Err(ValidationError::MarketBasisMismatch {
                expected: agreed.to_string(),
                actual: offered.to_string(),
            }
            .into());
        }
        let update = model.to_bid_update()?;
        session.update_bid(update)
    }
}

impl AgentEndpoint for RemoteAgentProxy {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn desired_parent_id(&self) -> &str {
        &self.desired_parent_id
    }

    fn connect_to_matcher(&self, session: Arc<Session>) -> Result<()> {
        let (Some(cluster_id), Some(market_basis)) = (session.cluster_id(), session.market_basis())
        else {
            return Err(PowerMatcherError::state(format!(
                "session [{}] is not configured",
                session.session_id()
            )));
        };
        self.control
            .send(Control::ClusterInfo(ClusterInfoModel::new(&cluster_id, &market_basis)))
            .map_err(|_| PowerMatcherError::state(format!("connection of [{}] is closed", self.agent_id)))?;
        info!(session_id = %session.session_id(), "远程代理已连接");
        *self.session.lock() = Some(session);
        Ok(())
    }

    fn matcher_endpoint_disconnected(&self, session: &Session) {
        let mut current = self.session.lock();
        if current
            .as_ref()
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), session))
        {
            *current = None;
            // 旧会话的价格不再投递
            self.prices.send_replace(None);
            debug!(session_id = %session.session_id(), "远程代理会话断开");
        }
    }

    fn handle_price_update(&self, update: PriceUpdate) -> Result<()> {
        self.prices.send_replace(Some(update));
        Ok(())
    }
}
