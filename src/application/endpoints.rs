/// Endpoint Traits - Seams between Agents, Matchers and Sessions
///
/// Every node of the agent tree talks to its neighbours through these traits:
/// leaf agents implement `AgentEndpoint`, the auctioneer implements
/// `MatcherEndpoint`, and a concentrator implements both. The session manager
/// only ever sees `Arc<dyn AgentEndpoint>` / `Arc<dyn MatcherEndpoint>`.
///
/// ## Call Rules
/// - Implementations must not hold their state locks while calling into a
///   `Session`; only a lock that orders outgoing sends may stay held
/// - No callback ever re-enters the `SessionManager`

use super::session::Session;
use crate::domain::{Bid, BidUpdate, Price, PriceUpdate};
use crate::shared::error::Result;
use std::sync::Arc;

/// Side of a session that bids and receives prices
pub trait AgentEndpoint: Send + Sync {
    fn agent_id(&self) -> &str;

    /// Id of the matcher this agent wants to be connected to
    fn desired_parent_id(&self) -> &str;

    /// Called once the matcher accepted the session; the session already
    /// carries the cluster id and market basis
    fn connect_to_matcher(&self, session: Arc<Session>) -> Result<()>;

    fn matcher_endpoint_disconnected(&self, session: &Session);

    fn handle_price_update(&self, update: PriceUpdate) -> Result<()>;
}

/// Side of a session that collects bids
pub trait MatcherEndpoint: Send + Sync {
    fn matcher_id(&self) -> &str;

    /// Accepts (and configures) or refuses a new session
    fn connect_to_agent(&self, session: Arc<Session>) -> Result<()>;

    fn agent_endpoint_disconnected(&self, session: &Session);

    fn handle_bid_update(&self, session: &Session, update: BidUpdate) -> Result<()>;
}

/// Controller consulted by objective clearing
pub trait ObjectiveEndpoint: Send + Sync {
    /// Extra bid to fold into the aggregate before clearing, if any
    fn handle_aggregated_bid(&self, aggregated: &Bid) -> Option<Bid>;

    fn notify_price_update(&self, price: &Price);
}
