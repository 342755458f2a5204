/// Application Layer - Sessions, Matchers and Agents
///
/// This layer turns the domain model into a running cluster: it defines the
/// endpoint seams, binds agents to matchers through sessions and implements
/// the auctioneer, concentrator and device agent on top of the domain's bid
/// cache and clearing rule. It is independent of any transport; remote agents
/// are plugged in by the infrastructure layer as ordinary endpoints.
///
/// ## Modules
/// - `endpoints`: agent/matcher/objective traits
/// - `session`: one agent-matcher pairing
/// - `services`: session manager, auctioneer, concentrator, device agent
/// - `clearing_policy`: plain and objective clearing
/// - `scheduler`: periodic ticks (tokio and manual)
/// - `monitoring`: agent events and observers
/// - `config`: typed node configuration

pub mod clearing_policy;
pub mod config;
pub mod endpoints;
pub mod monitoring;
pub mod scheduler;
pub mod services;
pub mod session;

// Re-export key services
pub use clearing_policy::{ClearingPolicy, ObjectiveClearing, PlainClearing};
pub use config::{AuctioneerConfig, ConcentratorConfig};
pub use endpoints::{AgentEndpoint, MatcherEndpoint, ObjectiveEndpoint};
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler};
pub use services::{Auctioneer, Concentrator, DeviceAgent, SessionManager};
pub use session::Session;
