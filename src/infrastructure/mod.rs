/// Infrastructure Layer - Technical Implementations
///
/// This layer contains all technical implementations that interact with
/// external systems: the TCP transport for remote agents and the HTTP
/// observability endpoints.
///
/// The infrastructure layer depends on the application and domain layers,
/// never the other way round.
///
/// ## Modules
/// - `network`: wire messages, codec and TCP server
/// - `observability`: health checks and Prometheus export over HTTP

pub mod network;
pub mod observability;

// Re-export key types
pub use network::{AgentServer, PmMessage, RemoteAgentProxy};
pub use observability::{HealthChecker, ObservabilityServer};
