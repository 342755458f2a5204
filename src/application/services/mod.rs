/// Application Services
///
/// The nodes of the agent tree and the registry that wires them together:
/// - `SessionManager`: endpoint registry and matching pass
/// - `Auctioneer`: root matcher, clears the market
/// - `Concentrator`: interior node, relays bids up and prices down
/// - `DeviceAgent`: in-process leaf agent

pub mod auctioneer;
pub mod concentrator;
pub mod device_agent;
pub mod session_manager;

pub use auctioneer::Auctioneer;
pub use concentrator::Concentrator;
pub use device_agent::DeviceAgent;
pub use session_manager::SessionManager;
