/// Network Layer - Remote Agents over TCP
///
/// ## Modules
/// - `messages`: JSON envelope and payload models
/// - `codec`: `Codec` trait, `JsonCodec` and the length-prefix framer
/// - `remote_agent`: `AgentEndpoint` proxy for a socket
/// - `server`: TCP accept loop and per-connection task

pub mod codec;
pub mod messages;
pub mod remote_agent;
pub mod server;

pub use codec::{frame_codec, Codec, JsonCodec, MessageCodec};
pub use messages::{BidModel, ClusterInfoModel, MarketBasisModel, PmMessage, PriceUpdateModel, RegisterModel};
pub use remote_agent::RemoteAgentProxy;
pub use server::AgentServer;
