/// Domain Layer - Market Model and Clearing
///
/// Pure business logic of the double auction: the discretized market, the
/// demand curves agents bid, their aggregation and the clearing rule. Nothing
/// here performs I/O or knows about sessions.
///
/// ## Modules
/// - `market_basis`: price-step <-> price mapping shared by a cluster
/// - `bid`: validated demand curves (dense and price-point forms)
/// - `price`: prices plus the numbered bid/price update messages
/// - `validation`: admission rules for demand curves
/// - `bidcache`: per-agent bid store and aggregated bids
/// - `clearing`: equilibrium price computation
/// - `transform`: concentrator-side bid/price transforms (peak shaving)

pub mod market_basis;
pub mod bid;
pub mod price;
pub mod validation;
pub mod bidcache;
pub mod clearing;
pub mod transform;

pub use bid::{Bid, BidBuilder, PointBidBuilder, PricePoint};
pub use bidcache::{AggregatedBid, BidCache};
pub use market_basis::MarketBasis;
pub use price::{BidUpdate, Price, PriceUpdate};
pub use validation::ValidationError;
