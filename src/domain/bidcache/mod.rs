/// Bid aggregation engine
///
/// - `aggregated_bid`: immutable sum of bids plus per-agent bid numbers
/// - `cache`: concurrent per-agent bid store with memoized aggregation

pub mod aggregated_bid;
pub mod cache;

pub use aggregated_bid::{AggregatedBid, AggregatedBidBuilder};
pub use cache::BidCache;
