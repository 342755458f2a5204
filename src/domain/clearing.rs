/// Equilibrium Price Computation
///
/// The clearing price is read off an aggregated demand curve: it is the price
/// of the first step where aggregated demand is no longer positive. A curve
/// that stays positive everywhere clears at the maximum price.
///
/// Aggregated demand is non-increasing, so "demand > 0" holds for a prefix of
/// the steps and the boundary is found by binary search. `linear_equilibrium_step`
/// is the step-by-step scan with the same result, kept for tests and benches.

use crate::domain::bid::Bid;
use crate::domain::price::Price;

/// First step with demand <= 0, `None` when demand is positive everywhere
#[inline]
pub fn equilibrium_step(demand: &[f64]) -> Option<usize> {
    let step = demand.partition_point(|&d| d > 0.0);
    (step < demand.len()).then_some(step)
}

pub fn linear_equilibrium_step(demand: &[f64]) -> Option<usize> {
    demand.iter().position(|&d| d <= 0.0)
}

/// Clearing price for an aggregated bid
pub fn determine_price(aggregated: &Bid) -> Price {
    let market_basis = aggregated.market_basis();
    match equilibrium_step(aggregated.demand()) {
        Some(step) => Price::from_step(market_basis, step),
        None => Price::new(market_basis, market_basis.maximum_price()),
    }
}
