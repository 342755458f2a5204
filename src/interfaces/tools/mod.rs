//! Tools and Utilities Module
//!
//! Shared helpers for the simulated agents of the binary and for the
//! `agent_simulator` load tool.
//!
//! ## Available Tools
//! - `random_demand` / `random_bid`: random admissible demand curves
//! - `agent_simulator`: Located in src/bin/agent_simulator.rs (binary)

use crate::domain::{Bid, MarketBasis, ValidationError};
use rand::Rng;

/// Random non-increasing demand curve.
///
/// The curve starts somewhere in `[-max_flow, max_flow]` and drops by a
/// random amount at a few random steps, like a device that switches off once
/// the price gets too high.
pub fn random_demand<R: Rng + ?Sized>(rng: &mut R, price_steps: usize, max_flow: f64) -> Vec<f64> {
    let mut demand = Vec::with_capacity(price_steps);
    let mut current = rng.gen_range(-max_flow..=max_flow);
    for _ in 0..price_steps {
        // 约 1/10 的价格步发生下降
        if rng.gen_ratio(1, 10) {
            current -= rng.gen_range(0.0..=max_flow / 2.0);
        }
        demand.push(current);
    }
    demand
}

pub fn random_bid<R: Rng + ?Sized>(
    rng: &mut R,
    market_basis: &MarketBasis,
    max_flow: f64,
) -> Result<Bid, ValidationError> {
    Bid::new(market_basis, random_demand(rng, market_basis.price_steps(), max_flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_bids_are_admissible() {
        let mut rng = StdRng::seed_from_u64(7);
        let mb = MarketBasis::new("electricity", "EUR", 100, 0.0, 1.0).unwrap();
        for _ in 0..200 {
            let bid = random_bid(&mut rng, &mb, 1000.0).unwrap();
            assert!(bid.demand().windows(2).all(|w| w[1] <= w[0]));
        }
    }
}
