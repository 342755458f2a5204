/// Prices and the numbered messages that carry bids up and prices down.
///
/// `BidUpdate::bid_number` is a per-agent sequence number. Every
/// `PriceUpdate` echoes the number of the bid it was computed from, which is
/// how an agent recognises prices that answer an older bid.

use crate::domain::bid::Bid;
use crate::domain::market_basis::MarketBasis;
use std::fmt;

/// A price scoped to a market basis, always inside its range
#[derive(Debug, Clone, PartialEq)]
pub struct Price {
    market_basis: MarketBasis,
    value: f64,
}

impl Price {
    /// Clamps `value` into the market basis' price range
    pub fn new(market_basis: &MarketBasis, value: f64) -> Self {
        Self {
            market_basis: market_basis.clone(),
            value: market_basis.bound_price(value),
        }
    }

    pub fn from_step(market_basis: &MarketBasis, step: usize) -> Self {
        Self::new(market_basis, market_basis.price_of(step))
    }

    pub fn market_basis(&self) -> &MarketBasis {
        &self.market_basis
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn step(&self) -> usize {
        self.market_basis.step_of(self.value)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.market_basis.currency())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BidUpdate {
    bid: Bid,
    bid_number: u64,
}

impl BidUpdate {
    pub fn new(bid: Bid, bid_number: u64) -> Self {
        Self { bid, bid_number }
    }

    pub fn bid(&self) -> &Bid {
        &self.bid
    }

    pub fn bid_number(&self) -> u64 {
        self.bid_number
    }

    pub fn into_bid(self) -> Bid {
        self.bid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    price: Price,
    bid_number: u64,
}

impl PriceUpdate {
    pub fn new(price: Price, bid_number: u64) -> Self {
        Self { price, bid_number }
    }

    pub fn price(&self) -> &Price {
        &self.price
    }

    /// Number of the bid this price answers
    pub fn bid_number(&self) -> u64 {
        self.bid_number
    }
}

impl fmt::Display for PriceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PriceUpdate[price={}, bidNumber={}]", self.price, self.bid_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_is_clamped() {
        let mb = MarketBasis::new("electricity", "EUR", 11, 0.0, 10.0).unwrap();
        assert_eq!(Price::new(&mb, 12.5).value(), 10.0);
        assert_eq!(Price::new(&mb, -0.5).value(), 0.0);
        assert_eq!(Price::new(&mb, 4.0).step(), 4);
        assert_eq!(Price::from_step(&mb, 7).value(), 7.0);
    }

    #[test]
    fn test_updates_carry_bid_number() {
        let mb = MarketBasis::new("electricity", "EUR", 11, 0.0, 10.0).unwrap();
        let update = BidUpdate::new(Bid::flat(&mb, 1.0).unwrap(), 42);
        assert_eq!(update.bid_number(), 42);
        assert_eq!(update.bid().demand_at(0), 1.0);

        let price = PriceUpdate::new(Price::new(&mb, 3.0), 42);
        assert_eq!(price.bid_number(), 42);
        assert_eq!(price.to_string(), "PriceUpdate[price=3 EUR, bidNumber=42]");
    }
}
