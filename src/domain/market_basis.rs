/// Market Basis - Discretized Price Range
///
/// A market basis defines the commodity and currency a market trades in, and a
/// bijection between price-step indices `0..price_steps` and real prices spread
/// linearly between the minimum and maximum price.
///
/// Two bids can only be combined when their market bases are equal, so the
/// derived `PartialEq` is the admission test used throughout the crate.

use crate::domain::validation::ValidationError;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct MarketBasis {
    commodity: Arc<str>,
    currency: Arc<str>,
    price_steps: usize,
    minimum_price: f64,
    maximum_price: f64,
}

impl MarketBasis {
    pub fn new(
        commodity: &str,
        currency: &str,
        price_steps: usize,
        minimum_price: f64,
        maximum_price: f64,
    ) -> Result<Self, ValidationError> {
        if commodity.is_empty() {
            return Err(ValidationError::InvalidMarketBasis("commodity cannot be empty".into()));
        }
        if currency.is_empty() {
            return Err(ValidationError::InvalidMarketBasis("currency cannot be empty".into()));
        }
        if price_steps < 2 {
            return Err(ValidationError::InvalidMarketBasis(format!(
                "price steps must be at least 2, got {}",
                price_steps
            )));
        }
        if !minimum_price.is_finite() || !maximum_price.is_finite() {
            return Err(ValidationError::InvalidMarketBasis(
                "price bounds must be finite".into(),
            ));
        }
        if minimum_price >= maximum_price {
            return Err(ValidationError::InvalidMarketBasis(format!(
                "minimum price {} must be below maximum price {}",
                minimum_price, maximum_price
            )));
        }

        Ok(Self {
            commodity: Arc::from(commodity),
            currency: Arc::from(currency),
            price_steps,
            minimum_price,
            maximum_price,
        })
    }

    pub fn commodity(&self) -> &str {
        &self.commodity
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn price_steps(&self) -> usize {
        self.price_steps
    }

    pub fn minimum_price(&self) -> f64 {
        self.minimum_price
    }

    pub fn maximum_price(&self) -> f64 {
        self.maximum_price
    }

    /// Price distance between two neighbouring steps
    #[inline]
    pub fn price_increment(&self) -> f64 {
        (self.maximum_price - self.minimum_price) / (self.price_steps - 1) as f64
    }

    /// Price belonging to a step; steps past the end map to the maximum price
    #[inline]
    pub fn price_of(&self, step: usize) -> f64 {
        if step >= self.price_steps - 1 {
            return self.maximum_price;
        }
        self.minimum_price + step as f64 * self.price_increment()
    }

    /// Nearest step for a price, bounded to the valid index range
    #[inline]
    pub fn step_of(&self, price: f64) -> usize {
        let raw = ((price - self.minimum_price) / self.price_increment()).round();
        if raw <= 0.0 || raw.is_nan() {
            0
        } else {
            (raw as usize).min(self.price_steps - 1)
        }
    }

    /// Clamps a price value into `[minimum_price, maximum_price]`
    #[inline]
    pub fn bound_price(&self, price: f64) -> f64 {
        if price.is_nan() {
            return self.minimum_price;
        }
        price.clamp(self.minimum_price, self.maximum_price)
    }
}

impl fmt::Display for MarketBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MarketBasis[commodity={}, currency={}, priceSteps={}, minimumPrice={}, maximumPrice={}]",
            self.commodity, self.currency, self.price_steps, self.minimum_price, self.maximum_price
        )
    }
}
