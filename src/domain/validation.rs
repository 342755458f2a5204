/// Bid Validator - Admission Rules for Demand Curves
///
/// This module holds the checks every demand curve must pass before it can be
/// turned into a `Bid` and stored in a bid cache.
///
/// ## Validation Rules
/// - Demand length must equal the market basis' price steps
/// - Every demand value must be finite
/// - Demand must be non-increasing as the price step increases
/// - Bids can only be combined when their market bases are equal
///
/// ## Usage
/// ```rust
/// use powermatcher::domain::market_basis::MarketBasis;
/// use powermatcher::domain::validation::BidValidator;
///
/// let market_basis = MarketBasis::new("electricity", "EUR", 5, 0.0, 1.0).unwrap();
/// let validator = BidValidator::new(&market_basis);
/// assert!(validator.validate(&[4.0, 2.0, 0.0, -1.0, -1.0]).is_ok());
/// assert!(validator.validate(&[0.0, 1.0, 2.0, 3.0, 4.0]).is_err());
/// ```

use crate::domain::market_basis::MarketBasis;

/// Validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Commodity/currency empty, fewer than 2 steps, bad price range
    #[error("invalid market basis: {0}")]
    InvalidMarketBasis(String),

    /// Demand array does not cover every price step
    #[error("demand length {actual} does not match {expected} price steps")]
    DemandLength { expected: usize, actual: usize },

    /// Demand rises between `index - 1` and `index`
    #[error("demand must be descending, rises at price step {index}")]
    AscendingDemand { index: usize },

    #[error("demand at price step {index} is not a finite number")]
    NonFiniteDemand { index: usize },

    #[error("market basis {actual} differs from {expected}")]
    MarketBasisMismatch { expected: String, actual: String },

    #[error("invalid price point: {0}")]
    InvalidPricePoint(String),

    /// Inconsistent transform constraint (e.g. floor above ceiling)
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),
}

/// Bid validator
///
/// Validates demand curves against one market basis.
pub struct BidValidator<'a> {
    market_basis: &'a MarketBasis,
}

impl<'a> BidValidator<'a> {
    pub fn new(market_basis: &'a MarketBasis) -> Self {
        Self { market_basis }
    }

    /// Validates a dense demand array
    ///
    /// # Returns
    /// * `Ok(())` if the curve can be admitted
    /// * `Err(ValidationError)` naming the first violated rule
    pub fn validate(&self, demand: &[f64]) -> Result<(), ValidationError> {
        self.validate_length(demand)?;
        self.validate_finite(demand)?;
        self.validate_descending(demand)?;
        Ok(())
    }

    /// Admission test for combining two bids
    pub fn validate_market_basis(&self, other: &MarketBasis) -> Result<(), ValidationError> {
        if other != self.market_basis {
            return Err(ValidationError::MarketBasisMismatch {
                expected: self.market_basis.to_string(),
                actual: other.to_string(),
            });
        }
        Ok(())
    }

    fn validate_length(&self, demand: &[f64]) -> Result<(), ValidationError> {
        let expected = self.market_basis.price_steps();
        if demand.len() != expected {
            return Err(ValidationError::DemandLength {
                expected,
                actual: demand.len(),
            });
        }
        Ok(())
    }

    fn validate_finite(&self, demand: &[f64]) -> Result<(), ValidationError> {
        match demand.iter().position(|d| !d.is_finite()) {
            Some(index) => Err(ValidationError::NonFiniteDemand { index }),
            None => Ok(()),
        }
    }

    fn validate_descending(&self, demand: &[f64]) -> Result<(), ValidationError> {
        match demand.windows(2).position(|w| w[1] > w[0]) {
            Some(i) => Err(ValidationError::AscendingDemand { index: i + 1 }),
            None => Ok(()),
        }
    }
}
