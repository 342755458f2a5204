/// Bid - Demand Curve over a Market Basis
///
/// A bid states, for every price step of a market basis, how much the bidder
/// wants to consume (positive) or produce (negative) at that price. Demand is
/// never allowed to rise with the price; construction rejects such curves so
/// every `Bid` value in the system is admissible.
///
/// ## Representations
/// - **Dense**: one demand value per price step (`Bid` itself)
/// - **Sparse**: a list of `PricePoint` breakpoints, linearly interpolated
///   between neighbours and flat beyond the outer points
///
/// `Bid::price_points` and `PointBidBuilder` convert between the two; a dense
/// bid converted to points and sampled back is bit-identical.
///
/// ## Usage
/// ```rust
/// use powermatcher::domain::bid::{BidBuilder, PointBidBuilder};
/// use powermatcher::domain::market_basis::MarketBasis;
///
/// let mb = MarketBasis::new("electricity", "EUR", 11, 0.0, 10.0).unwrap();
/// let dense = BidBuilder::new(&mb).demand(4.0).fill_to(5).demand(0.0).build().unwrap();
/// let sparse = PointBidBuilder::new(&mb).add(4.0, 4.0).add(5.0, 0.0).build().unwrap();
/// assert_eq!(dense, sparse);
/// ```

use crate::domain::market_basis::MarketBasis;
use crate::domain::validation::{BidValidator, ValidationError};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Breakpoint of a sparse demand curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub demand: f64,
}

impl PricePoint {
    pub fn new(price: f64, demand: f64) -> Self {
        Self { price, demand }
    }
}

/// Sparse form; most curves in practice are a handful of steps
pub type PricePoints = SmallVec<[PricePoint; 8]>;

/// Immutable, validated demand curve
#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    market_basis: MarketBasis,
    demand: Arc<[f64]>,
}

impl Bid {
    /// Validates and wraps a dense demand array
    pub fn new(market_basis: &MarketBasis, demand: Vec<f64>) -> Result<Self, ValidationError> {
        BidValidator::new(market_basis).validate(&demand)?;
        Ok(Self {
            market_basis: market_basis.clone(),
            demand: demand.into(),
        })
    }

    /// Same demand at every price step
    pub fn flat(market_basis: &MarketBasis, demand: f64) -> Result<Self, ValidationError> {
        Self::new(market_basis, vec![demand; market_basis.price_steps()])
    }

    /// Zero demand at every price step
    pub fn empty(market_basis: &MarketBasis) -> Self {
        Self {
            market_basis: market_basis.clone(),
            demand: vec![0.0; market_basis.price_steps()].into(),
        }
    }

    /// Wraps an element-wise sum of admitted bids.
    ///
    /// Rounded addition is monotone, so the sum of non-increasing curves stays
    /// non-increasing and needs no re-validation.
    pub(crate) fn from_sum(market_basis: &MarketBasis, demand: Vec<f64>) -> Self {
        debug_assert_eq!(demand.len(), market_basis.price_steps());
        debug_assert!(demand.windows(2).all(|w| w[1] <= w[0]));
        Self {
            market_basis: market_basis.clone(),
            demand: demand.into(),
        }
    }

    pub fn market_basis(&self) -> &MarketBasis {
        &self.market_basis
    }

    pub fn demand(&self) -> &[f64] {
        &self.demand
    }

    /// Demand at a step; steps past the end read the last value
    #[inline]
    pub fn demand_at(&self, step: usize) -> f64 {
        let last = self.demand.len() - 1;
        self.demand[step.min(last)]
    }

    #[inline]
    pub fn demand_at_price(&self, price: f64) -> f64 {
        self.demand_at(self.market_basis.step_of(price))
    }

    /// Demand at the lowest price
    pub fn maximum_demand(&self) -> f64 {
        self.demand[0]
    }

    /// Demand at the highest price
    pub fn minimum_demand(&self) -> f64 {
        self.demand[self.demand.len() - 1]
    }

    /// Element-wise sum of two bids with the same market basis
    pub fn aggregate(&self, other: &Bid) -> Result<Bid, ValidationError> {
        BidValidator::new(&self.market_basis).validate_market_basis(&other.market_basis)?;
        let demand = self
            .demand
            .iter()
            .zip(other.demand.iter())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Bid::from_sum(&self.market_basis, demand))
    }

    /// Element-wise difference; fails when the result would rise
    pub fn subtract(&self, other: &Bid) -> Result<Bid, ValidationError> {
        BidValidator::new(&self.market_basis).validate_market_basis(&other.market_basis)?;
        let demand = self
            .demand
            .iter()
            .zip(other.demand.iter())
            .map(|(a, b)| a - b)
            .collect();
        Bid::new(&self.market_basis, demand)
    }

    /// Shifts the whole curve by a constant
    pub fn transpose(&self, offset: f64) -> Result<Bid, ValidationError> {
        let demand = self.demand.iter().map(|d| d + offset).collect();
        Bid::new(&self.market_basis, demand)
    }

    /// Sparse breakpoints that reproduce this curve exactly.
    ///
    /// Both outer steps are always emitted, plus both ends of every step where
    /// the demand changes, so any price step lies on a point or inside a flat
    /// segment.
    pub fn price_points(&self) -> PricePoints {
        let last = self.demand.len() - 1;
        let mut points = PricePoints::new();
        let push = |step: usize, points: &mut PricePoints| {
            let price = self.market_basis.price_of(step);
            if points.last().map_or(true, |p: &PricePoint| p.price != price) {
                points.push(PricePoint::new(price, self.demand[step]));
            }
        };

        push(0, &mut points);
        for step in 1..=last {
            if self.demand[step] != self.demand[step - 1] {
                push(step - 1, &mut points);
                push(step, &mut points);
            }
        }
        push(last, &mut points);
        points
    }
}

impl fmt::Display for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bid[{}, demand={:?}]", self.market_basis, &self.demand[..])
    }
}

/// Dense bid builder
///
/// `demand` appends one step, `fill_to` repeats the last value up to (not
/// including) a step; `build` fills whatever remains with the last value.
pub struct BidBuilder {
    market_basis: MarketBasis,
    demand: Vec<f64>,
    error: Option<ValidationError>,
}

impl BidBuilder {
    pub fn new(market_basis: &MarketBasis) -> Self {
        Self {
            market_basis: market_basis.clone(),
            demand: Vec::with_capacity(market_basis.price_steps()),
            error: None,
        }
    }

    pub fn demand(mut self, demand: f64) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.demand.len() >= self.market_basis.price_steps() {
            self.error = Some(ValidationError::DemandLength {
                expected: self.market_basis.price_steps(),
                actual: self.demand.len() + 1,
            });
        } else {
            self.demand.push(demand);
        }
        self
    }

    pub fn fill_to(mut self, step: usize) -> Self {
        if self.error.is_some() {
            return self;
        }
        let Some(&last) = self.demand.last() else {
            self.error = Some(ValidationError::DemandLength {
                expected: self.market_basis.price_steps(),
                actual: 0,
            });
            return self;
        };
        let end = step.min(self.market_basis.price_steps());
        while self.demand.len() < end {
            self.demand.push(last);
        }
        self
    }

    pub fn build(self) -> Result<Bid, ValidationError> {
        let steps = self.market_basis.price_steps();
        let builder = self.fill_to(steps);
        if let Some(err) = builder.error {
            return Err(err);
        }
        Bid::new(&builder.market_basis, builder.demand)
    }
}

/// Sparse bid builder
///
/// Collects price points in any order and samples the interpolated curve at
/// every price step of the market basis.
pub struct PointBidBuilder {
    market_basis: MarketBasis,
    points: Vec<PricePoint>,
}

impl PointBidBuilder {
    pub fn new(market_basis: &MarketBasis) -> Self {
        Self {
            market_basis: market_basis.clone(),
            points: Vec::new(),
        }
    }

    pub fn add(mut self, price: f64, demand: f64) -> Self {
        self.points.push(PricePoint::new(price, demand));
        self
    }

    pub fn add_all(mut self, points: &[PricePoint]) -> Self {
        self.points.extend_from_slice(points);
        self
    }

    pub fn build(mut self) -> Result<Bid, ValidationError> {
        if self.points.is_empty() {
            return Err(ValidationError::InvalidPricePoint("no price points given".into()));
        }
        for point in &mut self.points {
            if !point.price.is_finite() || !point.demand.is_finite() {
                return Err(ValidationError::InvalidPricePoint(format!(
                    "price point ({}, {}) is not finite",
                    point.price, point.demand
                )));
            }
            point.price = self.market_basis.bound_price(point.price);
        }

        // 按价格升序，同价格时需求降序
        self.points.sort_by(|a, b| {
            a.price
                .total_cmp(&b.price)
                .then_with(|| b.demand.total_cmp(&a.demand))
        });

        let steps = self.market_basis.price_steps();
        let mut demand = Vec::with_capacity(steps);
        let mut last = f64::INFINITY;
        for step in 0..steps {
            let mut value = demand_at(&self.points, self.market_basis.price_of(step));
            // 插值舍入误差导致的微小上升，沿用上一个值
            if value > last && value - EPSILON < last {
                value = last;
            }
            last = value;
            demand.push(value);
        }
        Bid::new(&self.market_basis, demand)
    }
}

const EPSILON: f64 = 1e-10;

fn demand_at(points: &[PricePoint], price: f64) -> f64 {
    let first = points[0];
    let last = points[points.len() - 1];
    if first.demand == last.demand {
        return first.demand;
    }
    if price < first.price {
        return first.demand;
    }
    if price >= last.price {
        return last.demand;
    }

    // 第一个价格大于 price 的点
    let high = points.partition_point(|p| p.price <= price);
    let low = high - 1;
    if points[low].price == price {
        // 同价格的开闭节点取较低需求，排序后即最后一个
        return points[low].demand;
    }

    let lower = points[low];
    let higher = points[high];
    if lower.demand == higher.demand {
        return lower.demand;
    }
    let factor = (price - lower.price) / (higher.price - lower.price);
    (1.0 - factor) * lower.demand + factor * higher.demand
}
