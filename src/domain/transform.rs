/// Bid/Price Transforms for Concentrators
///
/// A concentrator may reshape the aggregate it sends upstream and the price it
/// relays downstream. The transform never touches how bids are summed or how
/// the price is cleared; it only maps one curve to another curve and one price
/// to another price.
///
/// ## Implementations
/// - `IdentityTransform`: passes everything through
/// - `PeakShaving`: keeps the expected flow of the cluster inside a
///   `[floor, ceiling]` band, optionally correcting for the flow that the
///   cluster's bids do not control (measured flow minus allocation)

use crate::domain::bid::Bid;
use crate::domain::price::Price;
use crate::domain::validation::ValidationError;
use parking_lot::Mutex;

pub trait BidTransform: Send + Sync {
    /// Maps the aggregate of the children to the bid sent upstream
    fn transform_bid(&self, aggregated: &Bid) -> Result<Bid, ValidationError>;

    /// Maps the price received from upstream to the price relayed to children
    fn adjust_price(&self, price: &Price) -> Price;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl BidTransform for IdentityTransform {
    fn transform_bid(&self, aggregated: &Bid) -> Result<Bid, ValidationError> {
        Ok(aggregated.clone())
    }

    fn adjust_price(&self, price: &Price) -> Price {
        price.clone()
    }
}

#[derive(Default)]
struct PeakShavingState {
    measured_flow: Option<f64>,
    bid_in: Option<Bid>,
    bid_out: Option<Bid>,
    price_in: Option<Price>,
    price_out: Option<Price>,
}

impl PeakShavingState {
    /// Flow implied by the last incoming aggregate at the last relayed price
    fn allocation(&self) -> Option<f64> {
        match (&self.bid_in, &self.price_out) {
            (Some(bid), Some(price)) => Some(bid.demand_at(price.step())),
            _ => None,
        }
    }

    fn uncontrolled_flow(&self) -> Option<f64> {
        Some(self.measured_flow? - self.allocation()?)
    }
}

pub struct PeakShaving {
    floor: f64,
    ceiling: f64,
    state: Mutex<PeakShavingState>,
}

impl PeakShaving {
    pub fn new(floor: f64, ceiling: f64) -> Result<Self, ValidationError> {
        if floor.is_nan() || ceiling.is_nan() {
            return Err(ValidationError::InvalidConstraint(
                "floor and ceiling must be numbers".into(),
            ));
        }
        if floor > ceiling {
            return Err(ValidationError::InvalidConstraint(format!(
                "floor {} must not be above ceiling {}",
                floor, ceiling
            )));
        }
        Ok(Self {
            floor,
            ceiling,
            state: Mutex::new(PeakShavingState::default()),
        })
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    /// Latest metered flow of the cluster
    pub fn set_measured_flow(&self, flow: f64) -> Result<(), ValidationError> {
        if !flow.is_finite() {
            return Err(ValidationError::InvalidConstraint(format!(
                "measured flow {} is not finite",
                flow
            )));
        }
        self.state.lock().measured_flow = Some(flow);
        Ok(())
    }

    pub fn uncontrolled_flow(&self) -> Option<f64> {
        self.state.lock().uncontrolled_flow()
    }

    /// Last aggregate sent upstream
    pub fn last_bid_out(&self) -> Option<Bid> {
        self.state.lock().bid_out.clone()
    }

    /// Last (received, relayed) price pair
    pub fn last_prices(&self) -> Option<(Price, Price)> {
        let state = self.state.lock();
        Some((state.price_in.clone()?, state.price_out.clone()?))
    }
}

impl BidTransform for PeakShaving {
    fn transform_bid(&self, aggregated: &Bid) -> Result<Bid, ValidationError> {
        let mut state = self.state.lock();
        let uncontrolled = state.uncontrolled_flow().unwrap_or(0.0);

        let mut demand: Vec<f64> = aggregated.demand().iter().map(|d| d + uncontrolled).collect();
        clip_above(&mut demand, self.ceiling);
        clip_below(&mut demand, self.floor);
        for d in demand.iter_mut() {
            *d -= uncontrolled;
        }

        let bid_out = Bid::new(aggregated.market_basis(), demand)?;
        state.bid_in = Some(aggregated.clone());
        state.bid_out = Some(bid_out.clone());
        Ok(bid_out)
    }

    fn adjust_price(&self, price: &Price) -> Price {
        let mut state = self.state.lock();
        let Some(bid_in) = state.bid_in.clone() else {
            state.price_in = Some(price.clone());
            state.price_out = Some(price.clone());
            return price.clone();
        };

        let uncontrolled = state.uncontrolled_flow().unwrap_or(0.0);
        let demand: Vec<f64> = bid_in.demand().iter().map(|d| d + uncontrolled).collect();
        let last_step = demand.len() - 1;

        let step_in = price.step();
        let allocation = demand[step_in.min(last_step)];
        let step_out = if allocation > self.ceiling {
            // 没有未裁剪区域时取最高价格
            first_unclipped(&demand, self.ceiling).unwrap_or(last_step)
        } else if allocation < self.floor {
            // 没有未裁剪区域时取最低价格
            last_unclipped(&demand, self.floor).unwrap_or(0)
        } else {
            step_in
        };

        let price_out = if step_out == step_in {
            price.clone()
        } else {
            Price::from_step(price.market_basis(), step_out)
        };
        state.price_in = Some(price.clone());
        state.price_out = Some(price_out.clone());
        price_out
    }
}

/// First step whose demand is at or below the ceiling
fn first_unclipped(demand: &[f64], ceiling: f64) -> Option<usize> {
    demand.iter().position(|&d| d <= ceiling)
}

/// Last step whose demand is at or above the floor
fn last_unclipped(demand: &[f64], floor: f64) -> Option<usize> {
    demand.iter().rposition(|&d| d >= floor)
}

fn clip_above(demand: &mut [f64], ceiling: f64) {
    match first_unclipped(demand, ceiling) {
        Some(start) => {
            let value = demand[start];
            demand[..start].fill(value);
        }
        None => {
            let value = demand[demand.len() - 1];
            demand.fill(value);
        }
    }
}

fn clip_below(demand: &mut [f64], floor: f64) {
    match last_unclipped(demand, floor) {
        Some(end) => {
            let value = demand[end];
            demand[end + 1..].fill(value);
        }
        None => {
            let value = demand[0];
            demand.fill(value);
        }
    }
}
