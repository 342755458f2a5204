/// Wire Messages - JSON Envelope of the Agent Protocol
///
/// Every frame is one JSON object:
///
/// ```json
/// {"payloadType": "BID", "payload": {"marketBasis": {...}, "demand": [...], "bidNumber": 3}}
/// ```
///
/// ## Payload Types
/// - `BID`: `{marketBasis, demand[] | pricePoints[], bidNumber}`
/// - `PRICE_UPDATE`: `{marketBasis, priceValue, bidNumber}`
/// - `CLUSTERINFO`: `{clusterId, marketBasis}`, sent once per new session
/// - `REGISTER`: `{agentId, desiredParentId}`, first frame of a remote agent
///
/// The models are plain serde records; converting them into domain values is
/// where validation happens.

use crate::domain::bid::PricePoint;
use crate::domain::{Bid, BidUpdate, MarketBasis, PointBidBuilder, Price, PriceUpdate};
use crate::shared::error::{PowerMatcherError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payloadType", content = "payload")]
pub enum PmMessage {
    #[serde(rename = "BID")]
    Bid(BidModel),
    #[serde(rename = "PRICE_UPDATE")]
    PriceUpdate(PriceUpdateModel),
    #[serde(rename = "CLUSTERINFO")]
    ClusterInfo(ClusterInfoModel),
    #[serde(rename = "REGISTER")]
    Register(RegisterModel),
}

impl PmMessage {
    pub fn payload_type(&self) -> &'static str {
        match self {
            PmMessage::Bid(_) => "BID",
            PmMessage::PriceUpdate(_) => "PRICE_UPDATE",
            PmMessage::ClusterInfo(_) => "CLUSTERINFO",
            PmMessage::Register(_) => "REGISTER",
        }
    }
}

/// 线上接受的最大价格步数
pub const MAX_PRICE_STEPS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBasisModel {
    pub commodity: String,
    pub currency: String,
    pub price_steps: usize,
    pub minimum_price: f64,
    pub maximum_price: f64,
}

impl From<&MarketBasis> for MarketBasisModel {
    fn from(mb: &MarketBasis) -> Self {
        Self {
            commodity: mb.commodity().to_string(),
            currency: mb.currency().to_string(),
            price_steps: mb.price_steps(),
            minimum_price: mb.minimum_price(),
            maximum_price: mb.maximum_price(),
        }
    }
}

impl MarketBasisModel {
    pub fn to_market_basis(&self) -> Result<MarketBasis> {
        if self.price_steps > MAX_PRICE_STEPS {
            return Err(PowerMatcherError::Wire(format!(
                "priceSteps {} exceeds the limit of {}",
                self.price_steps, MAX_PRICE_STEPS
            )));
        }
        Ok(MarketBasis::new(
            &self.commodity,
            &self.currency,
            self.price_steps,
            self.minimum_price,
            self.maximum_price,
        )?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePointModel {
    pub price: f64,
    pub demand: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidModel {
    pub market_basis: MarketBasisModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demand: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_points: Option<Vec<PricePointModel>>,
    pub bid_number: u64,
}

impl BidModel {
    /// Dense form: one demand value per price step
    pub fn dense(update: &BidUpdate) -> Self {
        Self {
            market_basis: update.bid().market_basis().into(),
            demand: Some(update.bid().demand().to_vec()),
            price_points: None,
            bid_number: update.bid_number(),
        }
    }

    /// Sparse form: the breakpoints of the curve
    pub fn sparse(update: &BidUpdate) -> Self {
        let points = update
            .bid()
            .price_points()
            .iter()
            .map(|p| PricePointModel { price: p.price, demand: p.demand })
            .collect();
        Self {
            market_basis: update.bid().market_basis().into(),
            demand: None,
            price_points: Some(points),
            bid_number: update.bid_number(),
        }
    }

    pub fn to_bid_update(&self) -> Result<BidUpdate> {
        let mb = self.market_basis.to_market_basis()?;
        let bid = match (&self.demand, &self.price_points) {
            (Some(demand), _) => Bid::new(&mb, demand.clone())?,
            (None, Some(points)) => {
                let points: Vec<PricePoint> = points
                    .iter()
                    .map(|p| PricePoint::new(p.price, p.demand))
                    .collect();
                PointBidBuilder::new(&mb).add_all(&points).build()?
            }
            (None, None) => {
                return Err(PowerMatcherError::Wire(
                    "bid carries neither demand nor pricePoints".into(),
                ))
            }
        };
        Ok(BidUpdate::new(bid, self.bid_number))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdateModel {
    pub market_basis: MarketBasisModel,
    pub price_value: f64,
    pub bid_number: u64,
}

impl From<&PriceUpdate> for PriceUpdateModel {
    fn from(update: &PriceUpdate) -> Self {
        Self {
            market_basis: update.price().market_basis().into(),
            price_value: update.price().value(),
            bid_number: update.bid_number(),
        }
    }
}

impl PriceUpdateModel {
    pub fn to_price_update(&self) -> Result<PriceUpdate> {
        let mb = self.market_basis.to_market_basis()?;
        if !self.price_value.is_finite() {
            return Err(PowerMatcherError::Wire(format!(
                "price {} is not finite",
                self.price_value
            )));
        }
        Ok(PriceUpdate::new(Price::new(&mb, self.price_value), self.bid_number))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoModel {
    pub cluster_id: String,
    pub market_basis: MarketBasisModel,
}

impl ClusterInfoModel {
    pub fn new(cluster_id: &str, mb: &MarketBasis) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            market_basis: mb.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterModel {
    pub agent_id: String,
    pub desired_parent_id: String,
}
