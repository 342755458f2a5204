/// Typed Node Configuration
///
/// Auctioneers and concentrators are configured through plain structs with
/// sensible defaults. The same settings can be read from the key/value
/// property surface used by deployment tooling (`agentId`, `priceSteps`, ...)
/// with `from_properties`; unknown keys are ignored, malformed values are
/// reported as configuration errors.
///
/// ## Property Keys
/// - Auctioneer: `agentId`, `clusterId`, `commodity`, `currency`,
///   `priceSteps`, `minimumPrice`, `maximumPrice`, `bidTimeout`,
///   `priceUpdateRate`
/// - Concentrator: `agentId`, `desiredParentId`, `bidTimeout`,
///   `bidUpdateRate`, `forwardEagerly`, `whiteListAgents` (comma separated),
///   `floor`, `ceiling`

use crate::domain::MarketBasis;
use crate::shared::error::{PowerMatcherError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctioneerConfig {
    pub agent_id: String,
    pub cluster_id: String,
    pub commodity: String,
    pub currency: String,
    pub price_steps: usize,
    pub minimum_price: f64,
    pub maximum_price: f64,
    /// 出价过期秒数，0 表示不过期
    pub bid_timeout: u64,
    /// 出清周期（秒）
    pub price_update_rate: u64,
}

impl Default for AuctioneerConfig {
    fn default() -> Self {
        Self {
            agent_id: "auctioneer".into(),
            cluster_id: "DefaultCluster".into(),
            commodity: "electricity".into(),
            currency: "EUR".into(),
            price_steps: 100,
            minimum_price: 0.0,
            maximum_price: 1.0,
            bid_timeout: 600,
            price_update_rate: 30,
        }
    }
}

impl AuctioneerConfig {
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            agent_id: string_prop(props, "agentId", d.agent_id),
            cluster_id: string_prop(props, "clusterId", d.cluster_id),
            commodity: string_prop(props, "commodity", d.commodity),
            currency: string_prop(props, "currency", d.currency),
            price_steps: parse_prop(props, "priceSteps", d.price_steps)?,
            minimum_price: parse_prop(props, "minimumPrice", d.minimum_price)?,
            maximum_price: parse_prop(props, "maximumPrice", d.maximum_price)?,
            bid_timeout: parse_prop(props, "bidTimeout", d.bid_timeout)?,
            price_update_rate: parse_prop(props, "priceUpdateRate", d.price_update_rate)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(PowerMatcherError::Config("agentId cannot be empty".into()));
        }
        if self.price_update_rate == 0 {
            return Err(PowerMatcherError::Config("priceUpdateRate must be positive".into()));
        }
        self.market_basis()?;
        Ok(())
    }

    pub fn market_basis(&self) -> Result<MarketBasis> {
        Ok(MarketBasis::new(
            &self.commodity,
            &self.currency,
            self.price_steps,
            self.minimum_price,
            self.maximum_price,
        )?)
    }

    pub fn bid_timeout(&self) -> Option<Duration> {
        (self.bid_timeout > 0).then(|| Duration::from_secs(self.bid_timeout))
    }

    pub fn price_update_period(&self) -> Duration {
        Duration::from_secs(self.price_update_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcentratorConfig {
    pub agent_id: String,
    pub desired_parent_id: String,
    pub bid_timeout: u64,
    pub bid_update_rate: u64,
    /// 收到子节点出价后立即向上转发
    pub forward_eagerly: bool,
    /// 允许连接的子代理，空表示全部允许
    pub white_list_agents: Vec<String>,
    /// 削峰约束 (floor, ceiling)
    pub peak_shaving: Option<(f64, f64)>,
}

impl Default for ConcentratorConfig {
    fn default() -> Self {
        Self {
            agent_id: "concentrator".into(),
            desired_parent_id: "auctioneer".into(),
            bid_timeout: 600,
            bid_update_rate: 60,
            forward_eagerly: false,
            white_list_agents: Vec::new(),
            peak_shaving: None,
        }
    }
}

impl ConcentratorConfig {
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let d = Self::default();
        let white_list_agents = match props.get("whiteListAgents") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => d.white_list_agents,
        };
        let floor: Option<f64> = parse_optional(props, "floor")?;
        let ceiling: Option<f64> = parse_optional(props, "ceiling")?;
        let peak_shaving = match (floor, ceiling) {
            (None, None) => None,
            (floor, ceiling) => Some((floor.unwrap_or(f64::MIN), ceiling.unwrap_or(f64::MAX))),
        };

        let config = Self {
            agent_id: string_prop(props, "agentId", d.agent_id),
            desired_parent_id: string_prop(props, "desiredParentId", d.desired_parent_id),
            bid_timeout: parse_prop(props, "bidTimeout", d.bid_timeout)?,
            bid_update_rate: parse_prop(props, "bidUpdateRate", d.bid_update_rate)?,
            forward_eagerly: parse_prop(props, "forwardEagerly", d.forward_eagerly)?,
            white_list_agents,
            peak_shaving,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(PowerMatcherError::Config("agentId cannot be empty".into()));
        }
        if self.agent_id == self.desired_parent_id {
            return Err(PowerMatcherError::Config(format!(
                "concentrator [{}] cannot be its own parent",
                self.agent_id
            )));
        }
        if self.bid_update_rate == 0 {
            return Err(PowerMatcherError::Config("bidUpdateRate must be positive".into()));
        }
        if let Some((floor, ceiling)) = self.peak_shaving {
            if floor > ceiling {
                return Err(PowerMatcherError::Config(format!(
                    "floor {} must not be above ceiling {}",
                    floor, ceiling
                )));
            }
        }
        Ok(())
    }

    pub fn bid_timeout(&self) -> Option<Duration> {
        (self.bid_timeout > 0).then(|| Duration::from_secs(self.bid_timeout))
    }

    pub fn bid_update_period(&self) -> Duration {
        Duration::from_secs(self.bid_update_rate)
    }

    pub fn permits(&self, agent_id: &str) -> bool {
        self.white_list_agents.is_empty() || self.white_list_agents.iter().any(|a| a == agent_id)
    }
}

/// Parses `key=value` lines; `#` and `!` start comments
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=').or_else(|| line.split_once(':'))?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn string_prop(props: &HashMap<String, String>, key: &str, default: String) -> String {
    props.get(key).cloned().unwrap_or(default)
}

fn parse_prop<T: FromStr>(props: &HashMap<String, String>, key: &str, default: T) -> Result<T> {
    Ok(parse_optional(props, key)?.unwrap_or(default))
}

fn parse_optional<T: FromStr>(props: &HashMap<String, String>, key: &str) -> Result<Option<T>> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            PowerMatcherError::Config(format!("invalid value '{}' for property {}", raw, key))
        }),
    }
}
